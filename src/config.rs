use std::time;

/// Static description of the peer group, built once at startup and
/// passed by reference into the peer and map constructors.
#[derive(Clone, Debug)]
pub struct Config {
    /// Ordered list of peer endpoints; identical on every replica
    peers: Vec<String>,

    /// This replica's index into `peers`
    me: usize,

    /// Timeout for a single peer-to-peer call
    timeout: time::Duration,
}

impl Config {
    pub fn new(peers: Vec<String>, me: usize) -> Self {
        assert!(me < peers.len(), "peer index out of range");
        Config {
            peers,
            me,
            timeout: time::Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn me(&self) -> usize {
        self.me
    }

    /// Total number of replicas in the group.
    pub fn total(&self) -> usize {
        self.peers.len()
    }

    /// The endpoint this replica listens on.
    pub fn addr(&self) -> &str {
        &self.peers[self.me]
    }

    pub fn timeout(&self) -> time::Duration {
        self.timeout
    }
}
