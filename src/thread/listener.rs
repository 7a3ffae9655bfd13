//! # Summary
//!
//! The accept loop: one task per peer listening for inbound calls, one
//! task per connection. A dead peer answers nothing; in unreliable mode
//! a fraction of requests is dropped before or after processing, which
//! exercises the callers' non-vote paths.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, trace};
use tokio::net;

use crate::message;
use crate::paxos::Paxos;
use crate::socket;
use crate::state;

impl<V: state::Value> Paxos<V> {
    pub(crate) async fn listen(self, listener: net::TcpListener) {
        loop {
            let stream = tokio::select! {
                _ = self.token().cancelled() => return,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(error) => {
                        debug!("accept failed: {}", error);
                        continue;
                    }
                },
            };
            if self.is_dead() {
                return;
            }
            if self.is_unreliable() && rand::random::<u32>() % 1000 < 100 {
                // Drop the request on the floor.
                continue;
            }
            let discard = self.is_unreliable() && rand::random::<u32>() % 1000 < 200;
            let peer = self.clone();
            tokio::spawn(async move { peer.serve(stream, discard).await });
        }
    }

    /// Serves one connection: request frame in, reply frame out. With
    /// `discard` set the request is processed but the reply withheld,
    /// mimicking a reply lost in flight.
    async fn serve(self, stream: net::TcpStream, discard: bool) {
        let mut framed = socket::frame(stream);
        while let Some(Ok(frame)) = framed.next().await {
            if self.is_dead() {
                return;
            }
            let request = match bincode::deserialize::<message::Request<V>>(&frame) {
                Ok(request) => request,
                Err(_) => return,
            };
            trace!("received {:?}", request);
            let reply = self.handle(request);
            if discard {
                return;
            }
            let encoded = match bincode::serialize(&reply) {
                Ok(encoded) => encoded,
                Err(_) => return,
            };
            if framed.send(Bytes::from(encoded)).await.is_err() {
                return;
            }
        }
    }
}
