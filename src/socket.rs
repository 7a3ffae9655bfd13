//! # Summary
//!
//! This module abstracts over connections to peer servers.
//!
//! Uses `tokio`'s length-delimited codec around an asynchronous TCP
//! stream, with `bincode` to serialize and deserialize Rust structs on
//! either end. Each call opens a fresh connection, performs exactly one
//! request/reply exchange, and closes it.

use std::time;

use futures::{SinkExt, StreamExt};
use tokio::net;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Framed, bincode-encoded view of a TCP stream.
pub fn frame(stream: net::TcpStream) -> Framed<net::TcpStream, LengthDelimitedCodec> {
    Framed::new(stream, LengthDelimitedCodec::new())
}

/// One-shot request/reply call to `addr`. Any failure along the way
/// (dial, encode, transport, decode, timeout) collapses to `None`: the
/// protocol treats it as a silent non-vote and moves on.
pub async fn call<Q, R>(addr: &str, request: &Q, limit: time::Duration) -> Option<R>
where
    Q: serde::Serialize,
    R: serde::de::DeserializeOwned,
{
    tokio::time::timeout(limit, async {
        let stream = net::TcpStream::connect(addr).await.ok()?;
        let mut framed = frame(stream);
        let encoded = bincode::serialize(request).ok()?;
        framed.send(encoded.into()).await.ok()?;
        let frame = framed.next().await?.ok()?;
        bincode::deserialize(&frame).ok()
    })
    .await
    .ok()
    .flatten()
}
