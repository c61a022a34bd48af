//! Communication between the two parties.
//!
//! [`codec`] frames raw payloads, [`connection`] moves frames and bincode
//! messages over any `AsyncRead`/`AsyncWrite` pair, and [`session`] ties a
//! connection to the two-party group: rendezvous, handshake and barrier.

pub mod codec;
pub mod connection;
pub mod session;
