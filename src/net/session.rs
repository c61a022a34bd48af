//! Two-party sessions.
//!
//! A [`Session`] is the one communication context a party owns for the whole
//! run. It is created by joining the group (which must have exactly two
//! members), used by the protocol by reference, and torn down after the final
//! barrier.

use std::time::Duration;

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    time::Instant,
};
use tokio_util::bytes::Bytes;

use crate::{
    config::{check_group, ConfigError},
    net::connection::{Connection, ConnectionError, DuplexConnection, TcpConnection},
};

/// How long the peer keeps trying to reach the authority.
pub const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(60);
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Role of a party, determined by its rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Rank 0, generates and holds the private key.
    Authority,
    /// Rank 1.
    Peer,
}

impl Role {
    pub fn from_rank(rank: usize) -> Result<Self, ConfigError> {
        match rank {
            0 => Ok(Role::Authority),
            1 => Ok(Role::Peer),
            r => Err(ConfigError::Rank(r)),
        }
    }

    pub fn rank(self) -> usize {
        match self {
            Role::Authority => 0,
            Role::Peer => 1,
        }
    }

    /// The role on the other end of the session.
    pub fn peer(self) -> Role {
        match self {
            Role::Authority => Role::Peer,
            Role::Peer => Role::Authority,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rank {}", self.rank())
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Hello {
    rank: usize,
    world_size: usize,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("Could not rendezvous at {addr}: {source}")]
    Rendezvous {
        addr: String,
        source: std::io::Error,
    },
    #[error("Peer rejected: {0}")]
    Handshake(String),
    #[error("No party with rank {0} in this session")]
    UnknownRank(usize),
    #[error("Expected an empty barrier frame, got {0} bytes")]
    Barrier(usize),
    #[error("Received an empty frame where a message was expected")]
    EmptyFrame,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl SessionError {
    /// Whether the error stems from the peer breaking the message schedule.
    pub fn is_desync(&self) -> bool {
        match self {
            SessionError::Barrier(_) | SessionError::EmptyFrame => true,
            SessionError::Connection(e) => e.is_malformed(),
            _ => false,
        }
    }
}

/// Communication context between exactly two parties.
pub struct Session<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    role: Role,
    connection: Connection<R, W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Session<R, W> {
    /// Join a two-party group over an established connection.
    ///
    /// Both ends announce their rank and group size, and the session is only
    /// accepted when the two announcements complement each other.
    ///
    /// * `rank`: our rank, 0 or 1
    /// * `world_size`: declared group size, must be 2
    /// * `connection`: connection to the other party
    pub async fn join(
        rank: usize,
        world_size: usize,
        mut connection: Connection<R, W>,
    ) -> Result<Self, SessionError> {
        check_group(rank, world_size)?;
        let role = Role::from_rank(rank)?;

        connection.send(&Hello { rank, world_size }).await?;
        let hello: Hello = connection.recv().await?;
        if hello.world_size != world_size {
            return Err(SessionError::Handshake(format!(
                "peer declared a group of {}, we declared {world_size}",
                hello.world_size
            )));
        }
        if hello.rank != role.peer().rank() {
            return Err(SessionError::Handshake(format!(
                "peer claims rank {} while we are {role}",
                hello.rank
            )));
        }
        tracing::debug!("Joined session as {role}");
        Ok(Self { role, connection })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_rank(&self) -> usize {
        self.role.peer().rank()
    }

    fn check_rank(&self, rank: usize) -> Result<(), SessionError> {
        if rank == self.peer_rank() {
            Ok(())
        } else {
            Err(SessionError::UnknownRank(rank))
        }
    }

    /// Send a payload to `dst`, waiting until it has been handed to the transport.
    pub async fn send_bytes(&mut self, dst: usize, payload: Bytes) -> Result<(), SessionError> {
        self.check_rank(dst)?;
        tracing::trace!(bytes = payload.len(), dst, "Sending frame");
        self.connection.send_bytes(payload).await?;
        Ok(())
    }

    /// Receive the next payload from `src`. A zero-length frame yields empty bytes.
    pub async fn recv_bytes(&mut self, src: usize) -> Result<Bytes, SessionError> {
        self.check_rank(src)?;
        let payload = self.connection.recv_bytes().await?;
        tracing::trace!(bytes = payload.len(), src, "Received frame");
        Ok(payload)
    }

    /// Serialize and send a message to `dst`.
    pub async fn send_obj(
        &mut self,
        dst: usize,
        obj: &impl serde::Serialize,
    ) -> Result<(), SessionError> {
        let payload = bincode::serialize(obj).map_err(ConnectionError::from)?;
        self.send_bytes(dst, payload.into()).await
    }

    /// Receive and deserialize a message from `src`.
    ///
    /// Empty frames are reserved for [`Session::barrier`], so receiving one
    /// here means the parties are out of step.
    pub async fn recv_obj<T: serde::de::DeserializeOwned>(
        &mut self,
        src: usize,
    ) -> Result<T, SessionError> {
        let payload = self.recv_bytes(src).await?;
        if payload.is_empty() {
            return Err(SessionError::EmptyFrame);
        }
        let obj = bincode::deserialize(&payload).map_err(ConnectionError::from)?;
        Ok(obj)
    }

    /// Wait until both parties have reached the barrier.
    pub async fn barrier(&mut self) -> Result<(), SessionError> {
        let peer = self.peer_rank();
        self.send_bytes(peer, Bytes::new()).await?;
        let token = self.recv_bytes(peer).await?;
        if !token.is_empty() {
            return Err(SessionError::Barrier(token.len()));
        }
        tracing::debug!("Passed barrier");
        Ok(())
    }
}

pub type TcpSession = Session<OwnedReadHalf, OwnedWriteHalf>;

impl TcpSession {
    /// Join the group over TCP.
    ///
    /// Rank 0 listens on `addr:port`, rank 1 connects to it, retrying until
    /// [`RENDEZVOUS_TIMEOUT`] has passed. The group configuration is checked
    /// before any socket is opened.
    pub async fn connect(
        rank: usize,
        world_size: usize,
        addr: &str,
        port: u16,
    ) -> Result<Self, SessionError> {
        check_group(rank, world_size)?;
        let rendezvous = |source| SessionError::Rendezvous {
            addr: format!("{addr}:{port}"),
            source,
        };

        let stream = match Role::from_rank(rank)? {
            Role::Authority => {
                let listener = TcpListener::bind((addr, port)).await.map_err(rendezvous)?;
                tracing::info!("Waiting for peer on {addr}:{port}");
                let (stream, peer) = listener.accept().await.map_err(rendezvous)?;
                tracing::debug!("Accepted connection from {peer}");
                stream
            }
            Role::Peer => {
                let deadline = Instant::now() + RENDEZVOUS_TIMEOUT;
                loop {
                    match TcpStream::connect((addr, port)).await {
                        Ok(stream) => break stream,
                        Err(e) if Instant::now() < deadline => {
                            tracing::debug!("Authority not reachable yet: {e}");
                            tokio::time::sleep(RETRY_DELAY).await;
                        }
                        Err(e) => return Err(rendezvous(e)),
                    }
                }
            }
        };
        stream.set_nodelay(true).map_err(rendezvous)?;

        Session::join(rank, world_size, Connection::from_tcp(stream)).await
    }

    /// Close the underlying socket.
    pub async fn shutdown(self) -> Result<(), SessionError> {
        let mut tcp = self.connection.to_tcp()?;
        // The peer may already have hung up after the barrier.
        if let Err(e) = tcp.shutdown().await {
            tracing::debug!("Shutdown after barrier: {e}");
        }
        Ok(())
    }
}

pub type DuplexSession = Session<
    tokio::io::ReadHalf<tokio::io::DuplexStream>,
    tokio::io::WriteHalf<tokio::io::DuplexStream>,
>;

impl DuplexSession {
    /// Construct a joined in-memory session pair, rank 0 first.
    pub async fn in_memory() -> Result<(Self, Self), SessionError> {
        let (c0, c1) = DuplexConnection::in_memory();
        tokio::try_join!(Session::join(0, 2, c0), Session::join(1, 2, c1))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roles() {
        assert_eq!(Role::from_rank(0), Ok(Role::Authority));
        assert_eq!(Role::from_rank(1), Ok(Role::Peer));
        assert_eq!(Role::from_rank(2), Err(ConfigError::Rank(2)));
        assert_eq!(Role::Authority.peer(), Role::Peer);
        assert_eq!(Role::Peer.peer().rank(), 0);
    }

    #[tokio::test]
    async fn bytes_and_objects() {
        let (mut s0, mut s1) = DuplexSession::in_memory().await.unwrap();
        let h0 = async {
            s0.send_bytes(1, Bytes::from_static(b"raw")).await.unwrap();
            s0.send_bytes(1, Bytes::new()).await.unwrap();
            s0.send_obj(1, &("tag".to_owned(), 42u64)).await.unwrap();
        };
        let h1 = async {
            assert_eq!(&s1.recv_bytes(0).await.unwrap()[..], b"raw");
            assert!(s1.recv_bytes(0).await.unwrap().is_empty());
            let obj: (String, u64) = s1.recv_obj(0).await.unwrap();
            assert_eq!(obj, ("tag".to_owned(), 42));
        };
        futures::join!(h0, h1);
    }

    #[tokio::test]
    async fn barrier() {
        let (mut s0, mut s1) = DuplexSession::in_memory().await.unwrap();
        let (r0, r1) = futures::join!(s0.barrier(), s1.barrier());
        r0.unwrap();
        r1.unwrap();
    }

    #[tokio::test]
    async fn barrier_out_of_step() {
        let (mut s0, mut s1) = DuplexSession::in_memory().await.unwrap();
        let (r0, r1) = futures::join!(s0.barrier(), s1.send_obj(0, &7u32));
        r1.unwrap();
        let err = r0.unwrap_err();
        assert!(matches!(err, SessionError::Barrier(4)));
        assert!(err.is_desync());
    }

    #[tokio::test]
    async fn empty_frame_is_not_an_object() {
        let (mut s0, mut s1) = DuplexSession::in_memory().await.unwrap();
        s0.send_bytes(1, Bytes::new()).await.unwrap();
        let err = s1.recv_obj::<u32>(0).await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyFrame));
    }

    #[tokio::test]
    async fn only_the_peer_is_addressable() {
        let (mut s0, _s1) = DuplexSession::in_memory().await.unwrap();
        let res = s0.send_bytes(0, Bytes::new()).await;
        assert!(matches!(res, Err(SessionError::UnknownRank(0))));
        let res = s0.recv_bytes(2).await;
        assert!(matches!(res, Err(SessionError::UnknownRank(2))));
    }

    #[tokio::test]
    async fn same_rank_rejected() {
        let (c0, c1) = DuplexConnection::in_memory();
        let (r0, r1) = futures::join!(Session::join(0, 2, c0), Session::join(0, 2, c1));
        assert!(matches!(r0, Err(SessionError::Handshake(_))));
        assert!(matches!(r1, Err(SessionError::Handshake(_))));
    }

    #[tokio::test]
    async fn group_size_checked_before_io() {
        // Nothing listens on this port; a connection attempt would hang in the retry loop.
        let res = TcpSession::connect(1, 3, "127.0.0.1", 9).await;
        assert!(matches!(
            res,
            Err(SessionError::Configuration(ConfigError::GroupSize(3)))
        ));

        let (c0, _c1) = DuplexConnection::in_memory();
        let res = Session::join(0, 1, c0).await;
        assert!(matches!(
            res,
            Err(SessionError::Configuration(ConfigError::GroupSize(1)))
        ));
    }
}
