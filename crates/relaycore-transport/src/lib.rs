//! Transport Acceptors (C1): per-protocol listeners that all present
//! accepted connections as a uniform [`Duplex`].

mod acceptor;
mod duplex;
mod error;
mod tcp;
mod udp;

pub use acceptor::Acceptor;
pub use duplex::{BoxedDuplex, Duplex};
pub use error::{TransportError, TransportResult};
pub use tcp::TcpAcceptor;
pub use udp::{UdpForwarder, MAX_DATAGRAM_SIZE, SOURCE_IDLE_TIMEOUT};
