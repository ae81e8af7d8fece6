//! WS/WSS transport acceptor (C1): HTTP upgrade gated on a bearer token,
//! optional TLS termination, binary-frame duplex.

mod error;
mod listener;
mod stream;
mod tls;

pub use error::{WsError, WsResult};
pub use listener::WsAcceptor;
pub use stream::WsDuplex;
