//! Multiplexer (C2): turns a single transport duplex into many ordered,
//! flow-controlled logical streams.

mod connection;
mod error;
mod stream;
mod window;

pub use connection::{Multiplexer, Role};
pub use error::{MuxError, MuxResult};
pub use stream::MuxStream;
