//! Relay (C3): bidirectional byte copy between an accepted duplex and a
//! dialed target, with atomic byte/connection accounting.

mod error;
mod relay;

pub use error::{RelayError, RelayResult};
pub use relay::{relay, CONNECT_DEADLINE};
