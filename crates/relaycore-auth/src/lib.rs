//! Token authentication: the per-tunnel bearer gate consumed directly by
//! the WS/WSS acceptor, and the owner-resolution `Authenticator` contract
//! consumed by the control plane.

mod authenticator;
mod bearer;
mod error;

pub use authenticator::{Authenticator, StaticAuthenticator};
pub use bearer::{extract_bearer_token, tokens_match};
pub use error::{AuthError, AuthResult};
