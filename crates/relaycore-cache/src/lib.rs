//! Cache/pubsub interface (spec §6), consumed by the Manager and the Push
//! Bus, with an in-memory degrade-on-unavailability reference impl.

mod cache;

pub use cache::{CachePubSub, InMemoryCache};
