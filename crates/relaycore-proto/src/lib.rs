//! Wire frame format for the multiplexed tunnel transports.

mod frame;

pub use frame::{Frame, FrameError, FrameFlags, FrameType, StreamId, CONTROL_STREAM_ID, MAX_FRAME_SIZE};
