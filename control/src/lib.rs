//! CV40 control service: recording across storage roots and rate-limited
//! camera parameter writes.

pub mod device;
pub mod limiter;
pub mod preset;
pub mod recording;
pub mod session;
pub mod state;
