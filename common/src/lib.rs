//! Types shared by the cv40 client library and the control service.

pub mod config;
pub mod protocol;
