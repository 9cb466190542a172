//! CV40 device client.
//!
//! Synchronous request/response access to a CV40 camera over a serial port,
//! TCP or a local channel, with zero-copy media delivery through shared
//! memory.

pub mod client;
pub mod error;
pub mod packet;
pub mod round_tripper;
pub mod shm;
pub mod transport;
pub mod worker;

#[cfg(all(test, unix))]
mod testing;

pub use client::{delete, get, post, Client};
pub use error::{Error, Result};
pub use packet::{MediaKind, Packet};
pub use round_tripper::{Method, Reply, RoundTripper};
pub use shm::{BufferLease, SharedBuffers};
pub use transport::Location;
pub use worker::{Worker, WorkerHandle, WorkerKind, WorkerState};
