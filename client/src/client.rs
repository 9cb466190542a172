//! Typed device client on top of the round-tripper.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::round_tripper::{Method, Reply, RoundTripper};
use crate::shm::SharedBuffers;
use crate::worker::{RawWorker, Worker};

/// Device client.  Clones share the connection.
#[derive(Clone)]
pub struct Client {
    rt: RoundTripper,
    buffers: Arc<SharedBuffers>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        Self::with_buffers(SharedBuffers::global())
    }

    /// Client resolving shared-memory packets through its own table.
    pub fn with_buffers(buffers: Arc<SharedBuffers>) -> Self {
        Self {
            rt: RoundTripper::new(),
            buffers,
        }
    }

    pub fn round_tripper(&self) -> &RoundTripper {
        &self.rt
    }

    pub fn buffers(&self) -> &Arc<SharedBuffers> {
        &self.buffers
    }

    /// GET `url` and decode the body into `T`.
    pub fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let value = self.rt.call::<()>(Method::Get, url, None)?.into_data()?;
        Ok(serde_json::from_value(value)?)
    }

    /// GET a worker snapshot, resolving its packets.
    pub fn worker(&self, url: &str) -> Result<Worker> {
        let value = self.rt.call::<()>(Method::Get, url, None)?.into_data()?;
        let raw: RawWorker = serde_json::from_value(value)?;
        Worker::resolve(raw, &self.buffers, &self.rt)
    }

    pub fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Reply> {
        self.rt.call(Method::Post, url, Some(body))
    }

    /// POST with a `null` body, as worker commands expect.
    pub fn post_empty(&self, url: &str) -> Result<Reply> {
        self.rt.call::<()>(Method::Post, url, None)
    }

    pub fn delete(&self, url: &str) -> Result<()> {
        self.rt.call::<()>(Method::Delete, url, None)?;
        Ok(())
    }

    /// Fail a call blocked on this connection in another thread.
    pub fn interrupt(&self) {
        self.rt.interrupt();
    }

    pub fn close(self) {}
}

/// One GET on a fresh connection.
pub fn get<T: DeserializeOwned>(url: &str) -> Result<T> {
    Client::new().get(url)
}

/// One POST on a fresh connection.
pub fn post<B: Serialize + ?Sized>(url: &str, body: &B) -> Result<Reply> {
    Client::new().post(url, body)
}

/// One DELETE on a fresh connection.
pub fn delete(url: &str) -> Result<()> {
    Client::new().delete(url)
}
