//! Delivered media packets.
//!
//! A packet's payload arrives either inline (base64 `data`) or as a range
//! of a named shared-memory region (`ref`, `handle`, `ptr`, `len`, `cap`).
//! Closing a packet, or dropping it, releases the shared-memory reference
//! and asks the device to release `ref`.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::round_tripper::{Method, RoundTripper};
use crate::shm::{BufferLease, SharedBuffers};

/// Packet as it appears on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawPacket {
    track: i64,
    media: String,
    signal: String,
    timestamp: i64,
    data: Option<String>,
    meta: Value,
    #[serde(rename = "ref")]
    reference: String,
    handle: String,
    ptr: usize,
    len: usize,
    cap: usize,
}

/// Top-level family of a packet's media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    Other,
}

impl MediaKind {
    pub fn of(media: &str) -> Self {
        match media.split('/').next().unwrap_or_default() {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "image" => Self::Image,
            _ => Self::Other,
        }
    }
}

enum Payload {
    Inline(Vec<u8>),
    Shared {
        lease: BufferLease,
        start: usize,
        end: usize,
    },
    Released,
}

/// One unit of delivered media.
pub struct Packet {
    pub track: i64,
    pub media: String,
    pub signal: String,
    pub timestamp: i64,
    /// Type-specific metadata, see [`Packet::meta`].
    pub meta: Value,
    reference: Option<String>,
    payload: Payload,
    remote: Option<RoundTripper>,
}

impl Packet {
    pub(crate) fn resolve(raw: RawPacket, buffers: &Arc<SharedBuffers>) -> Result<Self> {
        let (reference, payload) = if raw.reference.is_empty() {
            let bytes = match raw.data.as_deref() {
                Some(encoded) if !encoded.is_empty() => STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::Protocol(format!("packet data: {e}")))?,
                _ => Vec::new(),
            };
            (None, Payload::Inline(bytes))
        } else {
            if raw.handle.is_empty() {
                return Err(Error::shared_memory(&raw.reference, "packet without handle"));
            }
            let end = raw
                .ptr
                .checked_add(raw.len)
                .filter(|&end| end <= raw.cap)
                .ok_or_else(|| {
                    Error::shared_memory(
                        &raw.handle,
                        format!("range {}+{} exceeds capacity {}", raw.ptr, raw.len, raw.cap),
                    )
                })?;
            let lease = buffers.acquire(&raw.handle, raw.cap)?;
            if end > lease.bytes().len() {
                return Err(Error::shared_memory(
                    &raw.handle,
                    format!("range ends at {end} past mapped {} bytes", lease.bytes().len()),
                ));
            }
            (
                Some(raw.reference),
                Payload::Shared {
                    lease,
                    start: raw.ptr,
                    end,
                },
            )
        };

        Ok(Self {
            track: raw.track,
            media: raw.media,
            signal: raw.signal,
            timestamp: raw.timestamp,
            meta: raw.meta,
            reference,
            payload,
            remote: None,
        })
    }

    /// Give the packet its own handle on the connection so it can release
    /// its device-side reference later.
    pub(crate) fn attach(&mut self, round_tripper: &RoundTripper) {
        if self.reference.is_some() {
            self.remote = Some(round_tripper.clone());
        }
    }

    /// Device-side reference, present for shared-memory packets.
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.payload, Payload::Shared { .. })
    }

    pub fn kind(&self) -> MediaKind {
        MediaKind::of(&self.media)
    }

    /// Payload bytes.  Borrowing ties them to the packet, so they cannot
    /// outlive [`Packet::close`].
    pub fn data(&self) -> &[u8] {
        match &self.payload {
            Payload::Inline(bytes) => bytes,
            Payload::Shared { lease, start, end } => &lease.bytes()[*start..*end],
            Payload::Released => &[],
        }
    }

    /// Decode the metadata blob, e.g. into the video metadata struct of
    /// `cv40-common`.
    pub fn meta<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.meta)?)
    }

    /// Release the packet's local and remote references.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.payload = Payload::Released;

        let (Some(reference), Some(remote)) = (self.reference.take(), self.remote.take()) else {
            return;
        };
        let spawned = std::thread::Builder::new()
            .name("packet-release".into())
            .spawn(move || {
                if let Err(e) = remote.call::<()>(Method::Delete, &reference, None) {
                    debug!("Release of {reference} failed: {e}");
                }
            });
        if let Err(e) = spawned {
            warn!("Cannot spawn packet release thread: {e}");
        }
    }
}

impl Drop for Packet {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("track", &self.track)
            .field("media", &self.media)
            .field("signal", &self.signal)
            .field("timestamp", &self.timestamp)
            .field("reference", &self.reference)
            .field("len", &self.data().len())
            .finish()
    }
}
