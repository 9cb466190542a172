//! Device workers.
//!
//! A worker is created by POSTing a file or data spec to a resource; the
//! device answers with a redirect to the new worker.  It is then driven by
//! body-less POSTs to `<url>/start`, `/pause` and `/stop`, and observed by
//! polling `GET <url>`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::packet::{Packet, RawPacket};
use crate::round_tripper::{Reply, RoundTripper};
use crate::shm::SharedBuffers;

/// Creation sub-path of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    /// Writes media into a directory on the device side.
    File,
    /// Delivers media as packets through polling.
    Data,
}

impl WorkerKind {
    pub fn segment(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Data => "data",
        }
    }
}

/// Coarse reading of a worker's free-form status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    Paused,
    Stopped,
    Other(String),
}

impl WorkerState {
    pub fn from_status(status: &str) -> Self {
        match status {
            "running" | "recording" | "started" | "ACTIVE" => Self::Running,
            "paused" => Self::Paused,
            "stopped" | "finalized" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawWorker {
    name: String,
    location: String,
    start: i64,
    duration: i64,
    length: i64,
    status: String,
    packets: Option<Vec<RawPacket>>,
}

/// Snapshot returned by polling a worker.
#[derive(Debug, Default)]
pub struct Worker {
    pub name: String,
    pub location: String,
    pub start: i64,
    pub duration: i64,
    pub length: i64,
    pub status: String,
    /// Packets delivered since the previous poll.
    pub packets: Vec<Packet>,
}

impl Worker {
    /// Resolve every packet's payload and hand the ones holding a device
    /// reference their own handle on `round_tripper`.
    pub(crate) fn resolve(
        raw: RawWorker,
        buffers: &Arc<SharedBuffers>,
        round_tripper: &RoundTripper,
    ) -> Result<Self> {
        let packets = raw
            .packets
            .unwrap_or_default()
            .into_iter()
            .map(|p| {
                let mut packet = Packet::resolve(p, buffers)?;
                packet.attach(round_tripper);
                Ok(packet)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: raw.name,
            location: raw.location,
            start: raw.start,
            duration: raw.duration,
            length: raw.length,
            status: raw.status,
            packets,
        })
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_status(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// URL of a created worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    url: String,
}

impl WorkerHandle {
    /// POST `spec` to `<source>/<kind>`.  Only a redirect counts as success.
    pub fn create<B: Serialize + ?Sized>(
        client: &Client,
        source: &str,
        kind: WorkerKind,
        spec: &B,
    ) -> Result<Self> {
        let target = format!("{}/{}", source.trim_end_matches('/'), kind.segment());
        match client.post(&target, spec)? {
            Reply::Created(url) => {
                info!("Created {} worker {url}", kind.segment());
                Ok(Self { url })
            }
            Reply::Data(_) => Err(Error::Protocol(format!(
                "POST {target} answered without a worker redirect"
            ))),
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn start(&self, client: &Client) -> Result<()> {
        self.command(client, "start")
    }

    pub fn pause(&self, client: &Client) -> Result<()> {
        self.command(client, "pause")
    }

    pub fn stop(&self, client: &Client) -> Result<()> {
        self.command(client, "stop")
    }

    pub fn poll(&self, client: &Client) -> Result<Worker> {
        client.worker(&self.url)
    }

    fn command(&self, client: &Client, action: &str) -> Result<()> {
        client.post_empty(&format!("{}/{action}", self.url))?;
        debug!("Worker {}: {action}", self.url);
        Ok(())
    }
}

impl fmt::Display for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_status() {
        assert_eq!(WorkerState::from_status("recording"), WorkerState::Running);
        assert_eq!(WorkerState::from_status("ACTIVE"), WorkerState::Running);
        assert_eq!(WorkerState::from_status("paused"), WorkerState::Paused);
        assert!(WorkerState::from_status("finalized").is_terminal());
        assert!(WorkerState::from_status("stopped").is_terminal());
        assert_eq!(
            WorkerState::from_status("created"),
            WorkerState::Other("created".into())
        );
    }

    #[test]
    fn test_kind_segment() {
        assert_eq!(WorkerKind::File.segment(), "file");
        assert_eq!(WorkerKind::Data.segment(), "data");
    }

    #[cfg(unix)]
    mod device {
        use serde_json::{json, Value};

        use super::super::*;
        use crate::testing::FakeDevice;
        use cv40_common::protocol::VideoFileWorker;

        fn spec() -> VideoFileWorker {
            VideoFileWorker {
                media: "video/mp4".into(),
                location: "/data/Sessions/x/video".into(),
                ..Default::default()
            }
        }

        #[test]
        fn test_create_requires_redirect() {
            let device = FakeDevice::spawn(|req| {
                let url = req["url"].as_str().unwrap_or_default();
                let scheme = url.split(':').next().unwrap_or_default();
                json!({"error": "redirect", "location": format!("{scheme}:/0/worker/7")})
            });
            let client = Client::new();
            let handle = WorkerHandle::create(
                &client,
                &device.url("/0/camera/0"),
                WorkerKind::File,
                &spec(),
            )
            .unwrap();
            assert_eq!(handle.url(), device.url("/0/worker/7"));

            let requests = device.requests();
            assert_eq!(requests[0]["url"], device.url("/0/camera/0/file"));
            assert_eq!(requests[0]["body"]["media"], "video/mp4");
        }

        #[test]
        fn test_create_without_redirect_fails() {
            let device = FakeDevice::spawn(|_| json!({"status": "ok"}));
            let err = WorkerHandle::create(
                &Client::new(),
                &device.url("/0/camera/0"),
                WorkerKind::Data,
                &spec(),
            )
            .unwrap_err();
            assert!(matches!(err, Error::Protocol(_)));
        }

        #[test]
        fn test_create_remote_error_passes_through() {
            let device = FakeDevice::spawn(|_| json!({"error": "no space left"}));
            let err = WorkerHandle::create(
                &Client::new(),
                &device.url("/0/camera/0"),
                WorkerKind::File,
                &spec(),
            )
            .unwrap_err();
            match err {
                Error::Remote(msg) => assert_eq!(msg, "no space left"),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn test_commands_and_poll() {
            let device = FakeDevice::spawn(|req| {
                if req["method"] == "GET" {
                    json!({"name": "rec", "status": "paused", "packets": null})
                } else {
                    json!({})
                }
            });
            let client = Client::new();
            let handle = WorkerHandle::from_url(device.url("/0/worker/1"));
            handle.start(&client).unwrap();
            handle.pause(&client).unwrap();
            handle.stop(&client).unwrap();
            let worker = handle.poll(&client).unwrap();
            assert_eq!(worker.state(), WorkerState::Paused);
            assert!(worker.packets.is_empty());

            let requests = device.requests();
            let urls: Vec<&str> = requests
                .iter()
                .map(|r| r["url"].as_str().unwrap_or_default())
                .collect();
            assert_eq!(
                urls,
                [
                    device.url("/0/worker/1/start"),
                    device.url("/0/worker/1/pause"),
                    device.url("/0/worker/1/stop"),
                    device.url("/0/worker/1"),
                ]
            );
            assert!(requests[..3].iter().all(|r| r["body"] == Value::Null));
        }

        #[test]
        fn test_command_error_is_verbatim() {
            let device = FakeDevice::spawn(|_| json!({"error": "updating"}));
            let handle = WorkerHandle::from_url(device.url("/0/worker/1"));
            assert!(matches!(handle.start(&Client::new()), Err(Error::Busy)));
        }
    }
}
