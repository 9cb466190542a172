//! Camera operations used by the recording and parameter services.
//!
//! [`Device`] is the seam between orchestration and the wire: the service
//! runs against [`Cv40Device`], tests against a scripted fake.

use std::io;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use cv40_client::{Client, Error, Result, WorkerHandle, WorkerKind};
use cv40_common::config::Config;
use cv40_common::protocol::{
    Camera, CameraColors, CameraExposure, CameraVisuals, CameraWhite, VideoEncoderExtra,
    VideoFileWorker,
};

#[async_trait]
pub trait Device: Send + Sync + 'static {
    /// Camera and signal status.
    async fn camera(&self) -> Result<Camera>;

    async fn colors(&self) -> Result<CameraColors>;
    async fn set_colors(&self, colors: CameraColors) -> Result<()>;

    async fn visuals(&self) -> Result<CameraVisuals>;
    async fn set_visuals(&self, visuals: CameraVisuals) -> Result<()>;

    async fn white(&self) -> Result<CameraWhite>;
    async fn set_white(&self, white: CameraWhite) -> Result<()>;

    async fn exposure(&self) -> Result<CameraExposure>;
    async fn set_exposure(&self, exposure: CameraExposure) -> Result<()>;

    /// Create a file worker writing `media` into `destination`.  Returns the
    /// worker URL.
    async fn create_video_worker(&self, destination: &Path, media: &str) -> Result<String>;

    async fn start_worker(&self, url: &str) -> Result<()>;
    async fn pause_worker(&self, url: &str) -> Result<()>;
    async fn stop_worker(&self, url: &str) -> Result<()>;

    /// Status string the device currently reports for a worker.
    async fn worker_status(&self, url: &str) -> Result<String>;
}

/// Longest wait for the camera to answer the startup health check.
pub const HEALTH_TIMEOUT: Duration = Duration::from_millis(1500);

/// [`Device`] backed by a [`Client`].  Blocking calls run on the blocking
/// thread pool.
pub struct Cv40Device {
    client: Client,
    camera_url: String,
    extra: VideoEncoderExtra,
}

impl Cv40Device {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            camera_url: config.camera_url(),
            extra: VideoEncoderExtra {
                hw: config.recording.encoder.clone(),
                bitrate: config.recording.bitrate,
                codec: config.recording.codec.clone(),
                ..Default::default()
            },
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn camera_url(&self) -> &str {
        &self.camera_url
    }

    /// Read the camera status, giving up after `limit`.  On expiry the
    /// pending call is interrupted so its blocking thread returns.
    pub async fn health_check(&self, limit: Duration) -> Result<Camera> {
        match tokio::time::timeout(limit, self.camera()).await {
            Ok(camera) => camera,
            Err(_) => {
                warn!("Camera did not answer within {limit:?}");
                self.client.interrupt();
                Err(Error::Transport(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer from {} within {limit:?}", self.camera_url),
                )))
            }
        }
    }

    fn resource(&self, name: &str) -> String {
        format!("{}/{name}", self.camera_url)
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> Result<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| Error::Transport(io::Error::other(e)))?
    }

    async fn get_resource<T>(&self, name: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let url = self.resource(name);
        self.run(move |c| c.get(&url)).await
    }

    async fn set_resource<B>(&self, name: &str, body: B) -> Result<()>
    where
        B: serde::Serialize + Send + 'static,
    {
        let url = self.resource(name);
        self.run(move |c| c.post(&url, &body).map(drop)).await
    }
}

#[async_trait]
impl Device for Cv40Device {
    async fn camera(&self) -> Result<Camera> {
        let url = self.camera_url.clone();
        self.run(move |c| c.get(&url)).await
    }

    async fn colors(&self) -> Result<CameraColors> {
        self.get_resource("colors").await
    }

    async fn set_colors(&self, colors: CameraColors) -> Result<()> {
        self.set_resource("colors", colors).await
    }

    async fn visuals(&self) -> Result<CameraVisuals> {
        self.get_resource("visuals").await
    }

    async fn set_visuals(&self, visuals: CameraVisuals) -> Result<()> {
        self.set_resource("visuals", visuals).await
    }

    async fn white(&self) -> Result<CameraWhite> {
        self.get_resource("white").await
    }

    async fn set_white(&self, white: CameraWhite) -> Result<()> {
        self.set_resource("white", white).await
    }

    async fn exposure(&self) -> Result<CameraExposure> {
        self.get_resource("exposure").await
    }

    async fn set_exposure(&self, exposure: CameraExposure) -> Result<()> {
        self.set_resource("exposure", exposure).await
    }

    async fn create_video_worker(&self, destination: &Path, media: &str) -> Result<String> {
        let spec = VideoFileWorker {
            media: media.to_string(),
            location: destination.display().to_string(),
            extra: self.extra.clone(),
            ..Default::default()
        };
        let source = self.camera_url.clone();
        let handle = self
            .run(move |c| WorkerHandle::create(c, &source, WorkerKind::File, &spec))
            .await?;
        Ok(handle.url().to_string())
    }

    async fn start_worker(&self, url: &str) -> Result<()> {
        let handle = WorkerHandle::from_url(url);
        self.run(move |c| handle.start(c)).await
    }

    async fn pause_worker(&self, url: &str) -> Result<()> {
        let handle = WorkerHandle::from_url(url);
        self.run(move |c| handle.pause(c)).await
    }

    async fn stop_worker(&self, url: &str) -> Result<()> {
        let handle = WorkerHandle::from_url(url);
        self.run(move |c| handle.stop(c)).await
    }

    async fn worker_status(&self, url: &str) -> Result<String> {
        let handle = WorkerHandle::from_url(url);
        let worker = self.run(move |c| handle.poll(c)).await?;
        debug!("{url}: {} ({} packets)", worker.status, worker.packets.len());
        Ok(worker.status.clone())
    }
}

/// Scripted in-memory device for orchestration tests.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::path::PathBuf;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct State {
        next_worker: usize,
        /// Worker URL → destination.
        workers: HashMap<String, PathBuf>,
        /// Worker URL → queued statuses; the last one repeats.
        statuses: HashMap<String, VecDeque<String>>,
        calls: Vec<String>,
        colors: Vec<CameraColors>,
        visuals: Vec<CameraVisuals>,
        whites: Vec<CameraWhite>,
    }

    #[derive(Default)]
    pub struct FakeDevice {
        state: Mutex<State>,
        /// Destinations whose worker cannot be created.
        pub failing_destinations: Mutex<HashSet<PathBuf>>,
        /// Worker URLs whose status GET fails.
        pub failing_status: Mutex<HashSet<String>>,
        /// Worker URLs whose commands fail.
        pub failing_commands: Mutex<HashSet<String>>,
        /// Status reported after stop, `None` to keep the current one.
        pub stopped_status: Mutex<Option<String>>,
        pub fail_writes: Mutex<bool>,
        /// File written into the destination when a worker stops.
        pub output: Mutex<Option<(String, usize)>>,
    }

    impl FakeDevice {
        pub fn new() -> Self {
            let device = Self::default();
            *device.stopped_status.lock() = Some("finalized".into());
            device
        }

        pub fn calls(&self) -> Vec<String> {
            self.state.lock().calls.clone()
        }

        pub fn colors_written(&self) -> Vec<CameraColors> {
            self.state.lock().colors.clone()
        }

        pub fn visuals_written(&self) -> Vec<CameraVisuals> {
            self.state.lock().visuals.clone()
        }

        pub fn whites_written(&self) -> Vec<CameraWhite> {
            self.state.lock().whites.clone()
        }

        pub fn workers(&self) -> HashMap<String, PathBuf> {
            self.state.lock().workers.clone()
        }

        pub fn set_status(&self, url: &str, status: &str) {
            self.state
                .lock()
                .statuses
                .insert(url.to_string(), VecDeque::from([status.to_string()]));
        }

        fn record(&self, call: String) {
            self.state.lock().calls.push(call);
        }

        fn command(&self, action: &str, url: &str) -> Result<()> {
            self.record(format!("{action} {url}"));
            if self.failing_commands.lock().contains(url) {
                return Err(Error::Remote(format!("{action} refused")));
            }
            Ok(())
        }

        fn write_check(&self) -> Result<()> {
            if *self.fail_writes.lock() {
                return Err(Error::Busy);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Device for FakeDevice {
        async fn camera(&self) -> Result<Camera> {
            Ok(Camera::default())
        }

        async fn colors(&self) -> Result<CameraColors> {
            Ok(CameraColors {
                gamma: 2.2,
                color_gain: [1.0; 3],
                ..Default::default()
            })
        }

        async fn set_colors(&self, colors: CameraColors) -> Result<()> {
            self.write_check()?;
            self.state.lock().colors.push(colors);
            Ok(())
        }

        async fn visuals(&self) -> Result<CameraVisuals> {
            Ok(CameraVisuals {
                flip: "none".into(),
                zoom: 1.0,
                ..Default::default()
            })
        }

        async fn set_visuals(&self, visuals: CameraVisuals) -> Result<()> {
            self.write_check()?;
            self.state.lock().visuals.push(visuals);
            Ok(())
        }

        async fn white(&self) -> Result<CameraWhite> {
            Ok(CameraWhite {
                balance: [1.0; 3],
                temperature: 5000,
            })
        }

        async fn set_white(&self, white: CameraWhite) -> Result<()> {
            self.write_check()?;
            self.state.lock().whites.push(white);
            Ok(())
        }

        async fn exposure(&self) -> Result<CameraExposure> {
            Ok(CameraExposure::default())
        }

        async fn set_exposure(&self, _exposure: CameraExposure) -> Result<()> {
            self.write_check()
        }

        async fn create_video_worker(&self, destination: &Path, media: &str) -> Result<String> {
            self.record(format!("create {} {media}", destination.display()));
            if self.failing_destinations.lock().contains(destination) {
                return Err(Error::Remote("no space left on device".into()));
            }
            let mut state = self.state.lock();
            state.next_worker += 1;
            let url = format!("fake:/0/worker/{}", state.next_worker);
            state.workers.insert(url.clone(), destination.to_path_buf());
            state
                .statuses
                .insert(url.clone(), VecDeque::from(["created".to_string()]));
            Ok(url)
        }

        async fn start_worker(&self, url: &str) -> Result<()> {
            self.command("start", url)?;
            self.set_status(url, "recording");
            Ok(())
        }

        async fn pause_worker(&self, url: &str) -> Result<()> {
            self.command("pause", url)?;
            self.set_status(url, "paused");
            Ok(())
        }

        async fn stop_worker(&self, url: &str) -> Result<()> {
            self.command("stop", url)?;
            if let Some(status) = self.stopped_status.lock().clone() {
                self.set_status(url, &status);
            }
            let destination = self.state.lock().workers.get(url).cloned();
            if let (Some(dir), Some((name, size))) = (destination, self.output.lock().clone()) {
                std::fs::write(dir.join(name), vec![0u8; size])?;
            }
            Ok(())
        }

        async fn worker_status(&self, url: &str) -> Result<String> {
            if self.failing_status.lock().contains(url) {
                return Err(Error::Remote(format!("{url}: not responding")));
            }
            let mut state = self.state.lock();
            let queue = state
                .statuses
                .get_mut(url)
                .ok_or_else(|| Error::Remote("not found".into()))?;
            let status = if queue.len() > 1 {
                queue.pop_front().unwrap_or_default()
            } else {
                queue.front().cloned().unwrap_or_default()
            };
            Ok(status)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixListener;

    use serde_json::{json, Value};

    use super::*;

    /// Serve one connection, answering each request with `answer(request)`.
    fn serve(scheme: &str, answer: impl Fn(&Value) -> Value + Send + 'static) -> std::path::PathBuf {
        let path = cv40_client::transport::socket_path(scheme);
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        std::thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else { return };
            let mut writer = stream.try_clone().unwrap();
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else { break };
                let request: Value = serde_json::from_str(&line).unwrap();
                let mut reply = serde_json::to_vec(&answer(&request)).unwrap();
                reply.push(b'\n');
                if writer.write_all(&reply).is_err() {
                    break;
                }
            }
        });
        path
    }

    fn config(scheme: &str) -> Config {
        Config {
            device_url: format!("{scheme}:"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cv40_device_worker_flow() {
        let scheme = format!("cv40dev{}", std::process::id());
        let worker = format!("{scheme}:/0/worker/4");
        let redirect = worker.clone();
        let path = serve(&scheme, move |req| {
            match (req["method"].as_str(), req["url"].as_str().unwrap_or_default()) {
                (Some("POST"), url) if url.ends_with("/camera/0/file") => {
                    assert_eq!(req["body"]["location"], "/data/video");
                    assert_eq!(req["body"]["extra"]["codec"], "h264");
                    json!({"error": "redirect", "location": redirect})
                }
                (Some("GET"), url) if url.ends_with("/worker/4") => json!({"status": "recording"}),
                (Some("GET"), _) => json!({"brightness": 12, "gamma": 2.2}),
                _ => json!({}),
            }
        });

        let device = Cv40Device::new(Client::new(), &config(&scheme));
        assert_eq!(device.camera_url(), format!("{scheme}:/0/camera/0"));

        let url = device
            .create_video_worker(Path::new("/data/video"), "video/mp4")
            .await
            .unwrap();
        assert_eq!(url, worker);
        device.start_worker(&url).await.unwrap();
        assert_eq!(device.worker_status(&url).await.unwrap(), "recording");

        let colors = device.colors().await.unwrap();
        assert_eq!(colors.brightness, 12);
        device.set_colors(colors).await.unwrap();

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_health_check_gives_up_on_silent_camera() {
        let scheme = format!("cv40mute{}", std::process::id());
        let path = cv40_client::transport::socket_path(&scheme);
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        // Read requests without ever answering.
        std::thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else { return };
            let _ = std::io::copy(&mut stream, &mut std::io::sink());
        });

        let device = Cv40Device::new(Client::new(), &config(&scheme));
        let started = std::time::Instant::now();
        let err = device
            .health_check(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(&err, Error::Transport(e) if e.kind() == io::ErrorKind::TimedOut));

        // The interrupted call unblocks and drops the connection.
        let client = device.client().clone();
        let connected = tokio::time::timeout(
            Duration::from_secs(3),
            tokio::task::spawn_blocking(move || client.round_tripper().is_connected()),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(!connected);

        std::fs::remove_file(path).ok();
    }
}
