//! In-process fake device speaking the JSON envelope over a Unix socket.

use std::io::{BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::transport::socket_path;

type Handler = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct State {
    requests: Mutex<Vec<Value>>,
    connections: AtomicUsize,
}

#[derive(Clone, Copy)]
enum Mode {
    Answer,
    HangupAfter(usize),
    Silent,
}

pub(crate) struct FakeDevice {
    scheme: String,
    path: PathBuf,
    state: Arc<State>,
}

impl FakeDevice {
    /// Answer every request with `handler(request)`.
    pub fn spawn(handler: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self::start(Mode::Answer, Arc::new(handler))
    }

    /// Close each connection after `n` answers.
    pub fn spawn_hangup_after(
        n: usize,
        handler: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self::start(Mode::HangupAfter(n), Arc::new(handler))
    }

    /// Record requests but never answer.
    pub fn spawn_silent() -> Self {
        Self::start(Mode::Silent, Arc::new(|_| Value::Null))
    }

    fn start(mode: Mode, handler: Handler) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let scheme = format!("cv40fake{}n{id}", std::process::id());
        let path = socket_path(&scheme);
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        let state = Arc::new(State::default());

        let accept_state = state.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                let handler = handler.clone();
                std::thread::spawn(move || serve(stream, mode, &state, &handler));
            }
        });

        Self {
            scheme,
            path,
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}:{path}", self.scheme)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.state.requests.lock().clone()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Block until at least `n` requests arrived (5 s at most).
    pub fn wait_for_requests(&self, n: usize) -> Vec<Value> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.state.requests.lock().len() < n && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        self.requests()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn serve(stream: UnixStream, mode: Mode, state: &State, handler: &Handler) {
    let Ok(reader) = stream.try_clone() else { return };
    let mut writer = stream;
    let requests = serde_json::Deserializer::from_reader(BufReader::new(reader)).into_iter::<Value>();

    for (answered, request) in requests.enumerate() {
        let Ok(request) = request else { break };
        state.requests.lock().push(request.clone());
        if matches!(mode, Mode::Silent) {
            continue;
        }

        let mut line = serde_json::to_vec(&handler(&request)).unwrap();
        line.push(b'\n');
        if writer.write_all(&line).is_err() {
            break;
        }
        if matches!(mode, Mode::HangupAfter(n) if answered + 1 >= n) {
            break;
        }
    }
}
