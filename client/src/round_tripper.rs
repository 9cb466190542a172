//! Round-tripper – one connection, one JSON request, one JSON response.
//!
//! The connection is shared by every clone of a [`RoundTripper`] and torn
//! down when the last clone is dropped.  Calls on the shared connection are
//! serialized.

use std::fmt;
use std::io::{BufReader, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::{self, Conn, Interrupt, Location};

/// Request method of the wire envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful outcome of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Plain response body.
    Data(Value),
    /// The device created a resource and redirected to it.
    Created(String),
}

impl Reply {
    pub fn into_data(self) -> Result<Value> {
        match self {
            Self::Data(v) => Ok(v),
            Self::Created(location) => Err(Error::Protocol(format!(
                "unexpected redirect to {location}"
            ))),
        }
    }
}

#[derive(Serialize)]
struct Request<'a, B: ?Sized> {
    method: &'a str,
    url: &'a str,
    body: Option<&'a B>,
}

/// Interpret the `error`/`location` fields of a raw response.
pub fn classify(response: Value) -> Result<Reply> {
    let error = response
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match error {
        "" => Ok(Reply::Data(response)),
        "EOF" => Err(Error::Eof),
        "redirect" => match response.get("location").and_then(Value::as_str) {
            Some(location) if !location.is_empty() => Ok(Reply::Created(location.to_string())),
            _ => Err(Error::Protocol("redirect without location".into())),
        },
        "updating" => Err(Error::Busy),
        "closed" | "use of closed connection" => Err(Error::Closed),
        other => Err(Error::Remote(other.to_string())),
    }
}

struct Connection {
    reader: BufReader<Box<dyn Conn>>,
}

impl Connection {
    fn write_request<B: Serialize + ?Sized>(&mut self, request: &Request<'_, B>) -> Result<()> {
        let stream = self.reader.get_mut();
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');
        stream.write_all(&line)?;
        stream.flush()?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<Value> {
        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
        Value::deserialize(&mut de).map_err(|e| {
            if e.is_io() || e.is_eof() {
                Error::Transport(e.into())
            } else {
                Error::Json(e)
            }
        })
    }
}

#[derive(Default)]
struct Session {
    scheme: Option<String>,
    conn: Option<Connection>,
}

impl Session {
    fn reset(&mut self) {
        if self.conn.take().is_some() {
            debug!("Connection dropped ({})", self.scheme.as_deref().unwrap_or("-"));
        }
        self.scheme = None;
    }
}

#[derive(Default)]
struct Shared {
    session: Mutex<Session>,
    interrupt: Mutex<Option<Interrupt>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(scheme) = &self.session.get_mut().scheme {
            debug!("Closing {scheme} connection");
        }
    }
}

/// Shared handle on one device connection.
///
/// Cloning takes another reference on the same connection; dropping a clone
/// releases it.  The scheme is bound by the first call.
#[derive(Clone, Default)]
pub struct RoundTripper {
    shared: Arc<Shared>,
}

impl RoundTripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live handles on this connection.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Scheme this round-tripper is bound to, if any call happened yet.
    pub fn scheme(&self) -> Option<String> {
        self.shared.session.lock().scheme.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session.lock().conn.is_some()
    }

    /// Release this handle.  The connection closes with the last one.
    pub fn close(self) {}

    /// Shut down the socket so a call blocked in another thread fails.
    ///
    /// No effect on serial ports and named pipes.
    pub fn interrupt(&self) {
        if let Some(interrupt) = self.shared.interrupt.lock().as_ref() {
            interrupt.fire();
        }
    }

    /// Send one request and read one response.
    pub fn call<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Reply> {
        let mut session = self.shared.session.lock();

        let location = Location::parse(url)?;
        if let Some(bound) = &session.scheme {
            if *bound != location.scheme {
                return Err(Error::SchemeMismatch {
                    bound: bound.clone(),
                    requested: location.scheme,
                });
            }
        }

        if session.conn.is_none() {
            let dialed = transport::dial(&location)?;
            *self.shared.interrupt.lock() = dialed.interrupt;
            session.conn = Some(Connection {
                reader: BufReader::new(dialed.stream),
            });
            session.scheme = Some(location.scheme.clone());
        }

        let request = Request {
            method: method.as_str(),
            url,
            body,
        };
        let response = match session.conn.as_mut() {
            Some(conn) => conn
                .write_request(&request)
                .and_then(|()| conn.read_response()),
            None => Err(Error::Closed),
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!("{method} {url}: {e}");
                session.reset();
                self.shared.interrupt.lock().take();
                return Err(e);
            }
        };

        let reply = classify(response);
        if matches!(reply, Err(Error::Closed)) {
            session.reset();
            // The interrupt handle is a clone of the stream; the peer only
            // sees the close once both are gone.
            self.shared.interrupt.lock().take();
        }
        reply
    }
}
