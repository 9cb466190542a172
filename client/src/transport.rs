//! Transport dialer – turns a device URL into a duplex byte stream.
//!
//! | scheme  | stream                                                  |
//! |---------|---------------------------------------------------------|
//! | `uart`  | serial port, `uart://<port>[:<baud>]`                   |
//! | `tcp`   | TCP socket, `tcp://<host>:<port>`                       |
//! | other   | local channel named after the scheme: a Unix socket in  |
//! |         | the temp dir, or `\\.\pipe\<scheme>` on Windows         |

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

const DEFAULT_BAUD: u32 = 115_200;
const UART_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte stream carrying the JSON envelopes.
pub trait Conn: Read + Write + Send {}

impl<T: Read + Write + Send> Conn for T {}

// ── Location ─────────────────────────────────────────────────────────────

/// A parsed device URL: `scheme:path` or `scheme://authority/path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub scheme: String,
    /// `host[:port]` exactly as written, empty when absent.
    pub authority: String,
    pub host: String,
    pub port: Option<String>,
    pub path: String,
}

impl Location {
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once(':')
            .ok_or_else(|| Error::invalid_url(url, "url scheme not found"))?;
        if !valid_scheme(scheme) {
            return Err(Error::invalid_url(url, "url scheme not found"));
        }

        let (authority, path) = match rest.strip_prefix("//") {
            Some(after) => match after.find('/') {
                Some(i) => (&after[..i], &after[i..]),
                None => (after, ""),
            },
            None => ("", rest),
        };
        let path = path.split(['?', '#']).next().unwrap_or_default();
        if path.is_empty() {
            return Err(Error::invalid_url(url, "url path not found"));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !p.contains(']') => (h, Some(p.to_string())),
            _ => (authority, None),
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            authority: authority.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

fn valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

// ── Dial ─────────────────────────────────────────────────────────────────

/// A freshly opened stream plus, for sockets, a second handle that can
/// shut the stream down while a call is blocked on it.
pub(crate) struct Dialed {
    pub stream: Box<dyn Conn>,
    pub interrupt: Option<Interrupt>,
}

pub(crate) enum Interrupt {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Interrupt {
    pub fn fire(&self) {
        let result = match self {
            Self::Tcp(s) => s.shutdown(Shutdown::Both),
            #[cfg(unix)]
            Self::Unix(s) => s.shutdown(Shutdown::Both),
        };
        if let Err(e) = result {
            debug!("Interrupt: shutdown failed: {e}");
        }
    }
}

/// Open the stream selected by the location's scheme.
pub(crate) fn dial(location: &Location) -> io::Result<Dialed> {
    let dialed = match location.scheme.as_str() {
        "uart" => dial_uart(location)?,
        "tcp" => dial_tcp(location)?,
        _ => dial_local(location)?,
    };
    debug!("Dialed {}://{}", location.scheme, location.authority);
    Ok(dialed)
}

fn dial_uart(location: &Location) -> io::Result<Dialed> {
    let baud = match &location.port {
        Some(p) => p.parse::<u32>().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid baudrate: {p} {e}"))
        })?,
        None => DEFAULT_BAUD,
    };
    let name = uart_device(&location.host);
    let port = serialport::new(&name, baud)
        .timeout(UART_TIMEOUT)
        .open()
        .map_err(|e| io::Error::other(format!("uart error: {name} {baud}: {e}")))?;

    Ok(Dialed {
        stream: Box::new(port),
        interrupt: None,
    })
}

#[cfg(windows)]
fn uart_device(port: &str) -> String {
    format!("COM{port}")
}

#[cfg(not(windows))]
fn uart_device(port: &str) -> String {
    format!("/dev/tty{port}")
}

fn dial_tcp(location: &Location) -> io::Result<Dialed> {
    let stream = TcpStream::connect(location.authority.as_str())?;
    stream.set_nodelay(true)?;
    let interrupt = stream.try_clone().ok().map(Interrupt::Tcp);
    Ok(Dialed {
        stream: Box::new(stream),
        interrupt,
    })
}

/// Path of the Unix socket serving `scheme`.
pub fn socket_path(scheme: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{scheme}.sock"))
}

#[cfg(unix)]
fn dial_local(location: &Location) -> io::Result<Dialed> {
    let path = socket_path(&location.scheme);
    let stream = UnixStream::connect(&path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
    let interrupt = stream.try_clone().ok().map(Interrupt::Unix);
    Ok(Dialed {
        stream: Box::new(stream),
        interrupt,
    })
}

#[cfg(windows)]
fn dial_local(location: &Location) -> io::Result<Dialed> {
    match location.host.as_str() {
        "pipe" | "" => {
            let name = format!(r"\\.\pipe\{}", location.scheme);
            let pipe = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&name)
                .map_err(|e| io::Error::new(e.kind(), format!("{name}: {e}")))?;
            Ok(Dialed {
                stream: Box::new(pipe),
                interrupt: None,
            })
        }
        "unix" => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix domain sockets are not available on this platform",
        )),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown port: {other}"),
        )),
    }
}

#[cfg(not(any(unix, windows)))]
fn dial_local(_location: &Location) -> io::Result<Dialed> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no local channel on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path_only() {
        let loc = Location::parse("cv40:/0/camera/0").unwrap();
        assert_eq!(loc.scheme, "cv40");
        assert_eq!(loc.authority, "");
        assert_eq!(loc.path, "/0/camera/0");
    }

    #[test]
    fn test_parse_authority() {
        let loc = Location::parse("tcp://10.0.0.2:9000/0/camera/0/file").unwrap();
        assert_eq!(loc.scheme, "tcp");
        assert_eq!(loc.authority, "10.0.0.2:9000");
        assert_eq!(loc.host, "10.0.0.2");
        assert_eq!(loc.port.as_deref(), Some("9000"));
        assert_eq!(loc.path, "/0/camera/0/file");

        let loc = Location::parse("uart://USB0:921600/0").unwrap();
        assert_eq!(loc.host, "USB0");
        assert_eq!(loc.port.as_deref(), Some("921600"));

        let loc = Location::parse("cv40://pipe/0").unwrap();
        assert_eq!(loc.host, "pipe");
        assert_eq!(loc.port, None);
    }

    #[test]
    fn test_parse_rejects_missing_parts() {
        for url in ["", "/0/camera/0", ":/0", "9x:/0", "cv40:", "tcp://host:1", "tcp://host:1?x=1"] {
            assert!(
                matches!(Location::parse(url), Err(Error::InvalidUrl { .. })),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_uart_bad_baudrate() {
        let loc = Location::parse("uart://S0:fast/0").unwrap();
        let err = dial(&loc).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[test]
    fn test_dial_unix_socket() {
        use std::os::unix::net::UnixListener;

        let scheme = format!("cv40dial{}", std::process::id());
        let path = socket_path(&scheme);
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let loc = Location::parse(&format!("{scheme}:/0")).unwrap();
        let mut dialed = dial(&loc).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        dialed.stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert!(dialed.interrupt.is_some());

        std::fs::remove_file(&path).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_dial_missing_socket() {
        let loc = Location::parse("cv40nosuchdevice:/0").unwrap();
        assert!(dial(&loc).is_err());
    }
}
