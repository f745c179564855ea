//! Device-side types: the raw event shape a terminal connection yields, and
//! the normalization that turns one into a [`Punch`] the engine can consume.
//!
//! The terminal wire protocol itself is out of scope; this module only
//! owns the seam ([`DeviceEventSource`]) the Supervisor polls and the pure
//! normalization logic downstream of it.

use crate::domain::{EmployeeId, Punch};
use crate::errors::DeviceError;
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// A single event as handed back by a terminal's live event sequence,
/// before zero-padding/offset/fallback normalization.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub employee_id: String,
    pub timestamp: RawTimestamp,
    pub kind: Option<String>,
    pub status: Option<i64>,
}

/// A terminal may hand back an already-parsed datetime or a string that
/// still needs parsing, depending on the underlying client library.
#[derive(Debug, Clone)]
pub enum RawTimestamp {
    Parsed(NaiveDateTime),
    Text(String),
}

/// Pull-based source of terminal events for one device, racing a `select!`
/// against the shutdown signal in [`crate::supervisor`]. The ZKTeco TCP
/// framing itself lives outside this crate's scope; implementations wrap
/// whatever client yields these.
#[async_trait]
pub trait DeviceEventSource: Send {
    /// Connect (or reconnect) to the terminal. Bounded by a 10s connect
    /// timeout at the call site.
    async fn connect(&mut self) -> Result<(), DeviceError>;

    /// Block for the next event, or `None` on a heartbeat/keepalive that
    /// carries no attendance data. Returns `Err` on any transport fault,
    /// at which point the Supervisor closes the connection and reconnects.
    async fn next_event(&mut self) -> Result<Option<RawEvent>, DeviceError>;

    async fn close(&mut self);
}

/// TCP-level stub satisfying the [`DeviceEventSource`] contract.
///
/// The ZKTeco wire protocol is out of scope (§1) -- this establishes the
/// bounded TCP connection the Supervisor's 10s connect timeout wraps, then
/// blocks until the connection drops, yielding no events. Swap in the real
/// protocol client (the "library that yields a lazy sequence of attendance
/// events per device" the spec names as an external collaborator) behind
/// this same trait without touching [`crate::supervisor::Supervisor`].
pub struct TcpDeviceSource {
    addr: std::net::SocketAddr,
    stream: Option<tokio::net::TcpStream>,
}

impl TcpDeviceSource {
    pub fn new(addr: std::net::SocketAddr) -> Self {
        Self { addr, stream: None }
    }
}

#[async_trait]
impl DeviceEventSource for TcpDeviceSource {
    async fn connect(&mut self) -> Result<(), DeviceError> {
        let stream = tokio::net::TcpStream::connect(self.addr)
            .await
            .map_err(|e| DeviceError::Transport(e.into()))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<RawEvent>, DeviceError> {
        let stream = self.stream.as_mut().ok_or_else(|| {
            DeviceError::Transport(anyhow::anyhow!("next_event called before connect"))
        })?;
        let mut buf = [0u8; 1];
        match stream.readable().await {
            Ok(()) => match stream.try_read(&mut buf) {
                Ok(0) => Err(DeviceError::Transport(anyhow::anyhow!(
                    "terminal closed the connection"
                ))),
                Ok(_) => Ok(None), // raw framing not decoded here; see module docs.
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(DeviceError::Transport(e.into())),
            },
            Err(e) => Err(DeviceError::Transport(e.into())),
        }
    }

    async fn close(&mut self) {
        self.stream = None;
    }
}

/// Normalize a raw event into a [`Punch`], applying zero-padding, timestamp
/// parsing/offset, and the `now()` fallback for an unparseable timestamp
/// (§4.5). Returns `None` for a blank employee id (dropped silently, per §3).
pub fn normalize(
    event: RawEvent,
    device_ip: &str,
    tz_offset_hours: i64,
    now: impl FnOnce() -> NaiveDateTime,
) -> Option<Punch> {
    let employee_id = EmployeeId::normalize(&event.employee_id)?;
    let instant = match event.timestamp {
        RawTimestamp::Parsed(dt) => crate::clock::apply_offset(dt, tz_offset_hours),
        RawTimestamp::Text(ref raw) => match parse_timestamp(raw) {
            Some(dt) => crate::clock::apply_offset(dt, tz_offset_hours),
            None => {
                tracing::debug!(raw = %raw, "unparseable device timestamp, substituting now()");
                now()
            }
        },
    };
    Some(Punch {
        employee_id,
        device_ip: device_ip.to_owned(),
        instant,
        kind: event.kind,
        status: event.status,
    })
}

/// Accepts `YYYY-MM-DD HH:MM:SS` or ISO-8601; returns `None` if neither parses.
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| raw.parse::<chrono::DateTime<chrono::FixedOffset>>().ok().map(|dt| dt.naive_local()))
        .or_else(|| raw.parse::<NaiveDateTime>().ok())
}
