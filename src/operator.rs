//! Operator-side control client.
//!
//! Backs the `wx_daq mode` and `wx_daq status` commands. Mode commands are
//! fire-and-forget and sent several times; the station treats repeats of the
//! current mode as no-ops.

use crate::config::Settings;
use crate::error::{AppResult, DaqError};
use crate::mode::Mode;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// How often a mode command is repeated by default.
pub const DEFAULT_REPEATS: u32 = 3;

/// Pause between repeated mode commands.
pub const DEFAULT_SPACING: Duration = Duration::from_millis(100);

/// How long `status` waits for a reply by default.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(1);

/// Control datagram selecting `mode`.
pub fn mode_payload(mode: Mode) -> &'static str {
    match mode {
        Mode::HighFrequency => "1",
        Mode::Standard => "0",
    }
}

/// Parse a `CURRENT_MODE:<rate>` reply.
pub fn parse_status_reply(reply: &str) -> Option<Mode> {
    match reply.trim().strip_prefix("CURRENT_MODE:")? {
        "32Hz" => Some(Mode::HighFrequency),
        "1Hz" => Some(Mode::Standard),
        _ => None,
    }
}

fn unspecified_for(addr: SocketAddr) -> SocketAddr {
    if addr.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    }
}

/// Client for a running station's control port.
#[derive(Debug, Clone, Copy)]
pub struct OperatorClient {
    control_addr: SocketAddr,
    status_addr: SocketAddr,
}

impl OperatorClient {
    /// Client for explicit addresses.
    pub fn new(control_addr: SocketAddr, status_addr: SocketAddr) -> Self {
        Self {
            control_addr,
            status_addr,
        }
    }

    /// Client for the addresses in `settings`.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        Ok(Self::new(settings.control_addr()?, settings.status_addr()?))
    }

    /// Send the mode command `repeats` times, `spacing` apart.
    pub async fn set_mode(&self, mode: Mode, repeats: u32, spacing: Duration) -> AppResult<()> {
        let socket = UdpSocket::bind(unspecified_for(self.control_addr)).await?;
        let payload = mode_payload(mode);
        for i in 0..repeats.max(1) {
            if i > 0 {
                tokio::time::sleep(spacing).await;
            }
            socket.send_to(payload.as_bytes(), self.control_addr).await?;
            debug!(attempt = i + 1, payload, to = %self.control_addr, "mode command sent");
        }
        info!(mode = %mode, to = %self.control_addr, "mode command sent");
        Ok(())
    }

    /// Listen on the status port and ask the station for its mode.
    pub async fn query_status(&self, timeout: Duration) -> AppResult<Mode> {
        let listener = UdpSocket::bind(self.status_addr).await?;
        request_status(&listener, self.control_addr, timeout).await
    }
}

/// Send `STATUS` to `control_addr` and wait on `listener` for the reply.
pub async fn request_status(
    listener: &UdpSocket,
    control_addr: SocketAddr,
    timeout: Duration,
) -> AppResult<Mode> {
    let sender = UdpSocket::bind(unspecified_for(control_addr)).await?;
    sender.send_to(b"STATUS", control_addr).await?;

    let mut buf = [0u8; 256];
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let (len, peer) = tokio::time::timeout_at(deadline, listener.recv_from(&mut buf))
            .await
            .map_err(|_| {
                DaqError::Network(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no status reply within {}ms", timeout.as_millis()),
                ))
            })??;
        let reply = String::from_utf8_lossy(&buf[..len]);
        match parse_status_reply(&reply) {
            Some(mode) => return Ok(mode),
            None => debug!(%peer, reply = %reply.trim(), "ignoring unexpected datagram on status port"),
        }
    }
}
