//! Logging mode and its UDP control plane.
//!
//! The mode lives in a single [`ModeFlag`] (an atomic byte). The
//! [`ModeController`] is its only writer; the sampler and both loggers read it
//! and detect transitions themselves by comparing against the last value they saw.
//!
//! Control grammar (ASCII, one command per datagram):
//!
//! | payload                  | effect                                          |
//! |--------------------------|-------------------------------------------------|
//! | `STATUS` (any case)      | reply `CURRENT_MODE:32Hz` / `CURRENT_MODE:1Hz`  |
//! | decimal number `v`       | `v > 0` selects high frequency, else standard   |
//! | anything else            | ignored                                         |

use crate::error::AppResult;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Logging mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// 1 Hz averaged output
    #[default]
    Standard,
    /// 32 Hz raw output
    HighFrequency,
}

impl Mode {
    /// Rate label used in status replies.
    pub fn rate_label(self) -> &'static str {
        match self {
            Mode::Standard => "1Hz",
            Mode::HighFrequency => "32Hz",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Mode::Standard => 0,
            Mode::HighFrequency => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        if raw == 0 {
            Mode::Standard
        } else {
            Mode::HighFrequency
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Standard => write!(f, "STANDARD (1 Hz)"),
            Mode::HighFrequency => write!(f, "HIGH FREQUENCY (32 Hz)"),
        }
    }
}

/// Shared, atomically replaced mode value.
#[derive(Debug, Clone, Default)]
pub struct ModeFlag {
    inner: Arc<AtomicU8>,
}

impl ModeFlag {
    /// Flag starting in `mode`.
    pub fn new(mode: Mode) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(mode.to_u8())),
        }
    }

    /// Current mode.
    pub fn get(&self) -> Mode {
        Mode::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Replace the mode, returning the previous one.
    pub fn replace(&self, mode: Mode) -> Mode {
        Mode::from_u8(self.inner.swap(mode.to_u8(), Ordering::AcqRel))
    }
}

/// A parsed control datagram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    /// Report the current mode.
    Status,
    /// Switch to the given mode.
    SetMode(Mode),
}

impl ControlCommand {
    /// Parse a datagram payload; `None` means ignore it.
    pub fn parse(payload: &str) -> Option<Self> {
        let payload = payload.trim();
        if payload.eq_ignore_ascii_case("STATUS") {
            return Some(ControlCommand::Status);
        }
        let value: f64 = payload.parse().ok()?;
        if value.is_nan() {
            return None;
        }
        Some(ControlCommand::SetMode(if value > 0.0 {
            Mode::HighFrequency
        } else {
            Mode::Standard
        }))
    }
}

/// Status reply payload for `mode`.
pub fn status_reply(mode: Mode) -> String {
    format!("CURRENT_MODE:{}", mode.rate_label())
}

/// Result of one [`ModeController::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// Nothing arrived within the poll timeout.
    Idle,
    /// A STATUS request was answered.
    StatusReplied(Mode),
    /// The mode changed.
    Transition {
        /// Mode before the command
        from: Mode,
        /// Mode after the command
        to: Mode,
    },
    /// A mode-set command repeated the current mode.
    Unchanged(Mode),
    /// Payload was not understood.
    Ignored(String),
}

/// Owns the control socket and is the only writer of the [`ModeFlag`].
pub struct ModeController {
    socket: UdpSocket,
    mode: ModeFlag,
    status_addr: SocketAddr,
    poll_timeout: Duration,
}

impl ModeController {
    /// Bind the control socket on `control_addr`.
    pub async fn bind(
        control_addr: SocketAddr,
        status_addr: SocketAddr,
        mode: ModeFlag,
        poll_timeout: Duration,
    ) -> AppResult<Self> {
        let socket = UdpSocket::bind(control_addr).await?;
        info!(addr = %socket.local_addr()?, "control socket listening");
        Ok(Self {
            socket,
            mode,
            status_addr,
            poll_timeout,
        })
    }

    /// Actual bound control address.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Shared mode flag.
    pub fn mode(&self) -> &ModeFlag {
        &self.mode
    }

    /// Wait up to the poll timeout for one datagram and act on it.
    pub async fn poll(&self) -> AppResult<ControlEvent> {
        let mut buf = [0u8; 4096];
        let (len, peer) =
            match tokio::time::timeout(self.poll_timeout, self.socket.recv_from(&mut buf)).await {
                Err(_) => return Ok(ControlEvent::Idle),
                Ok(result) => result?,
            };
        let payload = String::from_utf8_lossy(&buf[..len]);
        debug!(%peer, payload = %payload.trim(), "control datagram");
        Ok(self.handle(&payload).await)
    }

    /// Apply one payload.
    pub async fn handle(&self, payload: &str) -> ControlEvent {
        match ControlCommand::parse(payload) {
            Some(ControlCommand::Status) => {
                let mode = self.mode.get();
                if let Err(e) = self.send_status(mode).await {
                    warn!(error = %e, "failed to send status reply");
                }
                ControlEvent::StatusReplied(mode)
            }
            Some(ControlCommand::SetMode(to)) => {
                let from = self.mode.replace(to);
                if from == to {
                    debug!(mode = %to, "mode already active");
                    ControlEvent::Unchanged(to)
                } else {
                    info!(%from, %to, "MODE CHANGE");
                    ControlEvent::Transition { from, to }
                }
            }
            None => {
                warn!(payload = %payload.trim(), "ignoring unrecognised control datagram");
                ControlEvent::Ignored(payload.trim().to_string())
            }
        }
    }

    async fn send_status(&self, mode: Mode) -> AppResult<()> {
        let bind: SocketAddr = if self.status_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let reply = status_reply(mode);
        let socket = UdpSocket::bind(bind).await?;
        socket.send_to(reply.as_bytes(), self.status_addr).await?;
        info!(reply = %reply, to = %self.status_addr, "status request answered");
        Ok(())
    }

    /// Poll until the exit signal is raised.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        info!("mode controller started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = self.poll() => {
                    if let Err(e) = event {
                        warn!(error = %e, "control socket receive failed");
                        tokio::time::sleep(self.poll_timeout).await;
                    }
                }
            }
        }
        info!("mode controller stopped");
        Ok(())
    }
}
