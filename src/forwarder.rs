//! Live visualization feed.
//!
//! Drains the visualization queue at no more than one message per
//! `viz_min_interval_ms` and sends each sample as a JSON datagram to the
//! configured peer (unicast or broadcast). Nothing is persisted and nothing is
//! retried; a failed send is logged and the loop moves on.

use crate::calibration::ProcessedSample;
use crate::config::Settings;
use crate::error::AppResult;
use crate::queue::BoundedQueue;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval between send-rate reports.
pub const RATE_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Idle sleep when the queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Timestamp format of the feed (ISO 8601, local time, microseconds).
pub const VIZ_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One datagram of the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VizMessage {
    /// Capture time
    pub timestamp: String,
    /// Wind U component (m/s)
    pub u_m_s: f64,
    /// Wind V component (m/s)
    pub v_m_s: f64,
    /// Wind W component (m/s)
    pub w_m_s: f64,
    /// Horizontal speed (m/s)
    pub speed_2d: f64,
    /// 3-D speed (m/s)
    pub speed_3d: f64,
    /// Azimuth (deg)
    pub azimuth: f64,
    /// Elevation (deg)
    pub elevation: f64,
    /// Pressure (Pa)
    pub pressure: f64,
    /// Temperature (C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Sonic temperature (C)
    pub sonic_temp: f64,
    /// Error count
    pub error: f64,
}

impl From<&ProcessedSample> for VizMessage {
    fn from(s: &ProcessedSample) -> Self {
        Self {
            timestamp: s.captured_at.format(VIZ_TIMESTAMP_FORMAT).to_string(),
            u_m_s: s.u,
            v_m_s: s.v,
            w_m_s: s.w,
            speed_2d: s.speed_2d,
            speed_3d: s.speed_3d,
            azimuth: s.azimuth,
            elevation: s.elevation,
            pressure: s.pressure,
            temperature: s.temperature,
            humidity: s.humidity,
            sonic_temp: s.sonic_temp,
            error: s.error,
        }
    }
}

impl VizMessage {
    /// Compact JSON encoding.
    pub fn encode(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Outcome of one [`VisualizationForwarder::forward_once`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardPoll {
    /// A sample was taken off the queue and handed to the socket.
    Sent,
    /// Nothing queued.
    Empty,
    /// Rate limit not yet elapsed; retry at the given instant.
    Throttled(Instant),
}

/// Rate-limited UDP sender.
pub struct VisualizationForwarder {
    queue: BoundedQueue<ProcessedSample>,
    socket: UdpSocket,
    peer: SocketAddr,
    min_interval: Duration,
    last_send: Option<Instant>,
    sent: u64,
    failures: u64,
}

impl VisualizationForwarder {
    /// Bind an ephemeral socket for sending to the configured peer.
    pub async fn bind(
        queue: BoundedQueue<ProcessedSample>,
        settings: &Settings,
    ) -> AppResult<Self> {
        let peer = settings.viz_addr()?;
        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(local).await?;
        if settings.network.viz_broadcast {
            socket.set_broadcast(true)?;
            info!("UDP broadcast mode enabled");
        }
        info!(peer = %peer, "visualization forwarder initialized");
        Ok(Self {
            queue,
            socket,
            peer,
            min_interval: Duration::from_millis(settings.network.viz_min_interval_ms),
            last_send: None,
            sent: 0,
            failures: 0,
        })
    }

    /// Datagrams sent.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Send at most one queued sample if the rate limit allows.
    pub async fn forward_once(&mut self, now: Instant) -> ForwardPoll {
        if let Some(last) = self.last_send {
            let due = last + self.min_interval;
            if now < due {
                return ForwardPoll::Throttled(due);
            }
        }
        let Some(sample) = self.queue.try_pop() else {
            return ForwardPoll::Empty;
        };
        self.last_send = Some(now);
        match self.send(&VizMessage::from(&sample)).await {
            Ok(()) => self.sent += 1,
            Err(e) => {
                self.failures += 1;
                warn!(error = %e, peer = %self.peer, "visualization send failed");
            }
        }
        ForwardPoll::Sent
    }

    async fn send(&self, message: &VizMessage) -> AppResult<()> {
        let bytes = message.encode()?;
        self.socket.send_to(&bytes, self.peer).await?;
        debug!(bytes = bytes.len(), "visualization datagram sent");
        Ok(())
    }

    /// Forward until the exit signal is raised.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        info!(
            peer = %self.peer,
            min_interval_ms = self.min_interval.as_millis() as u64,
            "visualization forwarder started"
        );
        let mut window_start = Instant::now();
        let mut window_sent = self.sent;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let now = Instant::now();
            let wake = match self.forward_once(now).await {
                ForwardPoll::Sent => now + self.min_interval,
                ForwardPoll::Empty => now + IDLE_POLL,
                ForwardPoll::Throttled(due) => due,
            };

            let elapsed = now.duration_since(window_start);
            if elapsed >= RATE_LOG_INTERVAL {
                let packets = self.sent - window_sent;
                info!(
                    rate_hz = packets as f64 / elapsed.as_secs_f64(),
                    packets,
                    "current send rate"
                );
                window_start = now;
                window_sent = self.sent;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
        info!(sent = self.sent, failures = self.failures, "visualization forwarder stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::MEASUREMENT_COUNT;
    use chrono::Local;

    fn sample(u: f64) -> ProcessedSample {
        let mut m = [0.5; MEASUREMENT_COUNT];
        m[0] = u;
        ProcessedSample::from_measurements(Local::now(), m, 3.0)
    }

    async fn forwarder_to(
        peer: SocketAddr,
        queue: BoundedQueue<ProcessedSample>,
    ) -> VisualizationForwarder {
        let mut settings = Settings::default();
        settings.network.viz_ip = peer.ip().to_string();
        settings.network.viz_port = peer.port();
        VisualizationForwarder::bind(queue, &settings).await.unwrap()
    }

    #[test]
    fn test_message_keys() {
        let json: serde_json::Value =
            serde_json::from_slice(&VizMessage::from(&sample(1.25)).encode().unwrap()).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "timestamp", "u_m_s", "v_m_s", "w_m_s", "speed_2d", "speed_3d", "azimuth",
            "elevation", "pressure", "temperature", "humidity", "sonic_temp", "error",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(obj.len(), 13);
        assert_eq!(json["u_m_s"], 1.25);
        assert_eq!(json["error"], 3.0);
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn test_forward_once_sends_json_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let queue = BoundedQueue::new("visualization", 10);
        let mut fwd = forwarder_to(receiver.local_addr().unwrap(), queue.clone()).await;

        assert_eq!(fwd.forward_once(Instant::now()).await, ForwardPoll::Empty);
        queue.try_push(sample(2.0)).unwrap();
        assert_eq!(fwd.forward_once(Instant::now()).await, ForwardPoll::Sent);

        let mut buf = [0u8; 2048];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let msg: VizMessage = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(msg.u_m_s, 2.0);
        assert_eq!(fwd.sent(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let queue = BoundedQueue::new("visualization", 10);
        let mut fwd = forwarder_to(receiver.local_addr().unwrap(), queue.clone()).await;
        queue.try_push(sample(1.0)).unwrap();
        queue.try_push(sample(2.0)).unwrap();

        let t0 = Instant::now();
        assert_eq!(fwd.forward_once(t0).await, ForwardPoll::Sent);
        assert_eq!(
            fwd.forward_once(t0 + Duration::from_millis(50)).await,
            ForwardPoll::Throttled(t0 + Duration::from_millis(100))
        );
        assert_eq!(fwd.forward_once(t0 + Duration::from_millis(100)).await, ForwardPoll::Sent);
        assert!(queue.is_empty());
    }
}
