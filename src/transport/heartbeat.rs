use tokio::time::{sleep_until, Duration, Instant};

use crate::protocol::{Message, PROTOCOL_VERSION};
use crate::transport::Transport;

/// Client-side transport wrapper that answers server heartbeats and detects
/// a silent server.
///
/// The server sends `Heartbeat` on a fixed interval. This wrapper echoes each
/// one, never returns it to the caller, and fails `recv` once nothing at all
/// has arrived for `idle_timeout`.
pub struct HeartbeatTransport<T: Transport> {
    inner: T,
    idle_timeout: Duration,
    last_activity: Instant,
}

impl<T: Transport> HeartbeatTransport<T> {
    pub fn new(inner: T, idle_timeout: Duration) -> Self {
        Self {
            inner,
            idle_timeout,
            last_activity: Instant::now(),
        }
    }

    fn mark_activity(&mut self) {
        self.last_activity = Instant::now();
    }
}

#[async_trait::async_trait]
impl<T: Transport> Transport for HeartbeatTransport<T> {
    async fn send(&mut self, msg: Message) -> anyhow::Result<()> {
        self.inner.send(msg).await
    }

    async fn recv(&mut self) -> anyhow::Result<Message> {
        loop {
            let deadline = self.last_activity + self.idle_timeout;
            let msg = tokio::select! {
                msg = self.inner.recv() => msg?,
                _ = sleep_until(deadline) => {
                    log::warn!("no traffic from server for {:?}", self.idle_timeout);
                    return Err(anyhow::anyhow!(
                        "Connection idle timeout exceeded ({:?})",
                        self.idle_timeout
                    ));
                }
            };
            self.mark_activity();

            match msg {
                Message::Heartbeat { version } if version != PROTOCOL_VERSION => {
                    return Err(anyhow::anyhow!(
                        "Heartbeat version mismatch: expected {}, got {}",
                        PROTOCOL_VERSION,
                        version
                    ));
                }
                Message::Heartbeat { .. } => {
                    self.inner
                        .send(Message::Heartbeat {
                            version: PROTOCOL_VERSION,
                        })
                        .await?;
                }
                other => return Ok(other),
            }
        }
    }
}
