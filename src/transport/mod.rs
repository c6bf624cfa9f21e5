use crate::protocol::Message;

/// A bidirectional, message-oriented connection.
///
/// `recv` must be cancel safe: the server polls it inside `tokio::select!`
/// next to its outbound queue, and a cancelled `recv` may not lose data.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, msg: Message) -> anyhow::Result<()>;
    async fn recv(&mut self) -> anyhow::Result<Message>;
}

pub mod heartbeat;
pub mod in_memory;
pub mod tcp;

pub use heartbeat::HeartbeatTransport;
pub use in_memory::InMemoryTransport;
pub use tcp::TcpTransport;
