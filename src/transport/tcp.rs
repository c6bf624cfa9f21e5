use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{timeout, Duration};

use crate::protocol::Message;
use crate::transport::Transport;

/// Default timeout for writing one frame.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum frame payload (1 MB); larger length prefixes are rejected before
/// any allocation.
pub const MAX_MESSAGE_SIZE: u32 = 1_000_000;

const LEN_PREFIX: usize = 4;

/// Length-prefixed bincode frames over a TCP stream.
///
/// Each frame is a 4-byte big-endian payload length followed by the
/// payload. Zero-length frames and frames above `max_message_size` are
/// protocol violations.
pub struct TcpTransport {
    stream: TcpStream,
    /// Bytes read from the socket but not yet decoded.
    read_buf: Vec<u8>,
    write_timeout: Duration,
    max_message_size: u32,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_config(stream, DEFAULT_WRITE_TIMEOUT, MAX_MESSAGE_SIZE)
    }

    pub fn with_config(stream: TcpStream, write_timeout: Duration, max_message_size: u32) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("could not set TCP_NODELAY: {}", e);
        }
        Self {
            stream,
            read_buf: Vec::new(),
            write_timeout,
            max_message_size,
        }
    }

    pub async fn connect<A: ToSocketAddrs>(addr: A) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    /// Pop one complete frame off the read buffer, if there is one.
    fn take_frame(&mut self) -> anyhow::Result<Option<Message>> {
        if self.read_buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&self.read_buf[..LEN_PREFIX]);
        let len = u32::from_be_bytes(len_bytes);
        if len == 0 {
            return Err(anyhow::anyhow!("Invalid message length: 0"));
        }
        if len > self.max_message_size {
            return Err(anyhow::anyhow!(
                "Message too large: {} bytes (max: {})",
                len,
                self.max_message_size
            ));
        }
        let end = LEN_PREFIX + len as usize;
        if self.read_buf.len() < end {
            return Ok(None);
        }
        let msg = bincode::deserialize(&self.read_buf[LEN_PREFIX..end])
            .map_err(|e| anyhow::anyhow!("Deserialization error: {}", e));
        self.read_buf.drain(..end);
        msg.map(Some)
    }
}

fn closed_or(e: std::io::Error, what: &str) -> anyhow::Error {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset => anyhow::anyhow!("Connection closed by peer"),
        _ => anyhow::anyhow!("{} error: {}", what, e),
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, msg: Message) -> anyhow::Result<()> {
        let data =
            bincode::serialize(&msg).map_err(|e| anyhow::anyhow!("Serialization error: {}", e))?;
        if data.is_empty() || data.len() > self.max_message_size as usize {
            return Err(anyhow::anyhow!(
                "Message too large: {} bytes (max: {})",
                data.len(),
                self.max_message_size
            ));
        }
        let mut frame = Vec::with_capacity(LEN_PREFIX + data.len());
        frame.extend_from_slice(&(data.len() as u32).to_be_bytes());
        frame.extend_from_slice(&data);

        timeout(self.write_timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| anyhow::anyhow!("Send timeout after {:?}", self.write_timeout))?
            .map_err(|e| closed_or(e, "Write"))
    }

    async fn recv(&mut self) -> anyhow::Result<Message> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(msg) = self.take_frame()? {
                return Ok(msg);
            }
            // `read` is cancel safe; bytes only move into `read_buf` once it returns.
            let n = self
                .stream
                .read(&mut chunk)
                .await
                .map_err(|e| closed_or(e, "Read"))?;
            if n == 0 {
                return Err(anyhow::anyhow!("Connection closed by peer"));
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }
}
