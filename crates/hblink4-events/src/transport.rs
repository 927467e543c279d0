//! Wire transports for the event sink (§6 dashboard config): a connected
//! Unix datagram socket (one write per event) or a TCP stream
//! (newline-delimited JSON).

use async_trait::async_trait;
use hblink4_config::{DashboardConfig, DashboardTransport};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UnixDatagram};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dashboard.unix_socket is required for a unix transport")]
    MissingUnixSocket,
    #[error("dashboard.host_ipv4/host_ipv6 and port are required for a tcp transport")]
    MissingTcpAddress,
    #[error("failed to connect event transport: {0}")]
    Connect(#[source] std::io::Error),
}

#[async_trait]
pub trait EventTransport: Send {
    /// Best-effort write of one encoded event. Errors are the caller's to
    /// log and suppress (§7 "Resource errors"); the transport never blocks
    /// the caller indefinitely.
    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()>;
}

pub struct UnixDatagramTransport {
    socket: UnixDatagram,
}

#[async_trait]
impl EventTransport for UnixDatagramTransport {
    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.socket.send(bytes).await.map(|_| ())
    }
}

pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl EventTransport for TcpTransport {
    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.write_all(b"\n").await
    }
}

pub async fn connect(config: &DashboardConfig) -> Result<Box<dyn EventTransport>, TransportError> {
    match config.transport {
        DashboardTransport::Unix => {
            let path = config.unix_socket.as_ref().ok_or(TransportError::MissingUnixSocket)?;
            let bind_path = format!("{path}.client");
            let _ = std::fs::remove_file(&bind_path);
            let socket = UnixDatagram::bind(&bind_path).map_err(TransportError::Connect)?;
            socket.connect(path).map_err(TransportError::Connect)?;
            Ok(Box::new(UnixDatagramTransport { socket }))
        }
        DashboardTransport::Tcp => {
            let host = config
                .host_ipv4
                .as_ref()
                .or(config.host_ipv6.as_ref())
                .ok_or(TransportError::MissingTcpAddress)?;
            let port = config.port.ok_or(TransportError::MissingTcpAddress)?;
            let stream = TcpStream::connect((host.as_str(), port)).await.map_err(TransportError::Connect)?;
            Ok(Box::new(TcpTransport { stream }))
        }
    }
}
