//! TCP transport implementation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::error::{Result, TransportError};
use crate::message::ControlMessage;
use crate::protocol::{Frame, FrameHeader, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// TCP transport configuration
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whether to enable TCP_NODELAY (disable Nagle's algorithm).
    pub nodelay: bool,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            nodelay: true,
        }
    }
}

/// TCP transport: creates connections
#[derive(Debug, Clone)]
pub struct TcpTransport {
    config: TcpTransportConfig,
}

impl TcpTransport {
    /// Creates a new TCP transport with the given configuration.
    pub fn new(config: TcpTransportConfig) -> Self {
        Self { config }
    }

    /// Establishes a TCP connection to the specified address.
    pub async fn connect(&self, addr: &str) -> Result<TcpConnection> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectionTimeout {
                addr: addr.to_string(),
                timeout_ms: self.config.connect_timeout_ms,
            })?
            .map_err(TransportError::IoError)?;
        if self.config.nodelay {
            stream.set_nodelay(true).map_err(TransportError::IoError)?;
        }
        tracing::debug!(addr = addr, "TCP connected");
        TcpConnection::from_stream(stream)
    }

    /// Binds to the specified address and returns a listener for incoming connections.
    pub async fn listen(&self, addr: &str) -> Result<tokio::net::TcpListener> {
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(TransportError::IoError)
    }

    /// Accepts an incoming TCP connection from the listener.
    pub async fn accept(&self, listener: &tokio::net::TcpListener) -> Result<TcpConnection> {
        let (stream, _) = listener.accept().await.map_err(TransportError::IoError)?;
        if self.config.nodelay {
            stream.set_nodelay(true).map_err(TransportError::IoError)?;
        }
        TcpConnection::from_stream(stream)
    }
}

/// A single TCP connection with concurrent read/write support
pub struct TcpConnection {
    read: Mutex<OwnedReadHalf>,
    write: Mutex<OwnedWriteHalf>,
    next_request_id: AtomicU64,
    peer_addr: String,
    local_addr: String,
}

impl TcpConnection {
    /// Wraps an already connected stream.
    pub fn from_stream(stream: tokio::net::TcpStream) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let local_addr = stream
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let (read, write) = stream.into_split();
        Ok(Self {
            read: Mutex::new(read),
            write: Mutex::new(write),
            next_request_id: AtomicU64::new(1),
            peer_addr,
            local_addr,
        })
    }

    /// Sends a frame over the TCP connection.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let encoded = frame.encode();
        let mut write = self.write.lock().await;
        write.write_all(&encoded).await.map_err(TransportError::IoError)?;
        write.flush().await.map_err(TransportError::IoError)?;
        Ok(())
    }

    /// Receives a frame from the TCP connection.
    ///
    /// A clean close before the first header byte surfaces as
    /// [`TransportError::ConnectionReset`].
    pub async fn recv_frame(&self) -> Result<Frame> {
        let mut read = self.read.lock().await;
        let mut header_buf = [0u8; FRAME_HEADER_SIZE];
        read.read_exact(&mut header_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::ConnectionReset
            } else {
                TransportError::IoError(e)
            }
        })?;
        let header = FrameHeader::decode(&header_buf)?;
        if header.payload_length > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: header.payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        let mut payload = vec![0u8; header.payload_length as usize];
        if !payload.is_empty() {
            read.read_exact(&mut payload)
                .await
                .map_err(TransportError::IoError)?;
        }
        let frame = Frame { header, payload };
        frame.validate()?;
        Ok(frame)
    }

    /// Sends `msg` as a request and waits up to `timeout` for its response.
    pub async fn call(&self, msg: &ControlMessage, timeout: Duration) -> Result<ControlMessage> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let frame = msg.to_frame(request_id)?;
        self.send_frame(&frame).await?;

        let response = tokio::time::timeout(timeout, self.recv_frame())
            .await
            .map_err(|_| TransportError::RequestTimeout {
                request_id,
                timeout_ms: timeout.as_millis() as u64,
            })??;
        if !response.is_response() || response.request_id() != request_id {
            return Err(TransportError::UnexpectedResponse(
                response.opcode().as_u16(),
            ));
        }
        ControlMessage::from_frame(&response)
    }

    /// Sends `msg` without waiting for, or expecting, any reply.
    pub async fn notify(&self, msg: &ControlMessage) -> Result<()> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.send_frame(&msg.to_one_way_frame(request_id)?).await
    }

    /// Returns the remote peer address of this TCP connection as a string.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Returns the local address of this TCP connection as a string.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Heartbeat;
    use crate::protocol::Opcode;

    #[tokio::test]
    async fn test_send_recv_frame() {
        let transport = TcpTransport::new(TcpTransportConfig::default());
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let conn = transport.accept(&listener).await.unwrap();
            let frame = conn.recv_frame().await.unwrap();
            assert_eq!(frame.opcode(), Opcode::Heartbeat);
            let response = frame.make_response(Opcode::Ack, Vec::new());
            conn.send_frame(&response).await.unwrap();
        });

        let client_transport = TcpTransport::new(TcpTransportConfig::default());
        let conn = client_transport.connect(&addr).await.unwrap();
        let frame = Frame::new(Opcode::Heartbeat, 1, b"ping".to_vec());
        conn.send_frame(&frame).await.unwrap();
        let response = conn.recv_frame().await.unwrap();
        assert!(response.is_response());
        assert_eq!(response.opcode(), Opcode::Ack);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_call_returns_decoded_reply() {
        let transport = TcpTransport::new(TcpTransportConfig::default());
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let conn = transport.accept(&listener).await.unwrap();
            let frame = conn.recv_frame().await.unwrap();
            let reply = ControlMessage::Ack.to_response(&frame).unwrap();
            conn.send_frame(&reply).await.unwrap();
        });

        let conn = TcpTransport::new(TcpTransportConfig::default())
            .connect(&addr)
            .await
            .unwrap();
        let msg = ControlMessage::Heartbeat(Heartbeat {
            node_id: "N1".to_string(),
        });
        let reply = conn.call(&msg, Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply, ControlMessage::Ack);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_call_times_out_without_reply() {
        let transport = TcpTransport::new(TcpTransportConfig::default());
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let conn = transport.accept(&listener).await.unwrap();
            let _ = conn.recv_frame().await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let conn = TcpTransport::new(TcpTransportConfig::default())
            .connect(&addr)
            .await
            .unwrap();
        let err = conn
            .call(&ControlMessage::Ack, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::RequestTimeout { .. }));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_reset() {
        let transport = TcpTransport::new(TcpTransportConfig::default());
        let listener = transport.listen("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let conn = transport.accept(&listener).await.unwrap();
            drop(conn);
        });

        let conn = TcpTransport::new(TcpTransportConfig::default())
            .connect(&addr)
            .await
            .unwrap();
        server.await.unwrap();
        assert!(matches!(
            conn.recv_frame().await,
            Err(TransportError::ConnectionReset)
        ));
    }
}
