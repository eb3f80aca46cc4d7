//! TCP transport implementation using `tokio`.
//!
//! [`StreamTransport`] works over any tokio byte stream; [`TcpTransport`] is
//! the variant used against a real chat server.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-tcp` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), whisperers_client::ChatError> {
//! use whisperers_client::transport::{Transport, TransportReader, TransportWriter};
//! use whisperers_client::TcpTransport;
//!
//! let transport = TcpTransport::connect("127.0.0.1:3000").await?;
//! let (mut reader, mut writer) = transport.into_split();
//!
//! if let Some(listing) = reader.receive(None).await? {
//!     println!("rooms: {listing}");
//! }
//!
//! writer.send("DISCONNECT").await?;
//! writer.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use crate::error::ChatError;
use crate::transport::{Transport, TransportReader, TransportWriter};

/// Size of a single read. The server's reference client reads up to this
/// many bytes per `recv`, and the server never relies on larger reads.
pub const READ_BUFFER_SIZE: usize = 1024;

/// A [`Transport`] over a plain TCP connection.
pub type TcpTransport = StreamTransport<TcpStream>;

/// A [`Transport`] over any tokio byte stream.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
}

impl TcpTransport {
    /// Open a TCP connection to the chat server at `addr` (e.g. `"127.0.0.1:3000"`).
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Connect`] if no server is reachable.
    pub async fn connect(addr: &str) -> Result<Self, ChatError> {
        tracing::debug!(addr = %addr, "connecting to chat server");

        let stream = TcpStream::connect(addr).await.map_err(ChatError::Connect)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("could not disable Nagle's algorithm: {e}");
        }

        tracing::info!(addr = %addr, "chat server connection established");
        Ok(Self::from_stream(stream))
    }

    /// Open a TCP connection with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Timeout`] if the deadline elapses, or any error
    /// that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self, ChatError> {
        tokio::time::timeout(timeout, Self::connect(addr))
            .await
            .map_err(|_| ChatError::Timeout)?
    }
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wrap an already-connected stream.
    pub fn from_stream(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    type Reader = StreamReader<S>;
    type Writer = StreamWriter<S>;

    fn into_split(self) -> (Self::Reader, Self::Writer) {
        let (read, write) = tokio::io::split(self.stream);
        (
            StreamReader {
                half: read,
                buf: vec![0; READ_BUFFER_SIZE],
                carry: Vec::new(),
                closed: false,
            },
            StreamWriter {
                half: write,
                closed: false,
            },
        )
    }
}

/// Read half of a [`StreamTransport`].
#[derive(Debug)]
pub struct StreamReader<S> {
    half: ReadHalf<S>,
    buf: Vec<u8>,
    /// Bytes of a UTF-8 sequence cut off by the end of the previous read.
    carry: Vec<u8>,
    closed: bool,
}

impl<S> StreamReader<S> {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.carry.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            // An incomplete sequence at the very end: keep it for the next read.
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.carry.len(),
        };
        let tail = self.carry.split_off(complete);
        let text = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry = tail;
        text
    }
}

#[async_trait]
impl<S> TransportReader for StreamReader<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<String>, ChatError> {
        if self.closed {
            return Err(ChatError::TransportClosed);
        }

        let read = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.half.read(&mut self.buf)).await {
                Ok(read) => read,
                Err(_) => return Ok(None),
            },
            None => self.half.read(&mut self.buf).await,
        };

        let n = read.map_err(|e| ChatError::TransportReceive(e.to_string()))?;
        if n == 0 {
            tracing::debug!("chat server closed the connection");
            self.closed = true;
            return Err(ChatError::TransportClosed);
        }

        let bytes = self.buf.get(..n).unwrap_or_default().to_vec();
        let text = self.decode(&bytes);
        if text.is_empty() {
            // Only part of a multi-byte character so far.
            return Ok(None);
        }
        Ok(Some(text))
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        self.closed = true;
        self.carry.clear();
        Ok(())
    }
}

/// Write half of a [`StreamTransport`].
#[derive(Debug)]
pub struct StreamWriter<S> {
    half: WriteHalf<S>,
    closed: bool,
}

#[async_trait]
impl<S> TransportWriter for StreamWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&mut self, message: &str) -> Result<(), ChatError> {
        if self.closed {
            return Err(ChatError::TransportClosed);
        }
        self.half
            .write_all(message.as_bytes())
            .await
            .map_err(|e| ChatError::TransportSend(e.to_string()))?;
        self.half
            .flush()
            .await
            .map_err(|e| ChatError::TransportSend(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ChatError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.half
            .shutdown()
            .await
            .map_err(|e| ChatError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_test::io::Builder;

    #[test]
    fn tcp_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<TcpTransport>();
        assert_send::<StreamReader<TcpStream>>();
        assert_send::<StreamWriter<TcpStream>>();
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = TcpTransport::connect("127.0.0.1:1").await;
        assert!(matches!(result, Err(ChatError::Connect(_))));
    }

    #[tokio::test]
    async fn connect_with_timeout_times_out() {
        // Non-routable address; hosts without a route fail fast instead.
        let result =
            TcpTransport::connect_with_timeout("192.0.2.1:1", Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(ChatError::Timeout) | Err(ChatError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn receive_returns_each_read_as_a_chunk() {
        let mock = Builder::new().read(b"NO_ROOMS").read(b"UPDATE_DATA;").build();
        let (mut reader, _writer) = StreamTransport::from_stream(mock).into_split();

        assert_eq!(reader.receive(None).await.unwrap().as_deref(), Some("NO_ROOMS"));
        assert_eq!(
            reader.receive(None).await.unwrap().as_deref(),
            Some("UPDATE_DATA;")
        );
    }

    #[tokio::test]
    async fn receive_times_out_with_none() {
        let mock = Builder::new()
            .wait(Duration::from_millis(200))
            .read(b"late")
            .build();
        let (mut reader, _writer) = StreamTransport::from_stream(mock).into_split();

        let first = reader.receive(Some(Duration::from_millis(20))).await.unwrap();
        assert!(first.is_none());

        let second = reader.receive(None).await.unwrap();
        assert_eq!(second.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn end_of_stream_is_transport_closed() {
        let mock = Builder::new().read(b"SERVER_SHUTDOWN").build();
        let (mut reader, _writer) = StreamTransport::from_stream(mock).into_split();

        assert!(reader.receive(None).await.unwrap().is_some());
        let err = reader.receive(None).await.unwrap_err();
        assert!(matches!(err, ChatError::TransportClosed));
        // Stays closed.
        assert!(matches!(
            reader.receive(Some(Duration::ZERO)).await,
            Err(ChatError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn split_utf8_sequence_is_reassembled() {
        let mock = Builder::new()
            .read(b"MESSAGE;zo\xC3")
            .read(b"\xABe;caf\xC3\xA9")
            .build();
        let (mut reader, _writer) = StreamTransport::from_stream(mock).into_split();

        let first = reader.receive(None).await.unwrap().unwrap();
        assert_eq!(first, "MESSAGE;zo");
        let second = reader.receive(None).await.unwrap().unwrap();
        assert_eq!(second, "\u{eb}e;caf\u{e9}");
    }

    #[tokio::test]
    async fn read_error_is_transport_receive() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let (mut reader, _writer) = StreamTransport::from_stream(mock).into_split();

        let err = reader.receive(None).await.unwrap_err();
        assert!(matches!(err, ChatError::TransportReceive(_)));
    }

    #[tokio::test]
    async fn send_writes_exact_bytes() {
        let mock = Builder::new().write(b"JOIN_ROOM;lounge;NO_PASSWORD;bob").build();
        let (_reader, mut writer) = StreamTransport::from_stream(mock).into_split();

        writer.send("JOIN_ROOM;lounge;NO_PASSWORD;bob").await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let mock = Builder::new().build();
        let (_reader, mut writer) = StreamTransport::from_stream(mock).into_split();

        writer.close().await.unwrap();
        writer.close().await.unwrap();
        let err = writer.send("DISCONNECT").await.unwrap_err();
        assert!(matches!(err, ChatError::TransportClosed));
    }

    #[tokio::test]
    async fn tcp_round_trip_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"NO_ROOMS").await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8(buf[..n].to_vec()).unwrap()
        });

        let transport = TcpTransport::connect(&addr).await.unwrap();
        let (mut reader, mut writer) = transport.into_split();
        assert_eq!(reader.receive(None).await.unwrap().as_deref(), Some("NO_ROOMS"));
        writer.send("DISCONNECT").await.unwrap();

        assert_eq!(server.await.unwrap(), "DISCONNECT");
    }
}
