//! Transport abstraction for the chat protocol.
//!
//! The chat server speaks raw text over one TCP stream. A [`Transport`] is an
//! open connection that splits into a [`TransportReader`] and a
//! [`TransportWriter`] so that writes never wait behind the single-reader gate
//! that serialises every read.
//!
//! # Connection Setup
//!
//! Opening a connection is NOT part of these traits. Construct a connected
//! transport externally (e.g. [`TcpTransport::connect`](crate::TcpTransport))
//! and pass it to [`ChatClient::start`](crate::ChatClient::start).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use whisperers_client::error::ChatError;
//! use whisperers_client::transport::{Transport, TransportReader, TransportWriter};
//!
//! struct MyReader { /* ... */ }
//! struct MyWriter { /* ... */ }
//! struct MyTransport { reader: MyReader, writer: MyWriter }
//!
//! #[async_trait]
//! impl TransportReader for MyReader {
//!     async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<String>, ChatError> {
//!         // Wait up to `timeout` for the next chunk; Ok(None) on timeout.
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ChatError> {
//!         todo!()
//!     }
//! }
//!
//! #[async_trait]
//! impl TransportWriter for MyWriter {
//!     async fn send(&mut self, message: &str) -> Result<(), ChatError> {
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ChatError> {
//!         todo!()
//!     }
//! }
//!
//! impl Transport for MyTransport {
//!     type Reader = MyReader;
//!     type Writer = MyWriter;
//!
//!     fn into_split(self) -> (MyReader, MyWriter) {
//!         (self.reader, self.writer)
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ChatError;

/// An open, bidirectional connection to the chat server.
pub trait Transport: Send + 'static {
    type Reader: TransportReader;
    type Writer: TransportWriter;

    /// Split the connection into independently usable halves.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// The receiving half of a [`Transport`].
///
/// Each successful call returns one chunk: whatever the connection delivered
/// in one read, decoded as text. A chunk may hold several server messages or
/// only part of one.
///
/// # Cancel Safety
///
/// [`receive`](TransportReader::receive) is wrapped in timeouts, so it **MUST**
/// be cancel-safe: dropping the future must not lose data.
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// Receive the next chunk.
    ///
    /// Returns:
    /// - `Ok(Some(text))`: a chunk arrived
    /// - `Ok(None)`: `timeout` elapsed with nothing to read (not an error)
    /// - `Err(e)`: the connection failed or was closed
    ///
    /// `None` as the timeout blocks until data or an error arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TransportClosed`] when the server closed the
    /// connection and [`ChatError::TransportReceive`] on any other failure.
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<String>, ChatError>;

    /// Non-blocking readiness check plus read: returns a chunk only if one is
    /// available right now.
    ///
    /// # Errors
    ///
    /// Same as [`receive`](TransportReader::receive).
    async fn try_receive(&mut self) -> Result<Option<String>, ChatError> {
        self.receive(Some(Duration::ZERO)).await
    }

    /// Stop reading and release the read side. Idempotent.
    ///
    /// # Errors
    ///
    /// Implementations may report a failed shutdown but must still release
    /// resources.
    async fn close(&mut self) -> Result<(), ChatError>;
}

/// The sending half of a [`Transport`].
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// Send one command in its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TransportSend`] if the bytes could not be written
    /// and [`ChatError::TransportClosed`] after [`close`](TransportWriter::close).
    async fn send(&mut self, message: &str) -> Result<(), ChatError>;

    /// Shut down the write side. Idempotent.
    ///
    /// # Errors
    ///
    /// Implementations may report a failed shutdown but must still release
    /// resources.
    async fn close(&mut self) -> Result<(), ChatError>;
}
