//! Transport implementations for the chat protocol.
//!
//! This module provides concrete [`Transport`](crate::Transport)
//! implementations behind feature gates:
//!
//! | Feature         | Transport                                   |
//! |-----------------|---------------------------------------------|
//! | `transport-tcp` | [`TcpTransport`], [`StreamTransport`]       |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), whisperers_client::ChatError> {
//! use whisperers_client::{ChatClient, ChatConfig, TcpTransport};
//!
//! let transport = TcpTransport::connect("127.0.0.1:3000").await?;
//! let (mut client, mut events) =
//!     ChatClient::start(transport, "alice", ChatConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-tcp")]
pub mod tcp;

#[cfg(feature = "transport-tcp")]
pub use tcp::{StreamTransport, TcpTransport};
