// ABOUTME: Inference client module: transports, factory, traits, errors, and supporting types
// ABOUTME: Exports the polymorphic Client handle plus the per-transport implementations

//! Inference Client Module
//!
//! A trait-based client for streaming inference servers:
//!
//! * **Native async traits** - async fn in traits, no `async_trait` dependency
//! * **Layered design** - control-channel and stream-channel capability traits
//! * **Dual transport** - proprietary TCP framing or HTTP + WebSocket,
//!   behavior-equivalent above the wire format
//! * **Bounded pipeline** - in-order result dispatch with backpressure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inferstream::connect;
//!
//! # async fn example() -> inferstream::Result<()> {
//! let mut client = connect("localhost:8778").await?;
//!
//! // Single-shot prediction.
//! client.open_stream("mobilenet", 4, None).await?;
//! let result = client.predict(&[b"frame bytes".as_ref().into()]).await?;
//! println!("{result}");
//!
//! client.close_stream().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Streaming
//!
//! Install a callback, then submit frames; results arrive on the receiver
//! task strictly in submission order, at most `queue_depth` in flight:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inferstream::connect;
//!
//! # async fn example() -> inferstream::Result<()> {
//! let mut client = connect("localhost:8778").await?;
//! client.open_stream("mobilenet", 4, None).await?;
//! client.install_callback(Some(Arc::new(|result, tag| {
//!     println!("{tag}: {result}");
//! })))?;
//!
//! for (i, frame) in frames().into_iter().enumerate() {
//!     client.submit(&[frame], &i.to_string()).await?;
//! }
//! client.finish().await?;
//! if let Some(err) = client.last_error() {
//!     eprintln!("stream failed: {err}");
//! }
//! # Ok(())
//! # }
//! # fn frames() -> Vec<bytes::Bytes> { Vec::new() }
//! ```

pub mod error;
pub mod factory;
pub mod http;
pub mod tcp;
pub mod traits;
pub mod types;

// Re-export the main types for easy access
pub use error::{ClientError, Result};
pub use factory::{Client, connect, connect_with_config};
pub use http::HttpClient;
pub use tcp::TcpClient;
pub use traits::{ServerControl, StreamingInference};
pub use types::{ClientConfig, ModelInfo};
