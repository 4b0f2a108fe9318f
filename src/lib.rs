pub mod address;
pub mod client;
pub mod codec;
pub mod connection;
pub mod params;

mod pipeline;

#[cfg(test)]
mod tests;

// Re-export the main client API for easy access
pub use address::{DEFAULT_PORT, ServerAddress, TransportKind};
pub use client::{
    Client, ClientConfig, ClientError, HttpClient, ModelInfo, Result, ServerControl,
    StreamingInference, TcpClient, connect, connect_with_config,
};
pub use params::ModelParams;
pub use pipeline::ResultCallback;
