// ABOUTME: Client factory: picks the transport variant from the parsed server address
// ABOUTME: Provides the polymorphic Client handle delegating to the transport implementations

use crate::address::{ServerAddress, TransportKind};
use crate::client::error::Result;
use crate::client::http::HttpClient;
use crate::client::tcp::TcpClient;
use crate::client::traits::{ServerControl, StreamingInference};
use crate::client::types::{ClientConfig, ModelInfo};
use crate::params::ModelParams;
use crate::pipeline::ResultCallback;
use bytes::Bytes;
use serde_json::{Map, Value};

/// Connect to an inference server with default configuration.
///
/// The transport is picked from the URL scheme: `http://` speaks HTTP
/// plus WebSocket, `asio://` or a bare `host[:port]` speaks the
/// proprietary TCP protocol.
///
/// ```rust,no_run
/// use inferstream::connect;
///
/// # async fn example() -> inferstream::Result<()> {
/// let mut client = connect("localhost:8778").await?;
/// for model in client.modelzoo_list().await? {
///     println!("{}", model.name);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn connect(server: &str) -> Result<Client> {
    connect_with_config(server, ClientConfig::default()).await
}

/// Connect with explicit configuration.
pub async fn connect_with_config(server: &str, config: ClientConfig) -> Result<Client> {
    let address = ServerAddress::parse(server)?;
    match address.transport() {
        TransportKind::TcpProprietary => {
            Ok(Client::Tcp(TcpClient::connect(address, config).await?))
        }
        TransportKind::HttpWebsocket => Ok(Client::Http(HttpClient::new(address, config)?)),
    }
}

/// Polymorphic inference-client handle over the two transport variants.
///
/// Both variants are behavior-equivalent above the wire format; the
/// methods below mirror [`ServerControl`] and [`StreamingInference`].
pub enum Client {
    /// Proprietary length-prefixed TCP transport.
    Tcp(TcpClient),
    /// HTTP control surface with a WebSocket stream channel.
    Http(HttpClient),
}

macro_rules! delegate {
    // Await inside each arm: the two transports return distinct futures.
    ($self:ident . $method:ident ( $($arg:expr),* ) . await ) => {
        match $self {
            Client::Tcp(client) => client.$method($($arg),*).await,
            Client::Http(client) => client.$method($($arg),*).await,
        }
    };
    ($self:ident . $method:ident ( $($arg:expr),* ) ) => {
        match $self {
            Client::Tcp(client) => client.$method($($arg),*),
            Client::Http(client) => client.$method($($arg),*),
        }
    };
}

impl Client {
    /// The parsed address this client talks to.
    pub fn address(&self) -> &ServerAddress {
        match self {
            Client::Tcp(client) => client.address(),
            Client::Http(client) => client.address(),
        }
    }

    /// See [`ServerControl::modelzoo_list`].
    pub async fn modelzoo_list(&mut self) -> Result<Vec<ModelInfo>> {
        delegate!(self.modelzoo_list().await)
    }

    /// See [`ServerControl::system_info`].
    pub async fn system_info(&mut self) -> Result<Value> {
        delegate!(self.system_info().await)
    }

    /// See [`ServerControl::label_dictionary`].
    pub async fn label_dictionary(&mut self, model_name: &str) -> Result<Map<String, Value>> {
        delegate!(self.label_dictionary(model_name).await)
    }

    /// See [`ServerControl::ping`].
    pub async fn ping(&mut self, sleep_ms: u64, ignore_errors: bool) -> Result<bool> {
        delegate!(self.ping(sleep_ms, ignore_errors).await)
    }

    /// See [`ServerControl::trace_manage`].
    pub async fn trace_manage(&mut self, args: Value) -> Result<Value> {
        delegate!(self.trace_manage(args).await)
    }

    /// See [`ServerControl::zoo_manage`].
    pub async fn zoo_manage(&mut self, args: Value) -> Result<Value> {
        delegate!(self.zoo_manage(args).await)
    }

    /// See [`ServerControl::dev_ctrl`].
    pub async fn dev_ctrl(&mut self, args: Value) -> Result<Value> {
        delegate!(self.dev_ctrl(args).await)
    }

    /// See [`ServerControl::shutdown`].
    pub async fn shutdown(&mut self) -> Result<()> {
        delegate!(self.shutdown().await)
    }

    /// See [`StreamingInference::open_stream`].
    pub async fn open_stream(
        &mut self,
        model: &str,
        queue_depth: usize,
        extra_params: Option<&ModelParams>,
    ) -> Result<()> {
        delegate!(self.open_stream(model, queue_depth, extra_params).await)
    }

    /// See [`StreamingInference::close_stream`].
    pub async fn close_stream(&mut self) -> Result<()> {
        delegate!(self.close_stream().await)
    }

    /// See [`StreamingInference::install_callback`].
    pub fn install_callback(&mut self, callback: Option<ResultCallback>) -> Result<()> {
        delegate!(self.install_callback(callback))
    }

    /// See [`StreamingInference::submit`].
    pub async fn submit(&mut self, batch: &[Bytes], tag: &str) -> Result<()> {
        delegate!(self.submit(batch, tag).await)
    }

    /// See [`StreamingInference::finish`].
    pub async fn finish(&mut self) -> Result<()> {
        delegate!(self.finish().await)
    }

    /// See [`StreamingInference::predict`].
    pub async fn predict(&mut self, batch: &[Bytes]) -> Result<Value> {
        delegate!(self.predict(batch).await)
    }

    /// See [`StreamingInference::outstanding_count`].
    pub fn outstanding_count(&self) -> usize {
        delegate!(self.outstanding_count())
    }

    /// See [`StreamingInference::last_error`].
    pub fn last_error(&self) -> Option<String> {
        delegate!(self.last_error())
    }
}
