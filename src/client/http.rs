// ABOUTME: HTTP/WebSocket transport client: REST control surface plus a WebSocket stream channel
// ABOUTME: Behavior-equivalent to the TCP transport above the wire format

use crate::address::ServerAddress;
use crate::client::error::{ClientError, Result};
use crate::client::traits::{ServerControl, StreamingInference};
use crate::client::types::{ClientConfig, ModelInfo};
use crate::codec;
use crate::params::ModelParams;
use crate::pipeline::{Pipeline, ResultCallback, ResultSource};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Inference client speaking the HTTP control surface plus a WebSocket
/// stream channel.
///
/// Control commands map onto `GET`/`POST` requests under `/v1/`; the
/// stream channel is a WebSocket whose read half feeds the shared
/// pipeline and whose write half stays with the client.
pub struct HttpClient {
    address: ServerAddress,
    config: ClientConfig,
    http: reqwest::Client,
    stream: Option<WsStream>,
    /// Callback to install on the next stream; mirrors the pipeline's slot
    /// while a stream is open.
    callback: Option<ResultCallback>,
    /// Sticky error carried over after the stream closed, readable until
    /// the next `open_stream`.
    sticky_error: Option<String>,
}

struct WsStream {
    sink: SplitSink<WsSocket, Message>,
    pipeline: Pipeline,
}

struct WsResultSource {
    stream: SplitStream<WsSocket>,
}

impl ResultSource for WsResultSource {
    async fn next_result(&mut self) -> Result<Value> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(payload))) => return codec::decode_result(&payload),
                // Some servers report stream errors as text documents.
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).map_err(ClientError::from);
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(ClientError::OperationFailed(
                        "server closed the stream".into(),
                    ));
                }
                // Ping/pong is answered by the library.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

impl HttpClient {
    /// Build a client; the control channel is used lazily, no connection
    /// is made here.
    pub fn new(address: ServerAddress, config: ClientConfig) -> Result<HttpClient> {
        let mut builder = reqwest::Client::builder().timeout(config.connection_timeout);
        if let Some(token) = &config.token {
            let mut headers = reqwest::header::HeaderMap::new();
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| {
                    ClientError::BadParameter("token contains invalid header characters".into())
                })?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }
        Ok(HttpClient {
            http: builder.build()?,
            address,
            config,
            stream: None,
            callback: None,
            sticky_error: None,
        })
    }

    /// The parsed address this client talks to.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.address.http_base())
    }

    /// Finish a control request: non-2xx statuses fail, the JSON body is
    /// version-checked and its `success` field enforced.
    async fn exchange(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::OperationFailed(format!(
                "HTTP {status}: {}",
                body.trim()
            )));
        }
        let doc: Value = response.json().await?;
        codec::check_version(&doc)?;
        codec::expect_success(&doc)?;
        Ok(doc)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.exchange(self.http.get(self.url(path))).await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut request = self.http.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.exchange(request).await
    }

    fn open_record(&self, model: &str, extra_params: Option<&ModelParams>) -> Value {
        let config = extra_params
            .map(ModelParams::to_value)
            .unwrap_or_else(|| json!({}));
        let mut record = json!({"name": model, "config": config});
        if let Some(token) = &self.config.token {
            record["token"] = json!(token);
        }
        record
    }

    fn stream_mut(&mut self) -> Result<&mut WsStream> {
        self.stream.as_mut().ok_or_else(|| {
            ClientError::IncorrectApiUse("no stream is open; call open_stream first".into())
        })
    }
}

impl ServerControl for HttpClient {
    async fn modelzoo_list(&mut self) -> Result<Vec<ModelInfo>> {
        let doc = self.get("/v1/modelzoo").await?;
        codec::parse_modelzoo(&doc)
    }

    async fn system_info(&mut self) -> Result<Value> {
        self.get("/v1/system_info").await
    }

    async fn label_dictionary(&mut self, model_name: &str) -> Result<Map<String, Value>> {
        let doc = self
            .get(&format!("/v1/label_dictionary/{model_name}"))
            .await?;
        codec::parse_label_dictionary(&doc)
    }

    async fn ping(&mut self, sleep_ms: u64, ignore_errors: bool) -> Result<bool> {
        match self.post(&format!("/v1/sleep/{sleep_ms}"), None).await {
            Ok(_) => Ok(true),
            Err(_) if ignore_errors => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn trace_manage(&mut self, args: Value) -> Result<Value> {
        self.post("/v1/trace_manage", Some(&args)).await
    }

    async fn zoo_manage(&mut self, args: Value) -> Result<Value> {
        self.post("/v1/zoo_manage", Some(&args)).await
    }

    async fn dev_ctrl(&mut self, args: Value) -> Result<Value> {
        self.post("/v1/dev_ctrl", Some(&args)).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.post("/v1/shutdown", None).await?;
        Ok(())
    }
}

impl StreamingInference for HttpClient {
    async fn open_stream(
        &mut self,
        model: &str,
        queue_depth: usize,
        extra_params: Option<&ModelParams>,
    ) -> Result<()> {
        if queue_depth == 0 {
            return Err(ClientError::BadParameter(
                "queue depth must be at least 1".into(),
            ));
        }
        // At most one stream per client.
        self.close_stream().await?;

        let record = self.open_record(model, extra_params);
        let url = self.address.websocket_url();
        let handshake = async {
            let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            socket.send(Message::Text(record.to_string().into())).await?;
            let ack = loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => {
                        break serde_json::from_str::<Value>(text.as_str())?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(ClientError::OperationFailed(
                            "server closed the websocket during open".into(),
                        ));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                }
            };
            Ok::<_, ClientError>((socket, ack))
        };
        let (socket, ack) = tokio::time::timeout(self.config.connection_timeout, handshake)
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "stream open timed out after {:?}",
                    self.config.connection_timeout
                ))
            })??;
        codec::check_version(&ack)?;
        codec::expect_success(&ack)?;
        tracing::debug!(model, queue_depth, %url, "websocket stream opened");

        let (sink, stream) = socket.split();
        let pipeline = Pipeline::start(
            WsResultSource { stream },
            queue_depth,
            self.config.inference_timeout,
            self.callback.clone(),
        );
        self.stream = Some(WsStream { sink, pipeline });
        self.sticky_error = None;
        Ok(())
    }

    async fn close_stream(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.pipeline.finish().await;
            if let Some(err) = stream.pipeline.last_error() {
                self.sticky_error = Some(err);
            }
            if let Err(e) = stream.sink.send(Message::Close(None)).await {
                tracing::debug!(error = %e, "websocket close failed");
            }
            stream.pipeline.shutdown();
            tracing::debug!("websocket stream closed");
        }
        Ok(())
    }

    fn install_callback(&mut self, callback: Option<ResultCallback>) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.pipeline.install_callback(callback.clone())?;
        }
        self.callback = callback;
        Ok(())
    }

    async fn submit(&mut self, batch: &[Bytes], tag: &str) -> Result<()> {
        let stream = self.stream_mut()?;
        if !stream.pipeline.has_callback() {
            return Err(ClientError::IncorrectApiUse(
                "submit requires a result callback; install one or use predict".into(),
            ));
        }
        if !stream.pipeline.acquire_slot(tag).await? {
            // Sticky error: the frame is dropped silently.
            return Ok(());
        }
        // Socket I/O happens outside the pipeline lock; all buffers of the
        // batch go back-to-back before any response is read.
        for buffer in batch {
            if let Err(e) = stream.sink.send(Message::Binary(buffer.clone())).await {
                let msg = format!("stream write failed: {e}");
                stream.pipeline.abandon_slot(msg.clone());
                return Err(ClientError::OperationFailed(msg));
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.pipeline.finish().await;
            if let Some(err) = stream.pipeline.last_error() {
                self.sticky_error = Some(err);
            }
        }
        Ok(())
    }

    async fn predict(&mut self, batch: &[Bytes]) -> Result<Value> {
        let stream = self.stream_mut()?;
        if stream.pipeline.has_callback() {
            return Err(ClientError::IncorrectApiUse(
                "predict requires no streaming callback installed".into(),
            ));
        }

        let slot: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let capture = Arc::clone(&slot);
        let callback: ResultCallback = Arc::new(move |doc, _tag| {
            if let Ok(mut slot) = capture.lock() {
                *slot = Some(doc);
            }
        });
        stream.pipeline.install_callback(Some(callback))?;

        let submitted = self.submit(batch, "").await;
        let _ = StreamingInference::finish(self).await;
        if let Some(stream) = &self.stream {
            // Quiescent after finish; removal cannot fail.
            let _ = stream.pipeline.install_callback(None);
        }
        submitted?;

        if let Some(err) = self.last_error() {
            return Err(ClientError::OperationFailed(err));
        }
        let result = slot.lock().map(|mut s| s.take()).unwrap_or(None);
        result.ok_or_else(|| ClientError::OperationFailed("no result received".into()))
    }

    fn outstanding_count(&self) -> usize {
        self.stream
            .as_ref()
            .map(|s| s.pipeline.outstanding())
            .unwrap_or(0)
    }

    fn last_error(&self) -> Option<String> {
        match &self.stream {
            Some(stream) => stream.pipeline.last_error(),
            None => self.sticky_error.clone(),
        }
    }
}
