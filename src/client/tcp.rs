// ABOUTME: Proprietary TCP transport client: framed JSON control channel plus framed stream channel
// ABOUTME: Implements the control command set and wires the stream socket into the shared pipeline

use crate::address::ServerAddress;
use crate::client::error::{ClientError, Result};
use crate::client::traits::{ServerControl, StreamingInference};
use crate::client::types::{ClientConfig, ModelInfo};
use crate::codec;
use crate::connection::{Connection, FrameReader, FrameWriter, connect_with_retry};
use crate::params::ModelParams;
use crate::pipeline::{Pipeline, ResultCallback, ResultSource};
use bytes::Bytes;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex};

/// Inference client speaking the proprietary length-prefixed TCP protocol.
///
/// A persistent command socket carries control exchanges; each open stream
/// gets its own socket whose read half is owned by the pipeline's receiver
/// task and whose write half stays with the client for submissions.
pub struct TcpClient {
    address: ServerAddress,
    config: ClientConfig,
    control: Connection,
    stream: Option<StreamChannel>,
    /// Callback to install on the next stream; mirrors the pipeline's slot
    /// while a stream is open.
    callback: Option<ResultCallback>,
    /// Sticky error carried over after the stream closed, readable until
    /// the next `open_stream`.
    sticky_error: Option<String>,
}

struct StreamChannel {
    writer: FrameWriter,
    pipeline: Pipeline,
}

struct TcpResultSource {
    reader: FrameReader,
}

impl ResultSource for TcpResultSource {
    async fn next_result(&mut self) -> Result<Value> {
        match self.reader.read_frame().await? {
            Some(payload) if payload.is_empty() => Err(ClientError::OperationFailed(
                "server closed the stream".into(),
            )),
            Some(payload) => codec::decode_result(&payload),
            None => Err(ClientError::OperationFailed(
                "stream connection closed".into(),
            )),
        }
    }
}

impl TcpClient {
    /// Connect the command socket and return a ready client.
    pub async fn connect(address: ServerAddress, config: ClientConfig) -> Result<TcpClient> {
        let socket = connect_with_retry(&address, config.connection_timeout).await?;
        tracing::debug!(server = %address, "command connection established");
        Ok(TcpClient {
            address,
            config,
            control: Connection::new(socket),
            stream: None,
            callback: None,
            sticky_error: None,
        })
    }

    /// The parsed address this client talks to.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// One control round-trip on the command socket, bounded by the
    /// connection timeout. The response is version-checked; `success`
    /// handling is left to the caller.
    async fn command(&mut self, payload: &Value) -> Result<Value> {
        let bytes = serde_json::to_vec(payload)?;
        let budget = self.config.connection_timeout;
        let control = &mut self.control;
        let exchange = async move {
            control.write_frame(&bytes).await?;
            match control.read_frame().await? {
                Some(frame) => codec::decode_control(&frame),
                None => Err(ClientError::OperationFailed(
                    "server closed the command connection".into(),
                )),
            }
        };
        tokio::time::timeout(budget, exchange).await.map_err(|_| {
            ClientError::Timeout(format!("control command timed out after {budget:?}"))
        })?
    }

    /// A control round-trip that also requires `success` in the response.
    async fn checked_command(&mut self, payload: &Value) -> Result<Value> {
        let doc = self.command(payload).await?;
        codec::expect_success(&doc)?;
        Ok(doc)
    }

    fn open_record(&self, model: &str, extra_params: Option<&ModelParams>) -> Value {
        let config = extra_params
            .map(ModelParams::to_value)
            .unwrap_or_else(|| json!({}));
        let mut record = json!({"op": "stream", "name": model, "config": config});
        if let Some(token) = &self.config.token {
            record["token"] = json!(token);
        }
        record
    }

    fn stream_mut(&mut self) -> Result<&mut StreamChannel> {
        self.stream.as_mut().ok_or_else(|| {
            ClientError::IncorrectApiUse("no stream is open; call open_stream first".into())
        })
    }
}

impl ServerControl for TcpClient {
    async fn modelzoo_list(&mut self) -> Result<Vec<ModelInfo>> {
        let doc = self.checked_command(&json!({"op": "modelzoo"})).await?;
        codec::parse_modelzoo(&doc)
    }

    async fn system_info(&mut self) -> Result<Value> {
        self.checked_command(&json!({"op": "system_info"})).await
    }

    async fn label_dictionary(&mut self, model_name: &str) -> Result<Map<String, Value>> {
        let doc = self
            .checked_command(&json!({"op": "label_dictionary", "name": model_name}))
            .await?;
        codec::parse_label_dictionary(&doc)
    }

    async fn ping(&mut self, sleep_ms: u64, ignore_errors: bool) -> Result<bool> {
        let payload = json!({"op": "sleep", "sleep_time_ms": sleep_ms});
        match self.checked_command(&payload).await {
            Ok(_) => Ok(true),
            Err(_) if ignore_errors => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn trace_manage(&mut self, args: Value) -> Result<Value> {
        self.checked_command(&json!({"op": "trace_manage", "args": args}))
            .await
    }

    async fn zoo_manage(&mut self, args: Value) -> Result<Value> {
        self.checked_command(&json!({"op": "zoo_manage", "args": args}))
            .await
    }

    async fn dev_ctrl(&mut self, args: Value) -> Result<Value> {
        self.checked_command(&json!({"op": "dev_ctrl", "args": args}))
            .await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.checked_command(&json!({"op": "shutdown"})).await?;

        // The server's accept loop only notices the shutdown flag on its
        // next accepted connection: open a fresh one and push a zero-byte
        // frame. Epilogue errors are ignored.
        let epilogue = async {
            let socket = connect_with_retry(&self.address, self.config.connection_timeout).await?;
            Connection::new(socket).write_frame(&[]).await
        };
        if let Err(e) = epilogue.await {
            tracing::debug!(error = %e, "shutdown epilogue failed");
        }
        Ok(())
    }
}

impl StreamingInference for TcpClient {
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

        let socket = connect_with_retry(&self.address, self.config.connection_timeout).await?;
        let mut conn = Connection::new(socket);
        let record = serde_json::to_vec(&self.open_record(model, extra_params))?;

        let handshake = async {
            conn.write_frame(&record).await?;
            match conn.read_frame().await? {
                Some(frame) => codec::decode_control(&frame),
                None => Err(ClientError::OperationFailed(
                    "server closed the stream connection during open".into(),
                )),
            }
        };
        let ack = tokio::time::timeout(self.config.connection_timeout, handshake)
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "stream open timed out after {:?}",
                    self.config.connection_timeout
                ))
            })??;
        codec::expect_success(&ack)?;
        tracing::debug!(model, queue_depth, "stream opened");

        let (reader, writer) = conn.into_split();
        let pipeline = Pipeline::start(
            TcpResultSource { reader },
            queue_depth,
            self.config.inference_timeout,
            self.callback.clone(),
        );
        self.stream = Some(StreamChannel { writer, pipeline });
        self.sticky_error = None;
        Ok(())
    }

    async fn close_stream(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.pipeline.finish().await;
            if let Some(err) = stream.pipeline.last_error() {
                self.sticky_error = Some(err);
            }
            // Close marker; the socket may already be gone.
            if let Err(e) = stream.writer.write_frame(&[]).await {
                tracing::debug!(error = %e, "stream close marker failed");
            }
            stream.pipeline.shutdown();
            tracing::debug!("stream closed");
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
            if let Err(e) = stream.writer.write_frame(buffer).await {
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
