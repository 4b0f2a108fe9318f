// ABOUTME: Core inference client traits using native async functions
// ABOUTME: Split into control-channel and stream-channel capability surfaces

use crate::client::error::Result;
use crate::client::types::ModelInfo;
use crate::params::ModelParams;
use crate::pipeline::ResultCallback;
use bytes::Bytes;
use serde_json::{Map, Value};

/// Control-channel operations.
///
/// Every command is a request/response exchange bounded by the
/// connection timeout, independent of any open stream. Control
/// operations raise on failure; only `ping` offers an error-swallowing
/// mode.
pub trait ServerControl {
    /// Enumerate the server's model zoo.
    fn modelzoo_list(&mut self) -> impl Future<Output = Result<Vec<ModelInfo>>> + Send;

    /// Host capability document.
    fn system_info(&mut self) -> impl Future<Output = Result<Value>> + Send;

    /// Label dictionary of a zoo model.
    fn label_dictionary(
        &mut self,
        model_name: &str,
    ) -> impl Future<Output = Result<Map<String, Value>>> + Send;

    /// Liveness probe: ask the server to sleep `sleep_ms` milliseconds.
    ///
    /// With `ignore_errors` any failure, including a transport-level
    /// disconnect, yields `Ok(false)` instead of an error.
    fn ping(
        &mut self,
        sleep_ms: u64,
        ignore_errors: bool,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Server-side tracing management; the payload is request-specific.
    fn trace_manage(&mut self, args: Value) -> impl Future<Output = Result<Value>> + Send;

    /// Model zoo administration; the payload is request-specific.
    fn zoo_manage(&mut self, args: Value) -> impl Future<Output = Result<Value>> + Send;

    /// Device administration; the payload is request-specific.
    fn dev_ctrl(&mut self, args: Value) -> impl Future<Output = Result<Value>> + Send;

    /// Ask the server process to terminate.
    fn shutdown(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Stream-channel operations: the bounded-window inference pipeline.
///
/// A client carries at most one stream; opening a second one implicitly
/// closes the first. Within a stream, results reach the installed
/// callback strictly in submission order.
pub trait StreamingInference {
    /// Open the stream channel for `model`. `queue_depth` fixes the
    /// maximum number of outstanding frames; `extra_params` is merged
    /// into the model configuration sent to the server.
    fn open_stream(
        &mut self,
        model: &str,
        queue_depth: usize,
        extra_params: Option<&ModelParams>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Close the stream channel. Idempotent; drains outstanding frames
    /// first.
    fn close_stream(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Install (`Some`) or remove (`None`) the streaming result callback.
    ///
    /// Removal requires a quiescent receiver: no outstanding results.
    fn install_callback(&mut self, callback: Option<ResultCallback>) -> Result<()>;

    /// Submit one frame batch with a caller-supplied tag.
    ///
    /// Blocks while the outstanding window is full, bounded by the
    /// inference timeout. After the first stream error the frame is
    /// dropped silently; the error stays readable via `last_error`.
    fn submit(
        &mut self,
        batch: &[Bytes],
        tag: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Wait until every outstanding frame has been dispatched or the
    /// stream has failed. Never reports the sticky error itself.
    fn finish(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Single-shot prediction: submit one batch and return its result.
    ///
    /// Requires no streaming callback installed.
    fn predict(&mut self, batch: &[Bytes]) -> impl Future<Output = Result<Value>> + Send;

    /// Number of frames submitted but not yet dispatched.
    fn outstanding_count(&self) -> usize;

    /// Sticky error of the current streaming session, if any. Cleared by
    /// the next `open_stream`.
    fn last_error(&self) -> Option<String>;
}
