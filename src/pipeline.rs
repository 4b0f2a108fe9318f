// ABOUTME: Bounded-window in-order submit/receive pipeline shared by both transports
// ABOUTME: Single producer, single receiver task, sticky-error semantics, condvar-style backpressure

use crate::client::error::{ClientError, Result};
use crate::codec;
use serde_json::Value;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// User-supplied result callback: `(result_document, frame_tag)`.
///
/// Invoked on the receiver task, never while the pipeline lock is held.
/// Panics raised by the callback are caught and discarded.
pub type ResultCallback = Arc<dyn Fn(Value, &str) + Send + Sync>;

/// Source of decoded result documents for the receiver task.
///
/// Each transport wraps its read half: length-prefixed MessagePack frames
/// for TCP, binary WebSocket messages for HTTP. A closed channel surfaces
/// as an error; the pipeline turns it into the sticky error.
pub(crate) trait ResultSource: Send + 'static {
    fn next_result(&mut self) -> impl Future<Output = Result<Value>> + Send;
}

struct State {
    /// FIFO of frame tags, one per outstanding frame. The head corresponds
    /// to the next result the server will emit.
    pending: VecDeque<String>,
    callback: Option<ResultCallback>,
    /// First error of the streaming session; sticky until the stream is
    /// re-opened.
    last_error: Option<String>,
    /// Drain in progress: no new submissions until the window empties.
    stop_requested: bool,
}

struct Shared {
    state: Mutex<State>,
    /// Notified on every `pending` change and on stop/error.
    notify: Notify,
    depth: usize,
    inference_timeout: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a pipeline-level failure (read timeout, transport error).
    /// No callback fires for these: there is no result document.
    fn fail(&self, msg: String) {
        {
            let mut st = self.lock();
            if st.last_error.is_none() {
                tracing::warn!(error = %msg, "stream pipeline failed");
                st.last_error = Some(msg);
            }
            st.stop_requested = true;
            st.pending.clear();
        }
        self.notify.notify_waiters();
    }
}

/// The submit/receive engine for one open stream.
///
/// Owns the receiver task; the transport client owns the write half of the
/// socket and calls [`Pipeline::acquire_slot`] before each send.
pub(crate) struct Pipeline {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the receiver task over `source` and return the running
    /// pipeline. `depth` is the maximum number of outstanding frames.
    pub(crate) fn start<S: ResultSource>(
        source: S,
        depth: usize,
        inference_timeout: Duration,
        callback: Option<ResultCallback>,
    ) -> Pipeline {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                callback,
                last_error: None,
                stop_requested: false,
            }),
            notify: Notify::new(),
            depth: depth.max(1),
            inference_timeout,
        });
        let reader = tokio::spawn(reader_loop(source, Arc::clone(&shared)));
        Pipeline {
            shared,
            reader: Some(reader),
        }
    }

    /// Install or remove the result callback.
    ///
    /// Removing it while results are outstanding fails with
    /// [`ClientError::IncorrectApiUse`]: the receiver would race the
    /// caller for dispatch.
    pub(crate) fn install_callback(&self, callback: Option<ResultCallback>) -> Result<()> {
        let mut st = self.shared.lock();
        if callback.is_none() && !st.pending.is_empty() {
            return Err(ClientError::IncorrectApiUse(
                "cannot remove the result callback while results are outstanding".into(),
            ));
        }
        st.callback = callback;
        Ok(())
    }

    pub(crate) fn has_callback(&self) -> bool {
        self.shared.lock().callback.is_some()
    }

    /// Number of frames submitted but not yet dispatched.
    pub(crate) fn outstanding(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// The sticky error of this streaming session, if any.
    pub(crate) fn last_error(&self) -> Option<String> {
        self.shared.lock().last_error.clone()
    }

    /// Reserve a window slot for one frame, blocking while the window is
    /// full, bounded by the inference timeout.
    ///
    /// Returns `Ok(true)` when the slot is taken and the caller should
    /// write the frame bytes, `Ok(false)` when a sticky error is set and
    /// the frame must be dropped silently. Deadline expiry fails the
    /// pipeline and returns [`ClientError::Timeout`].
    pub(crate) async fn acquire_slot(&self, tag: &str) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + self.shared.inference_timeout;
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            {
                let mut st = self.shared.lock();
                if st.last_error.is_some() {
                    return Ok(false);
                }
                if st.stop_requested {
                    return Err(ClientError::IncorrectApiUse(
                        "submit while the stream is finishing".into(),
                    ));
                }
                if st.pending.len() < self.shared.depth {
                    st.pending.push_back(tag.to_string());
                    drop(st);
                    // Wake the receiver: a frame is now outstanding.
                    self.shared.notify.notify_waiters();
                    return Ok(true);
                }
                notified.as_mut().enable();
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let msg = format!(
                    "timed out after {:?} waiting for a free slot in the frame queue",
                    self.shared.inference_timeout
                );
                self.shared.fail(msg.clone());
                return Err(ClientError::Timeout(msg));
            }
        }
    }

    /// Undo [`Pipeline::acquire_slot`] after the frame bytes failed to
    /// reach the socket, and make the write failure the sticky error.
    pub(crate) fn abandon_slot(&self, msg: String) {
        {
            let mut st = self.shared.lock();
            st.pending.pop_back();
        }
        self.shared.fail(msg);
    }

    /// Drain barrier: block until every outstanding frame has been
    /// dispatched or the sticky error is set, then re-open the gate so a
    /// still-open stream accepts further submissions.
    ///
    /// Never reports the sticky error itself; read
    /// [`Pipeline::last_error`]. Idempotent.
    pub(crate) async fn finish(&self) {
        {
            let mut st = self.shared.lock();
            st.stop_requested = true;
        }
        self.shared.notify.notify_waiters();
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            {
                let mut st = self.shared.lock();
                if st.pending.is_empty() || st.last_error.is_some() {
                    st.stop_requested = false;
                    return;
                }
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Force-cancel the receiver task. Called on close and drop; a
    /// graceful drain happens through [`Pipeline::finish`] first.
    pub(crate) fn shutdown(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn reader_loop<S: ResultSource>(mut source: S, shared: Arc<Shared>) {
    loop {
        // Park until a frame is outstanding. The task exits only through
        // the sticky error (or an abort from `shutdown`).
        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            {
                let st = shared.lock();
                if st.last_error.is_some() {
                    return;
                }
                if !st.pending.is_empty() {
                    break;
                }
                notified.as_mut().enable();
            }
            notified.await;
        }

        let reply = tokio::time::timeout(shared.inference_timeout, source.next_result()).await;
        let doc = match reply {
            Err(_) => {
                shared.fail(format!(
                    "timed out after {:?} waiting for an inference result",
                    shared.inference_timeout
                ));
                return;
            }
            Ok(Err(e)) => {
                shared.fail(e.to_string());
                return;
            }
            Ok(Ok(doc)) => doc,
        };

        let server_error = codec::error_message(&doc);
        let (tag, callback) = {
            let mut st = shared.lock();
            let tag = st.pending.pop_front();
            let callback = st.callback.clone();
            if let Some(msg) = &server_error {
                tracing::debug!(error = %msg, "server reported a stream error");
                st.last_error = Some(msg.clone());
                st.stop_requested = true;
                st.pending.clear();
            }
            (tag, callback)
        };

        // Dispatch outside the lock; the callback is treated as hostile
        // code, so a panic in it must not take the receiver down.
        if let (Some(tag), Some(callback)) = (tag, callback) {
            let _ = catch_unwind(AssertUnwindSafe(|| callback(doc, &tag)));
        }
        shared.notify.notify_waiters();

        // The first error ends the session; replies to frames that were
        // already queued are never dispatched.
        if server_error.is_some() {
            return;
        }
    }
}
