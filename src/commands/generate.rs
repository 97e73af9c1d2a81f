use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GeneratorError, Result};
use crate::request::GenerationRequest;
use crate::stream::{
    ChatCompletionsFormat, DeltaFormat, DuplicatePolicy, Flow, GeneratedFile, StreamSession,
    StreamSink,
};

/// Events streamed from a generation to whoever is displaying it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "event", content = "data")]
pub enum GenerationEvent {
    Chunk { text: String },
    File { file: GeneratedFile },
    Complete,
    Error { message: String },
}

/// Receives the results of one generation.
///
/// `on_chunk` and `on_file` may fire many times; exactly one of
/// `on_complete` / `on_error` fires, once, at the end.
pub trait GenerationObserver: Send + 'static {
    fn on_chunk(&mut self, text: &str);
    fn on_file(&mut self, file: GeneratedFile);
    fn on_complete(&mut self);
    fn on_error(&mut self, message: &str);
}

// A closed receiver only means nobody is listening any more.
impl GenerationObserver for mpsc::UnboundedSender<GenerationEvent> {
    fn on_chunk(&mut self, text: &str) {
        let _ = self.send(GenerationEvent::Chunk {
            text: text.to_string(),
        });
    }

    fn on_file(&mut self, file: GeneratedFile) {
        let _ = self.send(GenerationEvent::File { file });
    }

    fn on_complete(&mut self) {
        let _ = self.send(GenerationEvent::Complete);
    }

    fn on_error(&mut self, message: &str) {
        let _ = self.send(GenerationEvent::Error {
            message: message.to_string(),
        });
    }
}

/// Adapts an observer to the streaming core's sink.
struct ObserverSink<'a, O>(&'a mut O);

impl<O: GenerationObserver> StreamSink for ObserverSink<'_, O> {
    fn chunk(&mut self, text: &str) {
        self.0.on_chunk(text);
    }

    fn file(&mut self, file: GeneratedFile) {
        self.0.on_file(file);
    }
}

/// Handle to a running generation.
pub struct GenerationHandle {
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl GenerationHandle {
    fn detached() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            task: None,
        }
    }

    /// Cancels the generation. The in-flight read is dropped and the
    /// observer receives `on_complete`. Calling it again does nothing.
    pub fn abort(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.wake.notify_one();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until the observer has received its terminal callback.
    pub async fn wait(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "generation task did not finish cleanly");
            }
        }
    }
}

/// Client for the script generation endpoint.
#[derive(Clone)]
pub struct GenerationClient {
    endpoint: String,
    api_key: Option<String>,
    http: reqwest::Client,
    format: Arc<dyn DeltaFormat>,
    policy: DuplicatePolicy,
}

impl GenerationClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            http: reqwest::Client::new(),
            format: Arc::new(ChatCompletionsFormat),
            policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_format(mut self, format: Arc<dyn DeltaFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Starts a generation on the current tokio runtime.
    ///
    /// An invalid request is reported through `on_error` before this
    /// returns, and no connection is opened.
    pub fn start<O: GenerationObserver>(
        &self,
        request: GenerationRequest,
        mut observer: O,
    ) -> GenerationHandle {
        if let Err(e) = request.validate() {
            warn!(mode = ?request.mode(), error = %e, "rejected generation request");
            observer.on_error(&e.to_string());
            return GenerationHandle::detached();
        }

        let mut handle = GenerationHandle::detached();
        let run = Run {
            client: self.clone(),
            cancelled: handle.cancelled.clone(),
            wake: handle.wake.clone(),
        };
        handle.task = Some(tokio::spawn(run.drive(request, observer)));
        handle
    }
}

/// State moved into the spawned read loop.
struct Run {
    client: GenerationClient,
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Run {
    async fn drive<O: GenerationObserver>(self, request: GenerationRequest, mut observer: O) {
        info!(
            mode = ?request.mode(),
            script = %request.script_name(),
            endpoint = %self.client.endpoint,
            "starting generation"
        );

        let result = self.stream(&request, &mut observer).await;

        if self.cancelled.load(Ordering::SeqCst) {
            info!("generation aborted");
            observer.on_complete();
            return;
        }
        match result {
            Ok(()) => {
                info!("generation complete");
                observer.on_complete();
            }
            Err(e) => {
                warn!(error = %e, "generation failed");
                observer.on_error(&e.to_string());
            }
        }
    }

    async fn stream<O: GenerationObserver>(
        &self,
        request: &GenerationRequest,
        observer: &mut O,
    ) -> Result<()> {
        let mut post = self.client.http.post(&self.client.endpoint).json(request);
        if let Some(key) = &self.client.api_key {
            post = post.bearer_auth(key);
        }

        let response = tokio::select! {
            biased;
            _ = self.wake.notified() => return Ok(()),
            response = post.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(GeneratorError::from_status(status));
        }
        if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::RESET_CONTENT {
            return Err(GeneratorError::StartFailed);
        }

        let mut session = StreamSession::new(self.client.format.clone(), self.client.policy)
            .with_cancel_flag(self.cancelled.clone());
        let mut sink = ObserverSink(observer);
        let mut body = response.bytes_stream();

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = self.wake.notified() => return Ok(()),
                next = body.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    debug!(bytes = bytes.len(), "received chunk");
                    if session.feed(&bytes, &mut sink) == Flow::Finished {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    session.finish(&mut sink);
                    break;
                }
            }
        }

        debug!(chars = session.full_text().len(), "stream drained");
        Ok(())
    }
}
