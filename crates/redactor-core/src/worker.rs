//! Document engine on a dedicated thread
//!
//! A [`DocumentHandle`] forwards [`DocumentRequest`]s over a tokio channel to
//! one worker thread that owns the engine, so requests are processed strictly
//! one at a time. Mutations additionally wait for the previous mutation's
//! reply before being dispatched.
//!
//! A request that times out is never cancelled on the worker. Instead the
//! handle is marked unresponsive and refuses further work until
//! [`DocumentHandle::restart`] replaces the worker and reloads the document.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::command::{DocumentRequest, DocumentResponse, DocumentService};
use crate::document::{DocumentEngine, PdfDocument};
use crate::error::{RedactError, Result};

const QUEUE_DEPTH: usize = 16;

struct Job {
    request: DocumentRequest,
    reply: oneshot::Sender<DocumentResponse>,
}

type Spawner = fn() -> Result<mpsc::Sender<Job>>;

fn spawn_worker<E: DocumentEngine + 'static>() -> Result<mpsc::Sender<Job>> {
    let (sender, mut receiver) = mpsc::channel::<Job>(QUEUE_DEPTH);
    thread::Builder::new()
        .name("document-worker".to_string())
        .spawn(move || {
            let mut service = DocumentService::<E>::new();
            while let Some(job) = receiver.blocking_recv() {
                let response = service.handle(job.request);
                if job.reply.send(response).is_err() {
                    tracing::debug!("Requester went away before the reply");
                }
            }
            tracing::debug!("Document worker stopped");
        })
        .map_err(|e| RedactError::EngineUnavailable(format!("Failed to start worker: {}", e)))?;
    Ok(sender)
}

pub struct DocumentHandle {
    sender: mpsc::Sender<Job>,
    spawner: Spawner,
    mutations: Arc<Mutex<()>>,
    unresponsive: AtomicBool,
    timeout: Option<Duration>,
}

impl DocumentHandle {
    /// Worker hosting a [`PdfDocument`].
    pub fn spawn(timeout: Option<Duration>) -> Result<Self> {
        Self::spawn_with::<PdfDocument>(timeout)
    }

    pub fn spawn_with<E: DocumentEngine + 'static>(timeout: Option<Duration>) -> Result<Self> {
        let spawner: Spawner = spawn_worker::<E>;
        Ok(Self {
            sender: spawner()?,
            spawner,
            mutations: Arc::new(Mutex::new(())),
            unresponsive: AtomicBool::new(false),
            timeout,
        })
    }

    pub fn is_responsive(&self) -> bool {
        !self.unresponsive.load(Ordering::SeqCst)
    }

    fn unavailable(&self, reason: String) -> RedactError {
        self.unresponsive.store(true, Ordering::SeqCst);
        tracing::warn!("Document worker marked unresponsive: {}", reason);
        RedactError::EngineUnavailable(reason)
    }

    /// Send one request and wait for its reply.
    pub async fn request(&self, request: DocumentRequest) -> Result<DocumentResponse> {
        if !self.is_responsive() {
            return Err(RedactError::EngineUnavailable(
                "Worker is unresponsive; restart it and reload the document".to_string(),
            ));
        }

        let _guard = if request.is_mutation() {
            Some(self.mutations.lock().await)
        } else {
            None
        };

        let (reply, response) = oneshot::channel();
        self.sender
            .send(Job { request, reply })
            .await
            .map_err(|_| self.unavailable("Worker has stopped".to_string()))?;

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, response)
                .await
                .map_err(|_| self.unavailable(format!("No reply within {:?}", limit)))?,
            None => response.await,
        };
        response.map_err(|_| self.unavailable("Worker dropped the request".to_string()))
    }

    /// Replace the worker and reload the last known-good bytes into it.
    pub async fn restart(&mut self, last_good_bytes: Vec<u8>) -> Result<u32> {
        tracing::info!("Restarting document worker");
        self.sender = (self.spawner)()?;
        self.unresponsive.store(false, Ordering::SeqCst);
        self.load(last_good_bytes).await
    }

    pub async fn load(&self, bytes: Vec<u8>) -> Result<u32> {
        match self.request(DocumentRequest::Load { bytes }).await? {
            DocumentResponse::Loaded { page_count } => Ok(page_count),
            other => Err(unexpected(other)),
        }
    }
}

/// Turn anything but the expected response into an error.
pub fn unexpected(response: DocumentResponse) -> RedactError {
    match response {
        DocumentResponse::Error { message, .. } => RedactError::OperationError(message),
        other => RedactError::OperationError(format!("Unexpected response: {:?}", other)),
    }
}
