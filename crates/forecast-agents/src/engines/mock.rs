//! Hand-written collaborators for engine unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::errors::GenerationError;
use crate::generation::{GenerationRequest, TextGenerator};

type Responder = Box<dyn Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync>;

/// Answers every request through a closure and counts calls.
pub struct Scripted {
    respond: Responder,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(
        respond: impl Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::new(|_| Err(GenerationError::Transport("connection refused".into())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(request)
    }
}

/// Never answers.
pub struct Hanging;

#[async_trait]
impl TextGenerator for Hanging {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        std::future::pending().await
    }
}
