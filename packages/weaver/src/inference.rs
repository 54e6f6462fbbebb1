//! Exclusively-owned handle around the generation capability.
//!
//! Local inference is memory- and compute-bound and not assumed to be
//! re-entrant, so every call from every chunk, document, batch and
//! concurrent scrape goes through one `InferenceHandle` and holds its lock
//! for the duration of the call. The lock is released when the call
//! returns, fails or times out.
//!
//! Lifecycle: [`InferenceHandle::new`] takes ownership of a generator;
//! [`InferenceHandle::shutdown`] waits for the in-flight call, tears the
//! backend down and makes every later call fail with
//! [`InferenceError::Unavailable`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{InferenceError, InferenceResult};
use crate::traits::generator::{GenerationRequest, Generator};

/// Cloneable, lock-serialized handle to one generator.
#[derive(Clone)]
pub struct InferenceHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    generator: Arc<dyn Generator>,
    lock: Mutex<()>,
    closed: AtomicBool,
}

impl InferenceHandle {
    /// Take ownership of a generator.
    pub fn new(generator: impl Generator + 'static) -> Self {
        Self::from_arc(Arc::new(generator))
    }

    /// Wrap a shared generator.
    ///
    /// The serialization guarantee only holds if every caller of the
    /// generator goes through this handle.
    pub fn from_arc(generator: Arc<dyn Generator>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                generator,
                lock: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        self.inner.generator.name()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Run one generation call under the lock, bounded by `request.timeout`.
    pub async fn generate(&self, request: &GenerationRequest) -> InferenceResult<String> {
        let _guard = self.inner.lock.lock().await;

        if self.is_closed() {
            return Err(InferenceError::Unavailable(
                "inference handle has been shut down".to_string(),
            ));
        }

        debug!(
            generator = self.name(),
            prompt_chars = request.prompt.len(),
            temperature = request.temperature,
            max_tokens = request.max_tokens,
            "Generation starting"
        );

        match tokio::time::timeout(request.timeout, self.inner.generator.generate(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    generator = self.name(),
                    timeout = ?request.timeout,
                    "Generation timed out"
                );
                Err(InferenceError::Timeout(request.timeout))
            }
        }
    }

    /// Tear the backend down. Idempotent.
    pub async fn shutdown(&self) -> InferenceResult<()> {
        let _guard = self.inner.lock.lock().await;

        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(generator = self.name(), "Shutting down generator");
        self.inner.generator.shutdown().await
    }
}

impl std::fmt::Debug for InferenceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceHandle")
            .field("generator", &self.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
