//! Hard ceiling on concurrently in-flight downloads per actor.
//!
//! Independent of the request-rate limiter: a counting semaphore keyed by
//! actor, not a sliding window. Exceeding the ceiling is a backpressure
//! signal, not a queue.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use autos_core::PipelineError;

pub struct DownloadGate {
    max_per_actor: usize,
    actors: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl DownloadGate {
    pub fn new(max_per_actor: usize) -> Self {
        Self {
            max_per_actor: max_per_actor.max(1),
            actors: Mutex::new(HashMap::new()),
        }
    }

    /// Take a download slot for `actor`. Fails immediately with `Capacity`
    /// when the actor is already at its ceiling; the permit releases the slot
    /// on drop.
    pub async fn acquire(&self, actor: &str) -> Result<OwnedSemaphorePermit, PipelineError> {
        let semaphore = {
            let mut actors = self.actors.lock().await;
            actors
                .entry(actor.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_actor)))
                .clone()
        };

        semaphore.try_acquire_owned().map_err(|_| {
            tracing::warn!(actor, max = self.max_per_actor, "Download gate saturated");
            PipelineError::Capacity(format!(
                "Actor {} already has {} downloads in flight",
                actor, self.max_per_actor
            ))
        })
    }

    /// Slots currently free for `actor`.
    pub async fn available(&self, actor: &str) -> usize {
        let actors = self.actors.lock().await;
        actors
            .get(actor)
            .map(|s| s.available_permits())
            .unwrap_or(self.max_per_actor)
    }
}
