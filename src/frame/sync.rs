//! Fences, shared semaphores and semaphore chains.

use std::sync::Arc;

use crate::backend::{FenceHandle, FenceWait, GpuBackend, PipelineStages, SemaphoreHandle};
use crate::error::RenderResult;
use crate::lifecycle::{DeferredRelease, ReleasedObject};

/// CPU-GPU synchronization point signaled when a submission completes.
#[derive(Debug, Default)]
pub struct Fence {
    handle: Option<FenceHandle>,
}

impl Fence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend, signaled: bool) -> RenderResult<()> {
        assert!(self.handle.is_none(), "fence created twice");
        self.handle = Some(backend.create_fence(signaled)?);
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        let Some(handle) = self.handle.take() else {
            panic!("fence destroyed before create or twice");
        };
        backend.destroy_fence(handle);
    }

    pub fn is_created(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> FenceHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("fence used before create"),
        }
    }

    /// Block until the fence signals.
    ///
    /// A timeout is not an error: the wait is retried after logging. Only a
    /// backend failure ends the loop early.
    pub fn wait(&self, backend: &mut dyn GpuBackend, timeout_ns: u64) -> RenderResult<()> {
        let handle = self.handle();
        let mut attempts = 0u32;
        loop {
            match backend.wait_for_fence(handle, timeout_ns)? {
                FenceWait::Signaled => return Ok(()),
                FenceWait::Timeout => {
                    attempts += 1;
                    log::warn!(
                        "Fence {:?} not signaled after {} ms (attempt {}), waiting again",
                        handle,
                        timeout_ns / 1_000_000,
                        attempts
                    );
                }
            }
        }
    }

    pub fn reset(&self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        backend.reset_fence(self.handle())?;
        Ok(())
    }
}

/// A GPU-GPU semaphore shared between chains.
///
/// Held behind an `Arc`; the handle is handed to [`DeferredRelease`] when the
/// last reference drops, so a semaphore still waited on by an in-flight
/// submission outlives it.
#[derive(Debug)]
pub struct Semaphore {
    handle: SemaphoreHandle,
    deferred: Arc<DeferredRelease>,
}

impl Semaphore {
    pub fn create(
        backend: &mut dyn GpuBackend,
        deferred: &Arc<DeferredRelease>,
    ) -> RenderResult<Arc<Semaphore>> {
        let handle = backend.create_semaphore()?;
        Ok(Arc::new(Semaphore {
            handle,
            deferred: deferred.clone(),
        }))
    }

    pub fn handle(&self) -> SemaphoreHandle {
        self.handle
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.deferred
            .release(ReleasedObject::Semaphore(self.handle));
    }
}

/// The semaphores one submission waits on and signals.
///
/// Chains are composed with [`SemaphoreChain::link`], which makes one chain's
/// submission wait for everything another chain signals without either side
/// knowing about the other's submission order.
#[derive(Debug, Default, Clone)]
pub struct SemaphoreChain {
    waits: Vec<(Arc<Semaphore>, PipelineStages)>,
    signals: Vec<Arc<Semaphore>>,
}

impl SemaphoreChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waits_for(&mut self, semaphore: Arc<Semaphore>, stage: PipelineStages) -> &mut Self {
        self.waits.push((semaphore, stage));
        self
    }

    pub fn signals_to(&mut self, semaphore: Arc<Semaphore>) -> &mut Self {
        self.signals.push(semaphore);
        self
    }

    /// Make `waiter` wait at `stage` on every semaphore `signaler` signals.
    pub fn link(signaler: &SemaphoreChain, waiter: &mut SemaphoreChain, stage: PipelineStages) {
        for semaphore in &signaler.signals {
            let already = waiter
                .waits
                .iter()
                .any(|(existing, _)| existing.handle() == semaphore.handle());
            if !already {
                waiter.waits.push((semaphore.clone(), stage));
            }
        }
    }

    pub fn wait_semaphores(&self) -> &[(Arc<Semaphore>, PipelineStages)] {
        &self.waits
    }

    pub fn signal_semaphores(&self) -> &[Arc<Semaphore>] {
        &self.signals
    }

    pub fn wait_handles(&self) -> Vec<(SemaphoreHandle, PipelineStages)> {
        self.waits
            .iter()
            .map(|(semaphore, stage)| (semaphore.handle(), *stage))
            .collect()
    }

    pub fn signal_handles(&self) -> Vec<SemaphoreHandle> {
        self.signals.iter().map(|s| s.handle()).collect()
    }

    /// Drop every reference this chain holds.
    pub fn clear(&mut self) {
        self.waits.clear();
        self.signals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyOp};

    #[test]
    fn test_fence_wait_retries_on_timeout() {
        let mut backend = DummyBackend::new();
        let mut fence = Fence::new();
        fence.create(&mut backend, true).unwrap();
        backend.set_fence_timeouts(3);

        fence.wait(&mut backend, 1_000).unwrap();
        assert_eq!(
            backend.count_ops(|op| matches!(op, DummyOp::WaitForFence { .. })),
            4
        );
        fence.destroy(&mut backend);
    }

    #[test]
    fn test_semaphore_released_with_last_reference() {
        let mut backend = DummyBackend::new();
        let deferred = Arc::new(DeferredRelease::new());
        let semaphore = Semaphore::create(&mut backend, &deferred).unwrap();

        let mut producer = SemaphoreChain::new();
        let mut consumer = SemaphoreChain::new();
        producer.signals_to(semaphore.clone());
        SemaphoreChain::link(&producer, &mut consumer, PipelineStages::COMPUTE_SHADER);
        drop(semaphore);
        assert_eq!(deferred.pending_count(), 0);

        producer.clear();
        assert_eq!(deferred.pending_count(), 0);
        assert_eq!(consumer.wait_handles().len(), 1);

        consumer.clear();
        assert_eq!(deferred.pending_count(), 1);
        deferred.flush(&mut backend).unwrap();
        assert_eq!(
            backend.count_ops(|op| matches!(op, DummyOp::DestroySemaphore(_))),
            1
        );
    }

    #[test]
    fn test_link_is_idempotent() {
        let mut backend = DummyBackend::new();
        let deferred = Arc::new(DeferredRelease::new());
        let mut producer = SemaphoreChain::new();
        producer.signals_to(Semaphore::create(&mut backend, &deferred).unwrap());
        let mut consumer = SemaphoreChain::new();

        SemaphoreChain::link(&producer, &mut consumer, PipelineStages::ALL_COMMANDS);
        SemaphoreChain::link(&producer, &mut consumer, PipelineStages::ALL_COMMANDS);
        assert_eq!(consumer.wait_semaphores().len(), 1);
        assert_eq!(consumer.wait_handles()[0].0, producer.signal_handles()[0]);
    }
}
