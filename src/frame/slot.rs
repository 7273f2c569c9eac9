use std::sync::Arc;

use crate::backend::{CommandBufferHandle, CommandBufferUsage, GpuBackend, PipelineStages};
use crate::error::RenderResult;
use crate::lifecycle::DeferredRelease;

use super::command_buffer::CommandBuffer;
use super::sync::{Fence, Semaphore, SemaphoreChain};

/// Where a frame slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    Submitted,
}

/// One frame-in-flight slot: a primary command buffer, the fence gating its
/// reuse and the acquire/present semaphore pair.
#[derive(Debug)]
pub struct Frame {
    index: usize,
    command_buffer: CommandBuffer,
    fence: Fence,
    present_semaphores: SemaphoreChain,
    state: FrameState,
}

impl Frame {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            command_buffer: CommandBuffer::primary(),
            fence: Fence::new(),
            present_semaphores: SemaphoreChain::new(),
            state: FrameState::Idle,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    pub fn command_buffer_mut(&mut self) -> &mut CommandBuffer {
        &mut self.command_buffer
    }

    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// Waits on the acquired image, signals presentation.
    pub fn present_semaphores(&self) -> &SemaphoreChain {
        &self.present_semaphores
    }

    pub fn present_semaphores_mut(&mut self) -> &mut SemaphoreChain {
        &mut self.present_semaphores
    }

    pub fn create(
        &mut self,
        backend: &mut dyn GpuBackend,
        deferred: &Arc<DeferredRelease>,
    ) -> RenderResult<()> {
        self.command_buffer.create(backend)?;
        // Signaled so the first wait on this slot returns immediately.
        if let Err(err) = self.fence.create(backend, true) {
            self.command_buffer.destroy(backend);
            return Err(err);
        }
        let semaphores = Semaphore::create(backend, deferred).and_then(|acquired| {
            Semaphore::create(backend, deferred).map(|finished| (acquired, finished))
        });
        let (acquired, finished) = match semaphores {
            Ok(pair) => pair,
            Err(err) => {
                self.fence.destroy(backend);
                self.command_buffer.destroy(backend);
                return Err(err);
            }
        };
        self.present_semaphores
            .waits_for(acquired, PipelineStages::COLOR_ATTACHMENT_OUTPUT)
            .signals_to(finished);
        self.state = FrameState::Idle;
        log::trace!("Created frame {}", self.index);
        Ok(())
    }

    /// Destroy the fence and command buffer. Semaphores go through deferred
    /// release as their last reference drops.
    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        assert_ne!(
            self.state,
            FrameState::Submitted,
            "frame {} destroyed before its fence was waited on",
            self.index
        );
        self.present_semaphores.clear();
        self.fence.destroy(backend);
        self.command_buffer.destroy(backend);
    }

    /// Block until the last submission from this slot has completed.
    pub fn wait(&mut self, backend: &mut dyn GpuBackend, timeout_ns: u64) -> RenderResult<()> {
        self.fence.wait(backend, timeout_ns)?;
        self.command_buffer.mark_complete();
        self.state = FrameState::Idle;
        Ok(())
    }

    /// Reset and begin the command buffer. The slot's fence must have been
    /// waited on.
    pub fn begin_capture(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<CommandBufferHandle> {
        assert_eq!(
            self.state,
            FrameState::Idle,
            "frame {} recorded while its previous submission is in flight",
            self.index
        );
        self.command_buffer.reset(backend)?;
        self.command_buffer
            .begin(backend, CommandBufferUsage::ONE_TIME_SUBMIT, None)?;
        self.state = FrameState::Recording;
        Ok(self.command_buffer.handle())
    }

    pub fn end_capture(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        self.command_buffer.end(backend)
    }

    /// Submit the recorded commands with the frame's semaphores, signaling the
    /// frame fence.
    pub fn submit(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        assert_eq!(self.state, FrameState::Recording);
        self.command_buffer
            .submit_primary(backend, &self.present_semaphores, Some(&self.fence))?;
        self.state = FrameState::Submitted;
        Ok(())
    }
}
