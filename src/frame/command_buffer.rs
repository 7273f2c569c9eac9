use crate::backend::{
    CommandBufferHandle, CommandBufferInheritance, CommandBufferLevel, CommandBufferUsage,
    GpuBackend, SubmitInfo,
};
use crate::error::{RenderError, RenderResult};
use crate::lifecycle::{DeferredRelease, ReleasedObject};

use super::sync::{Fence, SemaphoreChain};

/// Recording state of a [`CommandBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    /// Submitted and not yet known to be complete.
    Pending,
}

/// A primary or secondary command buffer with its recording state.
#[derive(Debug)]
pub struct CommandBuffer {
    level: CommandBufferLevel,
    handle: Option<CommandBufferHandle>,
    state: CommandBufferState,
}

impl CommandBuffer {
    pub fn new(level: CommandBufferLevel) -> Self {
        Self {
            level,
            handle: None,
            state: CommandBufferState::Initial,
        }
    }

    pub fn primary() -> Self {
        Self::new(CommandBufferLevel::Primary)
    }

    pub fn secondary() -> Self {
        Self::new(CommandBufferLevel::Secondary)
    }

    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    pub fn handle(&self) -> CommandBufferHandle {
        match self.handle {
            Some(handle) => handle,
            None => panic!("command buffer used before create"),
        }
    }

    pub fn create(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        assert!(self.handle.is_none(), "command buffer created twice");
        self.handle = Some(backend.allocate_command_buffer(self.level)?);
        self.state = CommandBufferState::Initial;
        Ok(())
    }

    pub fn destroy(&mut self, backend: &mut dyn GpuBackend) {
        assert_ne!(
            self.state,
            CommandBufferState::Pending,
            "command buffer destroyed while its submission is in flight"
        );
        let Some(handle) = self.handle.take() else {
            panic!("command buffer destroyed before create or twice");
        };
        backend.free_command_buffer(handle);
    }

    pub fn release(&mut self, deferred: &DeferredRelease) {
        if let Some(handle) = self.handle.take() {
            deferred.release(ReleasedObject::CommandBuffer(handle));
        }
    }

    /// Begin recording.
    ///
    /// Secondary buffers must be told the attachments of the pass they will
    /// run inside; primaries must not be.
    pub fn begin(
        &mut self,
        backend: &mut dyn GpuBackend,
        usage: CommandBufferUsage,
        inheritance: Option<&CommandBufferInheritance>,
    ) -> RenderResult<()> {
        crate::assert_render_thread!();
        match (self.level, inheritance) {
            (CommandBufferLevel::Secondary, None) => {
                return Err(RenderError::InvalidParameter(
                    "secondary command buffer requires inheritance info".to_string(),
                ))
            }
            (CommandBufferLevel::Primary, Some(_)) => {
                return Err(RenderError::InvalidParameter(
                    "primary command buffer cannot inherit a render pass".to_string(),
                ))
            }
            _ => {}
        }
        assert!(
            matches!(
                self.state,
                CommandBufferState::Initial | CommandBufferState::Executable
            ),
            "begin on a command buffer in state {:?}",
            self.state
        );
        backend.begin_command_buffer(self.handle(), usage, inheritance)?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        assert_eq!(
            self.state,
            CommandBufferState::Recording,
            "end on a command buffer that is not recording"
        );
        backend.end_command_buffer(self.handle())?;
        self.state = CommandBufferState::Executable;
        Ok(())
    }

    /// Begin, run `record`, end. The buffer is left recording if `record`
    /// fails.
    pub fn record<F>(
        &mut self,
        backend: &mut dyn GpuBackend,
        usage: CommandBufferUsage,
        inheritance: Option<&CommandBufferInheritance>,
        record: F,
    ) -> RenderResult<()>
    where
        F: FnOnce(&mut dyn GpuBackend, CommandBufferHandle) -> RenderResult<()>,
    {
        self.begin(backend, usage, inheritance)?;
        record(backend, self.handle())?;
        self.end(backend)
    }

    /// Return to the initial state. Never valid while the last submission is
    /// pending; wait on its fence and call [`CommandBuffer::mark_complete`]
    /// first.
    pub fn reset(&mut self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        assert_ne!(
            self.state,
            CommandBufferState::Pending,
            "command buffer reset while its submission is in flight"
        );
        backend.reset_command_buffer(self.handle())?;
        self.state = CommandBufferState::Initial;
        Ok(())
    }

    /// Record the secondaries into this primary buffer.
    pub fn execute_secondaries(
        &mut self,
        backend: &mut dyn GpuBackend,
        secondaries: &[&CommandBuffer],
    ) {
        assert_eq!(self.level, CommandBufferLevel::Primary);
        assert_eq!(self.state, CommandBufferState::Recording);
        let handles: Vec<CommandBufferHandle> = secondaries
            .iter()
            .map(|secondary| {
                assert_eq!(
                    secondary.level,
                    CommandBufferLevel::Secondary,
                    "only secondary command buffers can be executed"
                );
                assert_eq!(
                    secondary.state,
                    CommandBufferState::Executable,
                    "secondary command buffer executed before end"
                );
                secondary.handle()
            })
            .collect();
        backend.cmd_execute_commands(self.handle(), &handles);
    }

    /// Submit with the chain's waits and signals, signaling `fence` on
    /// completion.
    pub fn submit_primary(
        &mut self,
        backend: &mut dyn GpuBackend,
        chain: &SemaphoreChain,
        fence: Option<&Fence>,
    ) -> RenderResult<()> {
        crate::assert_render_thread!();
        assert_eq!(
            self.level,
            CommandBufferLevel::Primary,
            "only primary command buffers are submitted"
        );
        assert_eq!(
            self.state,
            CommandBufferState::Executable,
            "submit of a command buffer that was not ended"
        );
        let waits = chain.wait_handles();
        let signals = chain.signal_handles();
        backend.submit(&SubmitInfo {
            command_buffers: &[self.handle()],
            waits: &waits,
            signals: &signals,
            fence: fence.map(Fence::handle),
        })?;
        self.state = CommandBufferState::Pending;
        Ok(())
    }

    /// Note that the fence of the last submission has been waited on.
    pub fn mark_complete(&mut self) {
        if self.state == CommandBufferState::Pending {
            self.state = CommandBufferState::Executable;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyOp, Format};

    #[test]
    fn test_secondary_requires_inheritance() {
        let mut backend = DummyBackend::new();
        let mut secondary = CommandBuffer::secondary();
        secondary.create(&mut backend).unwrap();
        let err = secondary
            .begin(&mut backend, CommandBufferUsage::empty(), None)
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidParameter(_)));
        secondary.destroy(&mut backend);
    }

    #[test]
    fn test_primary_rejects_inheritance() {
        let mut backend = DummyBackend::new();
        let mut primary = CommandBuffer::primary();
        primary.create(&mut backend).unwrap();
        let inheritance = CommandBufferInheritance::default();
        assert!(primary
            .begin(&mut backend, CommandBufferUsage::empty(), Some(&inheritance))
            .is_err());
        primary.destroy(&mut backend);
    }

    #[test]
    fn test_execute_secondaries() {
        let mut backend = DummyBackend::new();
        let inheritance = CommandBufferInheritance {
            color_formats: vec![Format::Bgra8Srgb],
            depth_format: None,
        };
        let mut secondary = CommandBuffer::secondary();
        secondary.create(&mut backend).unwrap();
        secondary
            .record(
                &mut backend,
                CommandBufferUsage::RENDER_PASS_CONTINUE,
                Some(&inheritance),
                |backend, cmd| {
                    backend.cmd_dispatch(cmd, 1, 1, 1);
                    Ok(())
                },
            )
            .unwrap();

        let mut primary = CommandBuffer::primary();
        primary.create(&mut backend).unwrap();
        primary
            .begin(&mut backend, CommandBufferUsage::ONE_TIME_SUBMIT, None)
            .unwrap();
        primary.execute_secondaries(&mut backend, &[&secondary]);
        primary.end(&mut backend).unwrap();

        assert!(backend.ops().iter().any(|op| matches!(
            op,
            DummyOp::ExecuteCommands { secondaries, .. } if secondaries == &vec![secondary.handle()]
        )));
        primary.destroy(&mut backend);
        secondary.destroy(&mut backend);
    }

    #[test]
    #[should_panic(expected = "reset while its submission is in flight")]
    fn test_reset_while_pending_panics() {
        let mut backend = DummyBackend::new();
        let mut fence = Fence::new();
        fence.create(&mut backend, false).unwrap();
        let mut cmd = CommandBuffer::primary();
        cmd.create(&mut backend).unwrap();
        cmd.record(&mut backend, CommandBufferUsage::empty(), None, |_, _| Ok(()))
            .unwrap();
        cmd.submit_primary(&mut backend, &SemaphoreChain::new(), Some(&fence))
            .unwrap();
        cmd.reset(&mut backend).unwrap();
    }
}
