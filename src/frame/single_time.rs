use crate::backend::{CommandBufferHandle, CommandBufferUsage, GpuBackend};
use crate::config::DEFAULT_FENCE_TIMEOUT_NS;
use crate::error::RenderResult;

use super::command_buffer::CommandBuffer;
use super::sync::{Fence, SemaphoreChain};

type RecordFn<'a> =
    Box<dyn FnOnce(&mut dyn GpuBackend, CommandBufferHandle) -> RenderResult<()> + 'a>;

/// A blocking one-shot submission.
///
/// Recording functions are queued with [`push`](Self::push) and run in order
/// into a fresh primary command buffer by [`execute`](Self::execute), which
/// waits for the GPU before returning. Used for uploads, mipmap generation and
/// acceleration structure builds; never in the per-frame path.
pub struct SingleTimeCommands<'a> {
    functions: Vec<RecordFn<'a>>,
    timeout_ns: u64,
}

impl<'a> SingleTimeCommands<'a> {
    pub fn new() -> Self {
        Self {
            functions: Vec::new(),
            timeout_ns: DEFAULT_FENCE_TIMEOUT_NS,
        }
    }

    pub fn with_timeout(mut self, timeout_ns: u64) -> Self {
        self.timeout_ns = timeout_ns;
        self
    }

    pub fn push<F>(&mut self, record: F)
    where
        F: FnOnce(&mut dyn GpuBackend, CommandBufferHandle) -> RenderResult<()> + 'a,
    {
        self.functions.push(Box::new(record));
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn execute(self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        crate::assert_render_thread!();
        let mut cmd = CommandBuffer::primary();
        cmd.create(backend)?;
        let mut fence = Fence::new();
        if let Err(err) = fence.create(backend, false) {
            cmd.destroy(backend);
            return Err(err);
        }

        let result = Self::record_and_submit(self.functions, backend, &mut cmd, &fence)
            .and_then(|_| fence.wait(backend, self.timeout_ns));
        cmd.mark_complete();
        if result.is_err() {
            // The submission may still be running; idle before freeing.
            if let Err(err) = backend.wait_idle() {
                log::error!("wait_idle after failed single-time submission: {}", err);
            }
        }

        fence.destroy(backend);
        cmd.destroy(backend);
        result
    }

    fn record_and_submit(
        functions: Vec<RecordFn<'a>>,
        backend: &mut dyn GpuBackend,
        cmd: &mut CommandBuffer,
        fence: &Fence,
    ) -> RenderResult<()> {
        cmd.begin(backend, CommandBufferUsage::ONE_TIME_SUBMIT, None)?;
        let handle = cmd.handle();
        for record in functions {
            if let Err(err) = record(backend, handle) {
                if let Err(end_err) = cmd.end(backend) {
                    log::error!("Ending aborted single-time command buffer: {}", end_err);
                }
                return Err(err);
            }
        }
        cmd.end(backend)?;
        cmd.submit_primary(backend, &SemaphoreChain::new(), Some(fence))
    }
}

impl Default for SingleTimeCommands<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, DummyBackend, DummyOp};
    use crate::error::RenderError;

    #[test]
    fn test_functions_run_in_order() {
        let mut backend = DummyBackend::new();
        let mut commands = SingleTimeCommands::new();
        commands.push(|backend, cmd| {
            backend.cmd_dispatch(cmd, 1, 1, 1);
            Ok(())
        });
        commands.push(|backend, cmd| {
            backend.cmd_dispatch(cmd, 2, 1, 1);
            Ok(())
        });
        commands.execute(&mut backend).unwrap();

        let dispatches: Vec<u32> = backend
            .ops()
            .iter()
            .filter_map(|op| match op {
                DummyOp::Dispatch { x, .. } => Some(*x),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches, vec![1, 2]);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_failure_cleans_up() {
        let mut backend = DummyBackend::new();
        let mut commands = SingleTimeCommands::new();
        commands.push(|_, _| Err(RenderError::NotCreated("geometry")));
        let err = commands.execute(&mut backend).unwrap_err();
        assert_eq!(err, RenderError::NotCreated("geometry"));
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_submit_failure_cleans_up() {
        let mut backend = DummyBackend::new();
        backend.fail_call("submit", 0, BackendError::DeviceLost);
        let commands = SingleTimeCommands::new();
        assert!(commands.execute(&mut backend).is_err());
        assert_eq!(backend.live_object_count(), 0);
    }
}
