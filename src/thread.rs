//! Thread roles and render-thread affinity checks.
//!
//! The render core runs on a small set of long-lived threads: a game thread,
//! a render thread that owns every GPU call, and task threads that never touch
//! the GPU. A thread declares its role once with [`bind_current_thread`];
//! render-thread-only entry points then use [`assert_render_thread!`], which is
//! a debug-build check that the caller is not bound to a different role.
//!
//! Threads that never declared a role pass the check. This keeps tests and
//! single-threaded tools free of ceremony.

use std::cell::Cell;

/// The fixed responsibility of a long-lived engine thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadRole {
    /// Gameplay logic, entity/light/material mutation.
    Game,
    /// GPU command recording, descriptor writes, resource creation/destruction.
    Render,
    /// Parallel work that must not touch the GPU.
    Task,
}

thread_local! {
    static CURRENT_ROLE: Cell<Option<ThreadRole>> = const { Cell::new(None) };
}

/// Bind the calling thread to a role for the rest of its life.
pub fn bind_current_thread(role: ThreadRole) {
    CURRENT_ROLE.with(|current| {
        if let Some(existing) = current.get() {
            if existing != role {
                log::warn!("thread rebound from {:?} to {:?}", existing, role);
            }
        }
        current.set(Some(role));
    });
    log::debug!("thread {:?} bound as {:?}", std::thread::current().id(), role);
}

/// Role of the calling thread, if it declared one.
pub fn current_role() -> Option<ThreadRole> {
    CURRENT_ROLE.with(|current| current.get())
}

/// Whether the calling thread may perform render-thread work.
pub fn is_render_thread() -> bool {
    matches!(current_role(), None | Some(ThreadRole::Render))
}

/// Debug-build assertion that the caller runs on the render thread.
#[macro_export]
macro_rules! assert_render_thread {
    () => {
        debug_assert!(
            $crate::thread::is_render_thread(),
            "render-thread-only call made from {:?} thread",
            $crate::thread::current_role()
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_thread_is_allowed() {
        let allowed = std::thread::spawn(is_render_thread).join().unwrap();
        assert!(allowed);
    }

    #[test]
    fn test_game_thread_is_rejected() {
        let allowed = std::thread::spawn(|| {
            bind_current_thread(ThreadRole::Game);
            is_render_thread()
        })
        .join()
        .unwrap();
        assert!(!allowed);
    }

    #[test]
    #[cfg(debug_assertions)]
    fn test_assertion_fires_on_task_thread() {
        let result = std::thread::spawn(|| {
            bind_current_thread(ThreadRole::Task);
            crate::assert_render_thread!();
        })
        .join();
        assert!(result.is_err());
    }
}
