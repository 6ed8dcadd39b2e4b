//! Wait-group over spawned tasks.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Tracks every task the queue spawns so [`RoutineGroup::wait`] can block
/// until the last one finishes.
///
/// The active count is released by a guard dropped inside the spawned task,
/// so a panicking task still checks out and `wait` cannot wedge.
#[derive(Default)]
pub(crate) struct RoutineGroup {
    inner: Arc<GroupInner>,
}

#[derive(Default)]
struct GroupInner {
    active: AtomicUsize,
    idle: Notify,
}

impl RoutineGroup {
    /// Spawn `fut` on the runtime and track it until completion.
    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Count the task before it is spawned so a wait() racing the spawn
        // still sees it.
        let guard = ActiveGuard::enter(Arc::clone(&self.inner));
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    /// Resolve once every spawned task has finished.
    pub(crate) async fn wait(&self) {
        loop {
            let idle = self.inner.idle.notified();
            if self.inner.active.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }
}

struct ActiveGuard(Arc<GroupInner>);

impl ActiveGuard {
    fn enter(inner: Arc<GroupInner>) -> Self {
        inner.active.fetch_add(1, Ordering::AcqRel);
        Self(inner)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_with_no_tasks() {
        let group = RoutineGroup::default();
        group.wait().await;
    }

    #[tokio::test]
    async fn wait_blocks_until_all_tasks_finish() {
        let group = RoutineGroup::default();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let done = Arc::clone(&done);
            group.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        group.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn panicking_task_is_still_released() {
        let group = RoutineGroup::default();

        group.spawn(async {
            panic!("boom");
        });
        group.spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        });

        tokio::time::timeout(Duration::from_secs(1), group.wait())
            .await
            .expect("wait should not wedge on a panicked task");
    }
}
