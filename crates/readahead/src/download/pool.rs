use std::{
    future::Future,
    num::NonZeroU32,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{ReadaheadError, ReadaheadResult};

/// A fixed number of workers dedicated to one prefetch attempt.
///
/// Shutting the pool down aborts running work instead of draining it.
pub struct WorkerPool {
    size: NonZeroU32,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    shut_down: AtomicBool,
}

impl WorkerPool {
    pub fn new(size: NonZeroU32) -> Self {
        Self {
            size,
            permits: Arc::new(Semaphore::new(size.get() as usize)),
            tasks: Mutex::new(JoinSet::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn size(&self) -> NonZeroU32 {
        self.size
    }

    /// Waits for an idle worker and runs `task` on it.
    pub async fn spawn<F>(&self, task: F) -> ReadaheadResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ReadaheadError::PoolShutdown)?;
        if self.is_shut_down() {
            return Err(ReadaheadError::PoolShutdown);
        }

        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            task.await;
            drop(permit);
        });
        Ok(())
    }

    /// Waits until every spawned task has finished.
    pub async fn join(&self) -> ReadaheadResult<()> {
        let _all = self
            .permits
            .acquire_many(self.size.get())
            .await
            .map_err(|_| ReadaheadError::PoolShutdown)?;
        Ok(())
    }

    /// Tasks spawned and not finished yet.
    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Refuses new work and aborts every running task. Idempotent.
    pub fn shutdown_now(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let aborted = tasks.len();
        tasks.abort_all();
        drop(tasks);
        log::debug!("Worker pool shut down, {aborted} task(s) aborted");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}
