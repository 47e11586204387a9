//! Message-passing worker pool for independent CPU-bound tasks.
//!
//! The dispatcher pushes every task onto a work queue followed by exactly one
//! `Stop` message per worker. Workers pull messages until they see their
//! `Stop`, sending each result back on a result queue tagged with the id of the
//! task that produced it. The dispatcher collects one result per task, joins
//! every worker, and reassembles results by id, so completion order never
//! leaks into the output.

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

/// How a batch of independent tasks is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Execution {
    /// Every task runs on the calling thread in id order.
    Serial,
    /// Tasks fan out over a worker pool. `None` uses one worker per available core.
    Parallel { workers: Option<usize> },
}

impl Default for Execution {
    fn default() -> Self {
        Execution::Parallel { workers: None }
    }
}

impl Execution {
    /// Number of workers this mode runs with (1 for serial).
    pub fn worker_count(&self) -> usize {
        match self {
            Execution::Serial => 1,
            Execution::Parallel { workers } => {
                workers.unwrap_or_else(rayon::current_num_threads).max(1)
            }
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Execution::Parallel { .. })
    }
}

/// Runs `work` on every task and returns `(task id, result)` pairs sorted by id.
///
/// Serial and parallel execution produce the same output for a deterministic
/// `work` function.
pub fn execute<T, R, F>(execution: Execution, tasks: Vec<(usize, T)>, work: F) -> Vec<(usize, R)>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    match execution {
        Execution::Serial => run_serial(tasks, work),
        Execution::Parallel { .. } => WorkerPool::new(execution.worker_count()).run(tasks, work),
    }
}

fn run_serial<T, R, F>(tasks: Vec<(usize, T)>, work: F) -> Vec<(usize, R)>
where
    F: Fn(T) -> R,
{
    let mut results: Vec<(usize, R)> = tasks
        .into_iter()
        .map(|(id, payload)| (id, work(payload)))
        .collect();
    results.sort_by_key(|(id, _)| *id);
    results
}

/// Message on the work queue.
enum WorkMessage<T> {
    Task { id: usize, payload: T },
    Stop,
}

/// A bounded pool of OS threads fed through a work queue.
///
/// Each call to [`WorkerPool::run`] is a full barrier: workers are spawned for
/// the batch and joined before it returns.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// # Panics
    ///
    /// Panics if `workers` is 0.
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "worker count must be > 0");
        Self { workers }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `work` on every task across the pool.
    ///
    /// A panic inside `work` is re-raised on the calling thread after the
    /// remaining workers have been joined.
    pub fn run<T, R, F>(&self, tasks: Vec<(usize, T)>, work: F) -> Vec<(usize, R)>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let n_tasks = tasks.len();
        if n_tasks == 0 {
            return Vec::new();
        }

        let (work_tx, work_rx) = unbounded::<WorkMessage<T>>();
        let (result_tx, result_rx) = unbounded::<(usize, R)>();

        // The receiver is alive in this frame, so sends on an unbounded
        // channel cannot fail.
        for (id, payload) in tasks {
            let _ = work_tx.send(WorkMessage::Task { id, payload });
        }
        for _ in 0..self.workers {
            let _ = work_tx.send(WorkMessage::Stop);
        }
        drop(work_tx);

        let work = &work;
        let mut results = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|worker_id| {
                    let rx = work_rx.clone();
                    let tx = result_tx.clone();
                    scope.spawn(move || worker_loop(worker_id, rx, tx, work))
                })
                .collect();
            drop(result_tx);

            let mut results = Vec::with_capacity(n_tasks);
            while results.len() < n_tasks {
                match result_rx.recv() {
                    Ok(result) => results.push(result),
                    // Every sender is gone: a worker panicked mid-batch.
                    Err(_) => break,
                }
            }

            for handle in handles {
                if let Err(panic) = handle.join() {
                    std::panic::resume_unwind(panic);
                }
            }
            results
        });

        tracing::trace!(
            workers = self.workers,
            tasks = n_tasks,
            "worker pool batch complete"
        );

        results.sort_by_key(|(id, _)| *id);
        results
    }
}

fn worker_loop<T, R, F>(
    worker_id: usize,
    rx: Receiver<WorkMessage<T>>,
    tx: Sender<(usize, R)>,
    work: &F,
) where
    F: Fn(T) -> R,
{
    while let Ok(message) = rx.recv() {
        match message {
            WorkMessage::Task { id, payload } => {
                let result = work(payload);
                if tx.send((id, result)).is_err() {
                    break;
                }
            }
            WorkMessage::Stop => {
                tracing::trace!(worker_id, "worker received stop");
                break;
            }
        }
    }
}
