//! Bounded worker pool for fan-out inside one directory transfer.
//!
//! Workers pull tasks from a shared queue until it is empty or the transfer
//! is stopped. Each worker owns one connection-like state `S` created by the
//! `connect` callback, so non-thread-safe protocol sessions are never shared.
//! A failed task is recorded and the worker moves on to the next one.

use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};

use crate::error::MirrorError;

use super::control::TransferControl;

/// Aggregated result of a pool run.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub completed: u64,
    pub bytes: u64,
    pub failures: Vec<(String, MirrorError)>,
    /// Workers that never got a connection. These only matter when tasks
    /// were left behind.
    pub connect_failures: Vec<(usize, MirrorError)>,
    /// Tasks never finished because the pool stopped or ran out of workers.
    pub unprocessed: usize,
}

impl PoolReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.unprocessed == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `work` over every task with at most `workers` concurrent workers.
pub fn run_pool<T, S, C, W>(
    tasks: Vec<T>,
    workers: usize,
    control: &TransferControl,
    connect: C,
    work: W,
) -> PoolReport
where
    T: Display + Send,
    C: Fn() -> Result<S, MirrorError> + Sync,
    W: Fn(&mut S, &T) -> Result<u64, MirrorError> + Sync,
{
    if tasks.is_empty() {
        return PoolReport::default();
    }
    let workers = workers.clamp(1, tasks.len());
    let queue = Mutex::new(VecDeque::from(tasks));
    let report = Mutex::new(PoolReport::default());

    std::thread::scope(|scope| {
        for idx in 0..workers {
            let (queue, report, connect, work) = (&queue, &report, &connect, &work);
            scope.spawn(move || worker_loop(idx, queue, report, control, connect, work));
        }
    });

    let mut report = report.into_inner().unwrap_or_else(|p| p.into_inner());
    report.unprocessed += queue.into_inner().unwrap_or_else(|p| p.into_inner()).len();
    report
}

fn worker_loop<T, S, C, W>(
    idx: usize,
    queue: &Mutex<VecDeque<T>>,
    report: &Mutex<PoolReport>,
    control: &TransferControl,
    connect: &C,
    work: &W,
) where
    T: Display,
    C: Fn() -> Result<S, MirrorError>,
    W: Fn(&mut S, &T) -> Result<u64, MirrorError>,
{
    let mut state = match connect() {
        Ok(state) => state,
        Err(e) => {
            if control.checkpoint().is_ok() {
                tracing::warn!("Transfer worker {} could not connect: {}", idx, e);
                lock(report).connect_failures.push((idx, e));
            }
            return;
        }
    };

    loop {
        if control.checkpoint().is_err() {
            return;
        }
        let Some(task) = lock(queue).pop_front() else {
            return;
        };
        match work(&mut state, &task) {
            Ok(bytes) => {
                let mut report = lock(report);
                report.completed += 1;
                report.bytes += bytes;
            }
            Err(_) if control.checkpoint().is_err() => {
                lock(report).unprocessed += 1;
                return;
            }
            Err(e) => {
                tracing::debug!("Worker {} failed on {}: {}", idx, task, e);
                lock(report).failures.push((task.to_string(), e));
            }
        }
    }
}
