//! Worker pool: one bounded task queue, scoped worker threads, and two
//! aggregation modes (boolean early-abort and lossless collect).

use crossbeam_channel::bounded;
use std::thread;

use crate::cancel::CancelToken;
use crate::types::{CompareError, Result};

/// Auto pool sizing: `min(8, task_count)` when `max_workers` is 0, otherwise
/// the requested size capped at the task count.
pub fn effective_workers(max_workers: usize, task_count: usize) -> usize {
    match max_workers {
        0 => task_count.clamp(1, 8),
        n => n.min(task_count.max(1)),
    }
}

/// Run every task, reporting whether all of them returned `true`.
///
/// First failure wins: the pool flag is set, queued tasks are dropped, and
/// in-flight tasks observe cancellation at their next chunk boundary. Their
/// `Cancelled` results are expected casualties and do not mask the verdict.
pub fn all_match<T, F>(tasks: Vec<T>, max_workers: usize, token: &CancelToken, run: F) -> Result<bool>
where
    T: Send,
    F: Fn(T) -> Result<bool> + Sync,
{
    if tasks.is_empty() {
        return Ok(true);
    }
    let workers = effective_workers(max_workers, tasks.len());
    if workers == 1 {
        for task in tasks {
            token.check()?;
            if !run(task)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    let count = tasks.len();
    let (task_tx, task_rx) = bounded(count);
    for task in tasks {
        let _ = task_tx.send(task);
    }
    drop(task_tx);
    let (res_tx, res_rx) = bounded::<Result<bool>>(count);

    thread::scope(|s| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let res_tx = res_tx.clone();
            let run = &run;
            s.spawn(move || {
                while let Ok(task) = task_rx.recv() {
                    if token.is_cancelled() {
                        break;
                    }
                    if res_tx.send(run(task)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(res_tx);

        let mut outcome: Result<bool> = Ok(true);
        let mut aborted = false;
        while let Ok(result) = res_rx.recv() {
            match result {
                Ok(true) => {}
                Ok(false) if !aborted => {
                    outcome = Ok(false);
                    aborted = true;
                    token.cancel();
                }
                Ok(false) => {}
                Err(CompareError::Cancelled) if aborted => {}
                Err(e) if !aborted => {
                    outcome = Err(e);
                    aborted = true;
                    token.cancel();
                }
                Err(_) => {}
            }
        }
        outcome
    })
}

/// Run every task and collect every result. The first fatal error cancels
/// the rest and is returned; otherwise the results arrive losslessly (in no
/// particular order — callers merge into order-independent structures).
pub fn collect_all<T, R, F>(
    tasks: Vec<T>,
    max_workers: usize,
    token: &CancelToken,
    run: F,
) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R> + Sync,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let workers = effective_workers(max_workers, tasks.len());
    if workers == 1 {
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            token.check()?;
            results.push(run(task)?);
        }
        return Ok(results);
    }

    let count = tasks.len();
    let (task_tx, task_rx) = bounded(count);
    for task in tasks {
        let _ = task_tx.send(task);
    }
    drop(task_tx);
    let (res_tx, res_rx) = bounded::<Result<R>>(count);

    thread::scope(|s| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let res_tx = res_tx.clone();
            let run = &run;
            s.spawn(move || {
                while let Ok(task) = task_rx.recv() {
                    if token.is_cancelled() {
                        break;
                    }
                    if res_tx.send(run(task)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(res_tx);

        // Single owner of the result channel: merging happens here only.
        let mut results = Vec::with_capacity(count);
        let mut fatal: Option<CompareError> = None;
        while let Ok(result) = res_rx.recv() {
            match result {
                Ok(value) => results.push(value),
                Err(CompareError::Cancelled) if fatal.is_some() => {}
                Err(e) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                        token.cancel();
                    }
                }
            }
        }
        match fatal {
            Some(e) => Err(e),
            None => Ok(results),
        }
    })
}
