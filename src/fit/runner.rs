//! Batch orchestration of independent estimation runs.
//!
//! Runs execute in parallel, each with its own RNG stream (`seed + run`).
//! Progress is pushed to a `RunObserver` as runs complete; a shared
//! `CancelToken` lets an observer or another thread stop the batch between
//! optimizer iterations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{RunResult, SeedMode};
use crate::error::AppError;
use crate::fit::objective::Objective;
use crate::fit::search::Optimizer;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle token of a batch, as written to the progress channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Ready,
    Start,
    /// Requested by the user; becomes `StoppedByUser` once honored.
    Stop,
    StopAllOk,
    StopIncomplete,
    StoppedByUser,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Ready => "Ready",
            RunState::Start => "Start",
            RunState::Stop => "Stop",
            RunState::StopAllOk => "StopAllOK",
            RunState::StopIncomplete => "StopIncomplete",
            RunState::StoppedByUser => "StoppedByUser",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "Ready" => Some(RunState::Ready),
            "Start" => Some(RunState::Start),
            "Stop" => Some(RunState::Stop),
            "StopAllOK" => Some(RunState::StopAllOk),
            "StopIncomplete" => Some(RunState::StopIncomplete),
            "StoppedByUser" => Some(RunState::StoppedByUser),
            _ => None,
        }
    }

    /// A state that asks running work to stop.
    pub fn requests_stop(self) -> bool {
        matches!(self, RunState::Stop | RunState::StoppedByUser)
    }
}

/// Progress of one completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgress {
    pub run: usize,
    pub fitness: f64,
    pub iterations: usize,
    pub completed: usize,
    pub total: usize,
}

/// Receives batch progress. Called from worker threads.
pub trait RunObserver: Send + Sync {
    fn state_changed(&self, _state: RunState) {}

    fn run_completed(&self, progress: &RunProgress);
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn run_completed(&self, _progress: &RunProgress) {}
}

/// Completed runs (ordered by run id) and the final batch state.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub runs: Vec<RunResult>,
    pub requested: usize,
    pub state: RunState,
}

impl BatchOutcome {
    /// All runs, or `CancellationRequested` if the batch did not finish.
    pub fn into_complete(self) -> Result<Vec<RunResult>, AppError> {
        if self.state == RunState::StopAllOk {
            Ok(self.runs)
        } else {
            Err(AppError::CancellationRequested {
                completed: self.runs.len(),
                requested: self.requested,
            })
        }
    }
}

/// Run `runs` independent minimizations of `objective`.
pub fn run_batch(
    objective: &Objective<'_>,
    optimizer: &dyn Optimizer,
    runs: usize,
    seed: SeedMode,
    observer: &dyn RunObserver,
    cancel: &CancelToken,
) -> Result<BatchOutcome, AppError> {
    observer.state_changed(RunState::Start);
    info!(runs, optimizer = optimizer.name(), "batch started");
    let completed = AtomicUsize::new(0);

    let results: Vec<Option<RunResult>> = (0..runs)
        .into_par_iter()
        .map(|run| -> Result<Option<RunResult>, AppError> {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let run_seed = match seed.stream_seed(run as u64) {
                Some(s) => SeedMode::Fixed(s),
                None => SeedMode::Entropy,
            };
            let outcome = optimizer.minimize(objective, run_seed, cancel)?;
            if outcome.cancelled {
                return Ok(None);
            }
            let params = objective.bounds().decode(&outcome.vector)?;
            let result = objective.score(run, params, outcome.iterations)?;

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            observer.run_completed(&RunProgress {
                run,
                fitness: result.fitness,
                iterations: result.iterations,
                completed: done,
                total: runs,
            });
            Ok(Some(result))
        })
        .collect::<Result<_, AppError>>()?;

    let runs_done: Vec<RunResult> = results.into_iter().flatten().collect();
    let state = if runs_done.len() == runs {
        RunState::StopAllOk
    } else if cancel.is_cancelled() {
        RunState::StoppedByUser
    } else {
        RunState::StopIncomplete
    };
    if state != RunState::StopAllOk {
        warn!(completed = runs_done.len(), requested = runs, state = state.as_str(), "batch stopped early");
    }
    observer.state_changed(state);
    info!(completed = runs_done.len(), state = state.as_str(), "batch finished");

    Ok(BatchOutcome {
        runs: runs_done,
        requested: runs,
        state,
    })
}
