//! File-based progress channel.
//!
//! The side file's first line is the batch state token (`Ready`, `Start`,
//! `StopAllOK`, ...); each following line records one completed run. A user
//! (or another process) stops a batch by overwriting the token with `Stop`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::AppError;
use crate::fit::{CancelToken, RunObserver, RunProgress, RunState};

#[derive(Debug)]
pub struct ProgressChannel {
    path: PathBuf,
    cancel: CancelToken,
    /// Current token and progress lines, guarded together.
    state: Mutex<(RunState, Vec<String>)>,
}

impl ProgressChannel {
    /// Create the side file in state `Ready`. A stop request found in the
    /// file raises `cancel`.
    pub fn create(path: impl Into<PathBuf>, cancel: CancelToken) -> Result<Self, AppError> {
        let channel = Self {
            path: path.into(),
            cancel,
            state: Mutex::new((RunState::Ready, Vec::new())),
        };
        channel.flush(&(RunState::Ready, Vec::new()))?;
        Ok(channel)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// State token currently in the file.
    pub fn read_state(&self) -> Result<Option<RunState>, AppError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| AppError::io(format!("Failed to read progress '{}': {e}", self.path.display())))?;
        Ok(text.lines().next().and_then(RunState::parse))
    }

    /// Raise the cancel token if the file asks to stop. Returns whether it did.
    pub fn poll_cancel(&self) -> bool {
        match self.read_state() {
            Ok(Some(state)) if state.requests_stop() => {
                if !self.cancel.is_cancelled() {
                    info!(path = %self.path.display(), "stop requested through progress file");
                }
                self.cancel.cancel();
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "progress file unreadable");
                false
            }
        }
    }

    /// Poll the file every `interval` until `done` is set or a stop is seen.
    pub fn watch(&self, done: &AtomicBool, interval: Duration) {
        while !done.load(Ordering::SeqCst) {
            if self.poll_cancel() {
                return;
            }
            thread::sleep(interval);
        }
    }

    fn flush(&self, state: &(RunState, Vec<String>)) -> Result<(), AppError> {
        let mut text = String::from(state.0.as_str());
        text.push('\n');
        for line in &state.1 {
            text.push_str(line);
            text.push('\n');
        }
        fs::write(&self.path, text)
            .map_err(|e| AppError::io(format!("Failed to write progress '{}': {e}", self.path.display())))
    }

    fn update(&self, apply: impl FnOnce(&mut (RunState, Vec<String>))) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // A pending stop request must survive our rewrite.
        let requested_stop = self.poll_cancel();
        apply(&mut guard);
        if requested_stop && !matches!(guard.0, RunState::StopAllOk | RunState::StopIncomplete | RunState::StoppedByUser) {
            guard.0 = RunState::Stop;
        }
        if let Err(e) = self.flush(&guard) {
            warn!(error = %e, "progress not recorded");
        }
    }
}

impl RunObserver for ProgressChannel {
    fn state_changed(&self, state: RunState) {
        self.update(|s| s.0 = state);
    }

    fn run_completed(&self, progress: &RunProgress) {
        let line = format!(
            "run={} fitness={:.10} iterations={} completed={}/{}",
            progress.run, progress.fitness, progress.iterations, progress.completed, progress.total
        );
        self.update(|s| s.1.push(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(run: usize) -> RunProgress {
        RunProgress {
            run,
            fitness: 1.25,
            iterations: 4,
            completed: run + 1,
            total: 3,
        }
    }

    #[test]
    fn records_state_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        let ch = ProgressChannel::create(dir.path().join("progress.txt"), CancelToken::new()).unwrap();
        assert_eq!(ch.read_state().unwrap(), Some(RunState::Ready));

        ch.state_changed(RunState::Start);
        ch.run_completed(&progress(0));
        ch.run_completed(&progress(1));
        let text = fs::read_to_string(ch.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Start");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("run=1 "));
        assert!(lines[2].ends_with("completed=2/3"));

        ch.state_changed(RunState::StopAllOk);
        assert_eq!(ch.read_state().unwrap(), Some(RunState::StopAllOk));
    }

    #[test]
    fn stop_token_raises_cancellation_and_survives_updates() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        let ch = ProgressChannel::create(dir.path().join("progress.txt"), cancel.clone()).unwrap();
        ch.state_changed(RunState::Start);
        assert!(!ch.poll_cancel());

        fs::write(ch.path(), "Stop\n").unwrap();
        ch.run_completed(&progress(0));
        assert!(cancel.is_cancelled());
        assert_eq!(ch.read_state().unwrap(), Some(RunState::Stop));

        ch.state_changed(RunState::StoppedByUser);
        assert_eq!(ch.read_state().unwrap(), Some(RunState::StoppedByUser));
    }

    #[test]
    fn watch_returns_once_done() {
        let dir = tempfile::tempdir().unwrap();
        let ch = ProgressChannel::create(dir.path().join("progress.txt"), CancelToken::new()).unwrap();
        let done = AtomicBool::new(true);
        ch.watch(&done, Duration::from_millis(1));
        assert!(!ch.poll_cancel());
    }
}
