//! Background scheduler for the learning pipeline
//!
//! Runs two independent loops over the [`LearningService`]: one applies
//! pending feedback to the corpus, the other pushes unsynced corpus
//! entries to the vector index. Each loop reads its configuration
//! at the top of every tick, so `update_config` takes effect without a
//! restart. Cancellation is cooperative: a loop finishes the batch it is
//! in, then exits on the shared token.

use crate::config::SchedulerConfig;
use crate::learning::{BatchReport, LearningService, SyncReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Maximum number of loop errors retained in memory
const ERROR_BUFFER_CAP: usize = 100;

/// Number of recent errors surfaced by `status()`
const RECENT_ERRORS: usize = 10;

/// One recorded loop failure
#[derive(Debug, Clone, Serialize)]
pub struct LoopError {
    pub loop_name: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Scheduler state snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub last_process_run: Option<DateTime<Utc>>,
    pub last_sync_run: Option<DateTime<Utc>>,
    pub total_process_runs: u64,
    pub total_sync_runs: u64,
    pub last_process_report: Option<BatchReport>,
    pub last_sync_report: Option<SyncReport>,
    pub recent_errors: Vec<LoopError>,
}

#[derive(Default)]
struct SchedulerState {
    last_process_run: Option<DateTime<Utc>>,
    last_sync_run: Option<DateTime<Utc>>,
    total_process_runs: u64,
    total_sync_runs: u64,
    last_process_report: Option<BatchReport>,
    last_sync_report: Option<SyncReport>,
    errors: VecDeque<LoopError>,
}

impl SchedulerState {
    fn push_error(&mut self, loop_name: &'static str, message: String) {
        if self.errors.len() == ERROR_BUFFER_CAP {
            self.errors.pop_front();
        }
        self.errors.push_back(LoopError {
            loop_name,
            message,
            at: Utc::now(),
        });
    }
}

/// Two-loop background scheduler over a learning service
pub struct LearningScheduler {
    service: Arc<LearningService>,
    config: Arc<RwLock<SchedulerConfig>>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SchedulerState>>,
    cancel: Mutex<Option<CancellationToken>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LearningScheduler {
    pub fn new(service: Arc<LearningService>, config: SchedulerConfig) -> Self {
        Self {
            service,
            config: Arc::new(RwLock::new(config)),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SchedulerState::default())),
            cancel: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn both loops; a no-op when already running
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running, start ignored");
            return;
        }

        info!("Starting learning scheduler");
        let token = CancellationToken::new();

        let process_handle = tokio::spawn(process_loop(
            self.service.clone(),
            self.config.clone(),
            self.state.clone(),
            token.clone(),
        ));
        let sync_handle = tokio::spawn(sync_loop(
            self.service.clone(),
            self.config.clone(),
            self.state.clone(),
            token.clone(),
        ));

        *self.cancel.lock().await = Some(token);
        let mut handles = self.handles.lock().await;
        handles.push(process_handle);
        handles.push(sync_handle);
    }

    /// Cancel both loops and wait for them to finish their current batch;
    /// a no-op when already stopped
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Scheduler already stopped, stop ignored");
            return;
        }

        info!("Stopping learning scheduler");
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Scheduler loop panicked: {}", e);
            }
        }
        info!("Learning scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Replace the loop configuration; loops pick it up on their next tick
    pub async fn update_config(&self, config: SchedulerConfig) {
        *self.config.write().await = config;
        info!("Scheduler configuration updated");
    }

    /// Snapshot of the scheduler's run history and recent errors
    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().await;
        SchedulerStatus {
            running: self.is_running(),
            last_process_run: state.last_process_run,
            last_sync_run: state.last_sync_run,
            total_process_runs: state.total_process_runs,
            total_sync_runs: state.total_sync_runs,
            last_process_report: state.last_process_report.clone(),
            last_sync_report: state.last_sync_report.clone(),
            recent_errors: state
                .errors
                .iter()
                .rev()
                .take(RECENT_ERRORS)
                .cloned()
                .collect(),
        }
    }
}

async fn process_loop(
    service: Arc<LearningService>,
    config: Arc<RwLock<SchedulerConfig>>,
    state: Arc<Mutex<SchedulerState>>,
    token: CancellationToken,
) {
    info!("Feedback-processing loop started");
    loop {
        let loop_config = config.read().await.process.clone();

        if token.is_cancelled() {
            break;
        }

        if loop_config.enabled {
            // Direct application: every fetched item leaves the pending
            // queue, so a backlog can never starve newer feedback out of
            // the batch window. The rule chain stays available through
            // the process-rules surface.
            match service
                .process_pending_feedbacks(None, loop_config.batch_size)
                .await
            {
                Ok(report) => {
                    let mut state = state.lock().await;
                    state.last_process_run = Some(Utc::now());
                    state.total_process_runs += 1;
                    state.last_process_report = Some(report);
                }
                Err(e) => {
                    error!("Feedback-processing run failed: {}", e);
                    state.lock().await.push_error("process", e.to_string());
                }
            }
        } else {
            debug!("Feedback-processing loop disabled, idling");
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(loop_config.interval) => {}
        }
    }
    info!("Feedback-processing loop exited");
}

async fn sync_loop(
    service: Arc<LearningService>,
    config: Arc<RwLock<SchedulerConfig>>,
    state: Arc<Mutex<SchedulerState>>,
    token: CancellationToken,
) {
    info!("Index-sync loop started");
    loop {
        let loop_config = config.read().await.sync.clone();

        if token.is_cancelled() {
            break;
        }

        if loop_config.enabled {
            match service
                .sync_unsynced_entries(None, loop_config.batch_size)
                .await
            {
                Ok(report) => {
                    let mut state = state.lock().await;
                    state.last_sync_run = Some(Utc::now());
                    state.total_sync_runs += 1;
                    state.last_sync_report = Some(report);
                }
                Err(e) => {
                    error!("Index-sync run failed: {}", e);
                    state.lock().await.push_error("sync", e.to_string());
                }
            }
        } else {
            debug!("Index-sync loop disabled, idling");
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(loop_config.interval) => {}
        }
    }
    info!("Index-sync loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_buffer_is_capped() {
        let mut state = SchedulerState::default();
        for i in 0..150 {
            state.push_error("process", format!("error {}", i));
        }
        assert_eq!(state.errors.len(), ERROR_BUFFER_CAP);
        // Oldest entries were dropped
        assert_eq!(state.errors.front().unwrap().message, "error 50");
        assert_eq!(state.errors.back().unwrap().message, "error 149");
    }

    #[test]
    fn test_recent_errors_window() {
        let mut state = SchedulerState::default();
        for i in 0..20 {
            state.push_error("sync", format!("error {}", i));
        }
        let recent: Vec<_> = state.errors.iter().rev().take(RECENT_ERRORS).collect();
        assert_eq!(recent.len(), RECENT_ERRORS);
        assert_eq!(recent[0].message, "error 19", "newest first");
    }
}
