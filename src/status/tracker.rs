use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{BulkStatus, CommandState};
use crate::command::{BulkCommand, CommandId};
use crate::error::{BulkError, Result};
use crate::events::StatusEventPublisher;

#[derive(Debug, Default)]
struct Timestamps {
    scroll_started_at: Option<DateTime<Utc>>,
    scroll_ended_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// Mutable progress of one command. Counters are only ever added to; the state
/// only moves forward through compare-and-swap.
#[derive(Debug)]
struct StatusRecord {
    command: Arc<BulkCommand>,
    created_at: DateTime<Utc>,
    state: AtomicU8,
    scroll_count: AtomicU64,
    processed: AtomicU64,
    error_count: AtomicU64,
    submitted: AtomicBool,
    /// The scroll broke off; the command ends `Aborted` once what was
    /// published is processed
    scroll_failed: AtomicBool,
    completed_buckets: Mutex<HashSet<u64>>,
    timestamps: Mutex<Timestamps>,
    error_message: Mutex<Option<String>>,
}

impl StatusRecord {
    fn new(command: Arc<BulkCommand>) -> Self {
        Self {
            command,
            created_at: Utc::now(),
            state: AtomicU8::new(CommandState::Scheduled.as_u8()),
            scroll_count: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            submitted: AtomicBool::new(false),
            scroll_failed: AtomicBool::new(false),
            completed_buckets: Mutex::new(HashSet::new()),
            timestamps: Mutex::new(Timestamps::default()),
            error_message: Mutex::new(None),
        }
    }

    fn state(&self) -> CommandState {
        CommandState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `target` if allowed. Terminal states are final; non-terminal
    /// targets only move forward.
    fn advance(&self, target: CommandState) -> Option<CommandState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let from = CommandState::from_u8(current);
            if from.is_terminal() || (!target.is_terminal() && current >= target.as_u8()) {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                target.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(from),
                Err(actual) => current = actual,
            }
        }
    }

    fn snapshot(&self) -> BulkStatus {
        let timestamps = self.timestamps.lock();
        BulkStatus {
            id: self.command.id(),
            action: self.command.action().to_string(),
            username: self.command.username().map(str::to_string),
            state: self.state(),
            scroll_count: self.scroll_count.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            error_count: self.error_count.load(Ordering::SeqCst),
            submitted: self.submitted.load(Ordering::SeqCst),
            error_message: self.error_message.lock().clone(),
            created_at: self.created_at,
            scroll_started_at: timestamps.scroll_started_at,
            scroll_ended_at: timestamps.scroll_ended_at,
            started_at: timestamps.started_at,
            completed_at: timestamps.completed_at,
        }
    }

    fn expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.state().is_terminal()
            && self
                .timestamps
                .lock()
                .completed_at
                .and_then(|completed_at| completed_at.checked_add_signed(retention))
                .is_some_and(|expires_at| expires_at <= now)
    }
}

/// Single source of truth for command progress.
///
/// Reports from concurrent workers are plain additions, so their order never
/// matters. Completion is computed here: once the scroll is submitted and
/// `processed` has caught up with `scroll_count`, the command becomes
/// `Completed` or `CompletedWithErrors`. A scroll that failed instead ends in
/// `Aborted` at that same point, so published buckets still run.
#[derive(Debug)]
pub struct StatusTracker {
    records: DashMap<CommandId, Arc<StatusRecord>>,
    events: StatusEventPublisher,
    retention: chrono::Duration,
}

impl StatusTracker {
    pub fn new(events: StatusEventPublisher, retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            events,
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(365 * 100)),
        }
    }

    pub fn events(&self) -> &StatusEventPublisher {
        &self.events
    }

    /// Accept a command in `Scheduled` state
    pub fn register(&self, command: BulkCommand) -> Result<Arc<BulkCommand>> {
        let command = Arc::new(command);
        let id = command.id();
        match self.records.entry(id) {
            Entry::Occupied(_) => {
                return Err(BulkError::configuration(format!(
                    "Command {id} is already registered"
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(StatusRecord::new(command.clone())));
            }
        }

        debug!(command_id = %id, action = %command.action(), "Command scheduled");
        self.events.publish(id, CommandState::Scheduled);
        Ok(command)
    }

    /// The frozen command behind `id`
    pub fn command(&self, id: CommandId) -> Result<Arc<BulkCommand>> {
        Ok(self.record(id)?.command.clone())
    }

    pub fn get(&self, id: CommandId) -> Result<BulkStatus> {
        let record = self.record(id)?;
        if record.expired(Utc::now(), self.retention) {
            self.records.remove(&id);
            return Err(BulkError::not_found(id));
        }
        Ok(record.snapshot())
    }

    pub fn state(&self, id: CommandId) -> Result<CommandState> {
        Ok(self.record(id)?.state())
    }

    pub fn is_aborted(&self, id: CommandId) -> bool {
        self.record(id)
            .map(|record| record.state() == CommandState::Aborted)
            .unwrap_or(false)
    }

    pub fn start_scrolling(&self, id: CommandId) -> Result<()> {
        let record = self.record(id)?;
        if record.advance(CommandState::ScrollingRunning).is_some() {
            record.timestamps.lock().scroll_started_at = Some(Utc::now());
            self.events.publish(id, CommandState::ScrollingRunning);
        }
        Ok(())
    }

    /// Count identifiers produced by the scroller. Must happen before the
    /// bucket holding them is published.
    pub fn add_scrolled(&self, id: CommandId, count: u64) -> Result<()> {
        self.record(id)?
            .scroll_count
            .fetch_add(count, Ordering::SeqCst);
        Ok(())
    }

    /// The scroller is exhausted; `scroll_count` is final from here on
    pub fn mark_submitted(&self, id: CommandId) -> Result<()> {
        let record = self.record(id)?;
        record.timestamps.lock().scroll_ended_at = Some(Utc::now());
        record.submitted.store(true, Ordering::SeqCst);
        if record.advance(CommandState::Running).is_some() {
            self.events.publish(id, CommandState::Running);
        }

        info!(
            command_id = %id,
            scroll_count = record.scroll_count.load(Ordering::SeqCst),
            "Scroll submitted"
        );
        self.evaluate_completion(id, &record);
        Ok(())
    }

    /// The scroll broke off with `message`. `scroll_count` is final; buckets
    /// already published keep running and the command turns `Aborted` once
    /// they are all processed.
    pub fn fail_scroll(&self, id: CommandId, message: impl Into<String>) -> Result<()> {
        let record = self.record(id)?;
        let message = message.into();
        record.timestamps.lock().scroll_ended_at = Some(Utc::now());
        *record.error_message.lock() = Some(message.clone());
        record.scroll_failed.store(true, Ordering::SeqCst);
        if record.advance(CommandState::Running).is_some() {
            self.events.publish(id, CommandState::Running);
        }

        warn!(
            command_id = %id,
            scroll_count = record.scroll_count.load(Ordering::SeqCst),
            error = %message,
            "Scroll failed, draining published buckets"
        );
        self.evaluate_completion(id, &record);
        Ok(())
    }

    /// Fold one batch outcome into the counters.
    ///
    /// A report that would push `processed` past `scroll_count` is clamped and
    /// logged; it can only come from a duplicate delivery.
    pub fn record_batch(&self, id: CommandId, processed: u64, errors: u64) -> Result<()> {
        let record = self.record(id)?;
        {
            let mut timestamps = record.timestamps.lock();
            if timestamps.started_at.is_none() {
                timestamps.started_at = Some(Utc::now());
            }
        }

        // errors first, so a reader that sees the final processed count also
        // sees every error behind it
        if errors > 0 {
            record.error_count.fetch_add(errors, Ordering::SeqCst);
        }

        let scrolled = record.scroll_count.load(Ordering::SeqCst);
        let mut overflow = 0;
        let _ = record
            .processed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                let next = current.saturating_add(processed);
                overflow = next.saturating_sub(scrolled);
                Some(next.min(scrolled))
            });
        if overflow > 0 {
            warn!(
                command_id = %id,
                overflow = overflow,
                scroll_count = scrolled,
                "Processed count exceeds scroll count, clamping"
            );
        }

        self.evaluate_completion(id, &record);
        Ok(())
    }

    /// Whether bucket `sequence` of `id` already ran to the end
    pub fn is_bucket_done(&self, id: CommandId, sequence: u64) -> bool {
        self.record(id)
            .map(|record| record.completed_buckets.lock().contains(&sequence))
            .unwrap_or(false)
    }

    /// Remember that bucket `sequence` ran to the end. Returns `false` when it
    /// was already recorded.
    pub fn complete_bucket(&self, id: CommandId, sequence: u64) -> Result<bool> {
        Ok(self.record(id)?.completed_buckets.lock().insert(sequence))
    }

    /// Cooperative cancellation. Returns `false` when the command is already
    /// terminal.
    pub fn abort(&self, id: CommandId) -> Result<bool> {
        self.abort_with(id, None)
    }

    /// Abort because of a fatal failure, keeping its message
    pub fn abort_with_error(&self, id: CommandId, message: impl Into<String>) -> Result<bool> {
        self.abort_with(id, Some(message.into()))
    }

    fn abort_with(&self, id: CommandId, message: Option<String>) -> Result<bool> {
        let record = self.record(id)?;
        let Some(from) = record.advance(CommandState::Aborted) else {
            return Ok(false);
        };

        if let Some(message) = message {
            *record.error_message.lock() = Some(message);
        }
        record.timestamps.lock().completed_at = Some(Utc::now());
        info!(command_id = %id, from = %from, "Command aborted");
        self.events.publish(id, CommandState::Aborted);
        Ok(true)
    }

    /// Statuses of every known command submitted by `username`
    pub fn statuses_for_user(&self, username: &str) -> Vec<BulkStatus> {
        let mut statuses: Vec<BulkStatus> = self
            .records
            .iter()
            .filter(|entry| entry.value().command.username() == Some(username))
            .map(|entry| entry.value().snapshot())
            .collect();
        statuses.sort_by_key(|status| status.created_at);
        statuses
    }

    /// Drop terminal statuses older than the retention period
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records
            .retain(|_, record| !record.expired(now, self.retention));
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            debug!(purged = purged, "Purged expired command statuses");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Wait until the command is terminal. Returns `false` on timeout.
    pub async fn await_completion(&self, id: CommandId, timeout: Duration) -> Result<bool> {
        // subscribe before reading the state so no transition slips between
        let mut events = self.events.subscribe();
        if self.record(id)?.state().is_terminal() {
            return Ok(true);
        }

        match tokio::time::timeout(timeout, self.wait_terminal(id, &mut events)).await {
            Ok(result) => result,
            Err(_) => Ok(false),
        }
    }

    async fn wait_terminal(
        &self,
        id: CommandId,
        events: &mut tokio::sync::broadcast::Receiver<crate::events::StatusEvent>,
    ) -> Result<bool> {
        loop {
            match events.recv().await {
                Ok(event) if event.command_id == id && event.state.is_terminal() => {
                    return Ok(true)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if self.record(id)?.state().is_terminal() {
                        return Ok(true);
                    }
                }
                Err(RecvError::Closed) => return Ok(self.record(id)?.state().is_terminal()),
            }
        }
    }

    fn record(&self, id: CommandId) -> Result<Arc<StatusRecord>> {
        self.records
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BulkError::not_found(id))
    }

    fn evaluate_completion(&self, id: CommandId, record: &StatusRecord) {
        let scroll_failed = record.scroll_failed.load(Ordering::SeqCst);
        if !scroll_failed && !record.submitted.load(Ordering::SeqCst) {
            return;
        }
        let scrolled = record.scroll_count.load(Ordering::SeqCst);
        let processed = record.processed.load(Ordering::SeqCst);
        if processed < scrolled {
            return;
        }

        let errors = record.error_count.load(Ordering::SeqCst);
        let target = if scroll_failed {
            CommandState::Aborted
        } else if errors > 0 {
            CommandState::CompletedWithErrors
        } else {
            CommandState::Completed
        };
        if record.advance(target).is_some() {
            record.timestamps.lock().completed_at = Some(Utc::now());
            info!(
                command_id = %id,
                state = %target,
                processed = processed,
                errors = errors,
                "Command finished"
            );
            self.events.publish(id, target);
        }
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(StatusEventPublisher::default(), Duration::from_secs(3600))
    }
}
