//! Execution Tracker
//!
//! Design Decision: Shared append-only record store with guarded transitions
//!
//! Every invocation gets a record that moves through
//! `Pending → Running → Completed | Failed | TimedOut`. Transitions are
//! checked against the current status under the write lock, so a late
//! completion of an abandoned (timed-out) call is rejected instead of
//! overwriting the terminal state.
//!
//! Records live for the lifetime of the process; `clear` is the only
//! way to drop them.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::broker::schema::{Arguments, ExecutionId, ExecutionRecord, ExecutionStatus, InvocationResult};

#[derive(Debug, Default)]
struct TrackerState {
    records: HashMap<ExecutionId, ExecutionRecord>,
    /// Insertion order, oldest first
    order: Vec<ExecutionId>,
}

/// Cloneable handle; clones share the same store
#[derive(Debug, Clone, Default)]
pub struct ExecutionTracker {
    state: Arc<RwLock<TrackerState>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending record and return its id
    pub async fn begin(&self, provider: &str, capability: &str, arguments: Arguments) -> ExecutionId {
        let record = ExecutionRecord::new(provider, capability, arguments);
        let id = record.id;

        let mut state = self.state.write().await;
        state.order.push(id);
        state.records.insert(id, record);
        id
    }

    pub async fn mark_running(&self, id: ExecutionId) -> bool {
        self.transition(id, ExecutionStatus::Running, |_| {}).await
    }

    /// Record a finished transport call: `Completed` or `Failed` by the result's success flag
    pub async fn complete(&self, id: ExecutionId, result: InvocationResult) -> bool {
        let next = if result.success {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.transition(id, next, move |record| {
            record.error = result.error.clone();
            record.result = Some(result);
        })
        .await
    }

    pub async fn fail(&self, id: ExecutionId, message: impl Into<String>) -> bool {
        let message = message.into();
        self.transition(id, ExecutionStatus::Failed, move |record| {
            record.error = Some(message);
        })
        .await
    }

    pub async fn timeout(&self, id: ExecutionId, after: Duration) -> bool {
        self.transition(id, ExecutionStatus::TimedOut, move |record| {
            record.error = Some(format!("timed out after {}ms", after.as_millis()));
        })
        .await
    }

    /// Apply `update` and move to `next` if the transition is allowed
    async fn transition<F>(&self, id: ExecutionId, next: ExecutionStatus, update: F) -> bool
    where
        F: FnOnce(&mut ExecutionRecord),
    {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(&id) else {
            tracing::debug!("Ignoring {:?} for unknown execution {}", next, id);
            return false;
        };

        if !record.status.can_transition_to(next) {
            tracing::debug!(
                "Ignoring {:?} for execution {} already {:?}",
                next,
                id,
                record.status
            );
            return false;
        }

        update(record);
        record.status = next;
        if next.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        true
    }

    pub async fn get(&self, id: ExecutionId) -> Option<ExecutionRecord> {
        self.state.read().await.records.get(&id).cloned()
    }

    /// Records newest first, optionally limited
    pub async fn history(&self, limit: Option<usize>) -> Vec<ExecutionRecord> {
        let state = self.state.read().await;
        state
            .order
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.records.clear();
        state.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
