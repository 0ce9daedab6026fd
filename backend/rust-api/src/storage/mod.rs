use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{LatestAttempt, Mode, ModuleType, ProgressSnapshot, QuestionRef};

pub mod memory;
pub mod mongo;

/// Read-only view of the exam catalog: questions of active modules only.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn active_questions(&self, module_type: ModuleType) -> Result<Vec<QuestionRef>>;
}

/// Read-only view of the per-type answer attempt collections.
#[async_trait]
pub trait AnswerStore: Send + Sync {
    /// Latest attempt per question for the given user, restricted to
    /// `question_ids`. One round trip regardless of input size; questions
    /// without any attempt are absent from the map.
    async fn latest_attempts(
        &self,
        user_id: &str,
        module_type: ModuleType,
        question_ids: &[String],
    ) -> Result<HashMap<String, LatestAttempt>>;

    async fn count_by_mode(&self, user_id: &str, module_type: ModuleType, mode: Mode)
        -> Result<u64>;

    /// Average over all of the user's attempts with a non-null score.
    /// `None` when no scored attempt exists.
    async fn average_score(&self, user_id: &str, module_type: ModuleType) -> Result<Option<f64>>;
}

/// The snapshot table. The aggregator is its only writer.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<ProgressSnapshot>>;

    /// Create the row; `false` when a snapshot for this user already exists
    /// (lost a create race).
    async fn insert(&self, snapshot: &ProgressSnapshot) -> Result<bool>;

    /// Full replace guarded by the optimistic-lock version; `false` when the
    /// stored version has moved on since it was read.
    async fn replace(&self, snapshot: &ProgressSnapshot, expected_version: i64) -> Result<bool>;
}

// Shared references delegate, so callers can keep a handle to a store while a
// service borrows it.

#[async_trait]
impl<T: Catalog> Catalog for &T {
    async fn active_questions(&self, module_type: ModuleType) -> Result<Vec<QuestionRef>> {
        (**self).active_questions(module_type).await
    }
}

#[async_trait]
impl<T: AnswerStore> AnswerStore for &T {
    async fn latest_attempts(
        &self,
        user_id: &str,
        module_type: ModuleType,
        question_ids: &[String],
    ) -> Result<HashMap<String, LatestAttempt>> {
        (**self).latest_attempts(user_id, module_type, question_ids).await
    }

    async fn count_by_mode(
        &self,
        user_id: &str,
        module_type: ModuleType,
        mode: Mode,
    ) -> Result<u64> {
        (**self).count_by_mode(user_id, module_type, mode).await
    }

    async fn average_score(&self, user_id: &str, module_type: ModuleType) -> Result<Option<f64>> {
        (**self).average_score(user_id, module_type).await
    }
}

#[async_trait]
impl<T: SnapshotStore> SnapshotStore for &T {
    async fn load(&self, user_id: &str) -> Result<Option<ProgressSnapshot>> {
        (**self).load(user_id).await
    }

    async fn insert(&self, snapshot: &ProgressSnapshot) -> Result<bool> {
        (**self).insert(snapshot).await
    }

    async fn replace(&self, snapshot: &ProgressSnapshot, expected_version: i64) -> Result<bool> {
        (**self).replace(snapshot, expected_version).await
    }
}
