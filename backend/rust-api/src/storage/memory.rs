//! In-memory store implementations. They back the integration tests and are
//! handy as a throwaway local backend; the versioned-replace semantics match
//! the Mongo implementation exactly.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{AttemptRecord, LatestAttempt, Mode, ModuleType, ProgressSnapshot, QuestionRef};

use super::{AnswerStore, Catalog, SnapshotStore};

#[derive(Default)]
pub struct MemoryCatalog {
    questions: Mutex<HashMap<ModuleType, Vec<QuestionRef>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_question(&self, module_type: ModuleType, question_id: &str, module_id: &str) {
        self.questions
            .lock()
            .expect("catalog lock poisoned")
            .entry(module_type)
            .or_default()
            .push(QuestionRef {
                question_id: question_id.to_string(),
                module_id: module_id.to_string(),
            });
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn active_questions(&self, module_type: ModuleType) -> Result<Vec<QuestionRef>> {
        let questions = self
            .questions
            .lock()
            .map_err(|_| anyhow!("catalog lock poisoned"))?;
        Ok(questions.get(&module_type).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct MemoryAnswerStore {
    attempts: Mutex<HashMap<ModuleType, Vec<AttemptRecord>>>,
}

impl MemoryAnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, module_type: ModuleType, attempt: AttemptRecord) {
        self.attempts
            .lock()
            .expect("answer store lock poisoned")
            .entry(module_type)
            .or_default()
            .push(attempt);
    }
}

#[async_trait]
impl AnswerStore for MemoryAnswerStore {
    async fn latest_attempts(
        &self,
        user_id: &str,
        module_type: ModuleType,
        question_ids: &[String],
    ) -> Result<HashMap<String, LatestAttempt>> {
        let attempts = self
            .attempts
            .lock()
            .map_err(|_| anyhow!("answer store lock poisoned"))?;

        let mut latest: HashMap<String, (chrono::DateTime<chrono::Utc>, LatestAttempt)> =
            HashMap::new();
        for attempt in attempts.get(&module_type).into_iter().flatten() {
            if attempt.user_id != user_id || !question_ids.contains(&attempt.question_id) {
                continue;
            }
            let candidate = LatestAttempt {
                correct: attempt.correct,
                score: attempt.score,
                mode: attempt.mode,
                created_at: attempt.created_at,
            };
            match latest.get(&attempt.question_id) {
                Some((newest, _)) if *newest > attempt.created_at => {}
                _ => {
                    latest.insert(attempt.question_id.clone(), (attempt.created_at, candidate));
                }
            }
        }

        Ok(latest.into_iter().map(|(k, (_, v))| (k, v)).collect())
    }

    async fn count_by_mode(
        &self,
        user_id: &str,
        module_type: ModuleType,
        mode: Mode,
    ) -> Result<u64> {
        let attempts = self
            .attempts
            .lock()
            .map_err(|_| anyhow!("answer store lock poisoned"))?;
        Ok(attempts
            .get(&module_type)
            .into_iter()
            .flatten()
            .filter(|a| a.user_id == user_id && a.mode == mode)
            .count() as u64)
    }

    async fn average_score(&self, user_id: &str, module_type: ModuleType) -> Result<Option<f64>> {
        let attempts = self
            .attempts
            .lock()
            .map_err(|_| anyhow!("answer store lock poisoned"))?;
        let scores: Vec<f64> = attempts
            .get(&module_type)
            .into_iter()
            .flatten()
            .filter(|a| a.user_id == user_id)
            .filter_map(|a| a.score)
            .collect();

        if scores.is_empty() {
            return Ok(None);
        }
        Ok(Some(scores.iter().sum::<f64>() / scores.len() as f64))
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    rows: Mutex<HashMap<String, ProgressSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, user_id: &str) -> Result<Option<ProgressSnapshot>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?;
        Ok(rows.get(user_id).cloned())
    }

    async fn insert(&self, snapshot: &ProgressSnapshot) -> Result<bool> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?;
        if rows.contains_key(&snapshot.user_id) {
            return Ok(false);
        }
        rows.insert(snapshot.user_id.clone(), snapshot.clone());
        Ok(true)
    }

    async fn replace(&self, snapshot: &ProgressSnapshot, expected_version: i64) -> Result<bool> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?;
        match rows.get(&snapshot.user_id) {
            Some(existing) if existing.version == expected_version => {
                rows.insert(snapshot.user_id.clone(), snapshot.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
