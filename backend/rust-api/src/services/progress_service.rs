use chrono::{NaiveDate, Utc};

use crate::metrics::{MODULE_RECOMPUTES_TOTAL, SNAPSHOT_UPSERTS_TOTAL};
use crate::models::{
    percentage, round2, Mode, ModuleProgress, ModuleScore, ModuleSnapshot, ModuleType,
    OverallStats, ProgressSnapshot, Scoring, StreakState, UnknownModuleType,
};
use crate::storage::{AnswerStore, Catalog, SnapshotStore};

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error(transparent)]
    InvalidModuleType(#[from] UnknownModuleType),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("concurrent snapshot update for user {0}")]
    ConcurrentUpdateConflict(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Advance the continuous-study-days streak to `today`.
///
/// Same day is a no-op, the day after the last study increments, any other
/// gap (first study included, clock skew backwards included) resets to 1.
/// Calling this twice with the same `today` is idempotent.
pub fn advance_streak(state: StreakState, today: NaiveDate) -> StreakState {
    let continuous_days = match state.last_study_date {
        Some(last) if last == today => return state,
        Some(last) if last.succ_opt() == Some(today) => state.continuous_days + 1,
        _ => 1,
    };
    StreakState {
        continuous_days,
        last_study_date: Some(today),
    }
}

/// Computes per-module and cross-module learning progress for one user and
/// maintains the denormalized snapshot row. Pure reads except
/// [`ProgressService::upsert_snapshot`], the only mutation entry point.
pub struct ProgressService<C, A, S> {
    catalog: C,
    answers: A,
    snapshots: S,
}

impl<C, A, S> ProgressService<C, A, S>
where
    C: Catalog,
    A: AnswerStore,
    S: SnapshotStore,
{
    pub fn new(catalog: C, answers: A, snapshots: S) -> Self {
        Self {
            catalog,
            answers,
            snapshots,
        }
    }

    /// Current completion/accuracy state for one module type. No side effects.
    pub async fn compute_module_progress(
        &self,
        user_id: &str,
        module_type: ModuleType,
    ) -> Result<ModuleProgress, ProgressError> {
        MODULE_RECOMPUTES_TOTAL
            .with_label_values(&[module_type.as_str()])
            .inc();

        let questions = self.catalog.active_questions(module_type).await?;
        let total = questions.len() as u64;
        let question_ids: Vec<String> = questions.into_iter().map(|q| q.question_id).collect();

        let latest = self
            .answers
            .latest_attempts(user_id, module_type, &question_ids)
            .await?;
        let completed = latest.len() as u64;

        let practice_count = self
            .answers
            .count_by_mode(user_id, module_type, Mode::Practice)
            .await?;
        let exam_count = self
            .answers
            .count_by_mode(user_id, module_type, Mode::Exam)
            .await?;

        let score = match module_type.scoring() {
            Scoring::Correctness => {
                let correct = latest
                    .values()
                    .filter(|attempt| attempt.correct == Some(true))
                    .count() as u64;
                ModuleScore::Accuracy {
                    correct,
                    accuracy_pct: percentage(correct, completed),
                }
            }
            Scoring::AverageScore => {
                let avg = self
                    .answers
                    .average_score(user_id, module_type)
                    .await?
                    .unwrap_or(0.0);
                ModuleScore::AverageScore {
                    avg_score: round2(avg),
                }
            }
        };

        Ok(ModuleProgress {
            module_type,
            total,
            completed,
            progress_pct: percentage(completed, total),
            score,
            practice_count,
            exam_count,
        })
    }

    /// Per-module breakdown plus the cross-module rollup and the stored
    /// study-time/streak figures. Pure read.
    pub async fn compute_overall_stats(&self, user_id: &str) -> Result<OverallStats, ProgressError> {
        let mut modules = Vec::with_capacity(ModuleType::ALL.len());
        for module_type in ModuleType::ALL {
            modules.push(self.compute_module_progress(user_id, module_type).await?);
        }

        let total = modules.iter().map(|m| m.total).sum();
        let completed = modules.iter().map(|m| m.completed).sum();
        let total_practice_count = modules.iter().map(|m| m.practice_count).sum();
        let total_exam_count = modules.iter().map(|m| m.exam_count).sum();

        // Users with no snapshot row report zero study time and no streak.
        let (total_study_time, continuous_days, last_study_date) = self
            .snapshots
            .load(user_id)
            .await?
            .map(|s| (s.total_study_time, s.continuous_days, s.last_study_date))
            .unwrap_or((0, 0, None));

        Ok(OverallStats {
            modules,
            total,
            completed,
            overall_progress_pct: percentage(completed, total),
            total_practice_count,
            total_exam_count,
            total_study_time,
            continuous_days,
            last_study_date,
        })
    }

    /// Get-or-create read of the snapshot row. The first read materializes a
    /// fresh computation with no study time and no streak; only
    /// [`ProgressService::upsert_snapshot`] advances those.
    pub async fn snapshot(&self, user_id: &str) -> Result<ProgressSnapshot, ProgressError> {
        if let Some(existing) = self.snapshots.load(user_id).await? {
            return Ok(existing);
        }

        let modules = self.compute_all_modules(user_id).await?;
        let fresh = assemble_snapshot(user_id, &modules);

        if self.snapshots.insert(&fresh).await? {
            tracing::info!(user_id, "Created initial progress snapshot");
            return Ok(fresh);
        }

        // Lost the create race; the winner's row is authoritative.
        self.snapshots
            .load(user_id)
            .await?
            .ok_or_else(|| ProgressError::ConcurrentUpdateConflict(user_id.to_string()))
    }

    /// Recompute all module blocks, accumulate study time, advance the streak
    /// and persist, all under an optimistic lock (retry once on conflict).
    pub async fn upsert_snapshot(
        &self,
        user_id: &str,
        study_time_delta_minutes: u32,
    ) -> Result<ProgressSnapshot, ProgressError> {
        self.upsert_snapshot_on(user_id, study_time_delta_minutes, Utc::now().date_naive())
            .await
    }

    pub async fn upsert_snapshot_on(
        &self,
        user_id: &str,
        study_time_delta_minutes: u32,
        today: NaiveDate,
    ) -> Result<ProgressSnapshot, ProgressError> {
        let modules = self.compute_all_modules(user_id).await?;

        for attempt in 0..2 {
            if attempt > 0 {
                tracing::warn!(user_id, "Snapshot version conflict, retrying once");
            }

            match self.snapshots.load(user_id).await? {
                None => {
                    let mut snapshot = assemble_snapshot(user_id, &modules);
                    snapshot.total_study_time = u64::from(study_time_delta_minutes);
                    snapshot.apply_streak(advance_streak(StreakState::none(), today));

                    if self.snapshots.insert(&snapshot).await? {
                        SNAPSHOT_UPSERTS_TOTAL.with_label_values(&["created"]).inc();
                        tracing::info!(user_id, "Progress snapshot created");
                        return Ok(snapshot);
                    }
                }
                Some(existing) => {
                    // Full replace of the per-module blocks, not a merge.
                    let mut snapshot = assemble_snapshot(user_id, &modules);
                    snapshot.total_study_time =
                        existing.total_study_time + u64::from(study_time_delta_minutes);
                    snapshot.apply_streak(advance_streak(existing.streak(), today));
                    snapshot.version = existing.version + 1;
                    snapshot.created_at = existing.created_at;

                    if self.snapshots.replace(&snapshot, existing.version).await? {
                        SNAPSHOT_UPSERTS_TOTAL.with_label_values(&["updated"]).inc();
                        tracing::info!(
                            user_id,
                            continuous_days = snapshot.continuous_days,
                            total_study_time = snapshot.total_study_time,
                            "Progress snapshot updated"
                        );
                        return Ok(snapshot);
                    }
                }
            }
        }

        SNAPSHOT_UPSERTS_TOTAL.with_label_values(&["conflict"]).inc();
        Err(ProgressError::ConcurrentUpdateConflict(user_id.to_string()))
    }

    async fn compute_all_modules(
        &self,
        user_id: &str,
    ) -> Result<Vec<ModuleProgress>, ProgressError> {
        let mut modules = Vec::with_capacity(ModuleType::ALL.len());
        for module_type in ModuleType::ALL {
            modules.push(self.compute_module_progress(user_id, module_type).await?);
        }
        Ok(modules)
    }
}

fn assemble_snapshot(user_id: &str, modules: &[ModuleProgress]) -> ProgressSnapshot {
    let mut snapshot = ProgressSnapshot::empty(user_id, Utc::now());
    for progress in modules {
        *snapshot.module_mut(progress.module_type) = ModuleSnapshot::from(progress);
        snapshot.total_practice_count += progress.practice_count;
        snapshot.total_exam_count += progress.exam_count;
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn state(days: u32, last: Option<NaiveDate>) -> StreakState {
        StreakState {
            continuous_days: days,
            last_study_date: last,
        }
    }

    #[test]
    fn streak_first_study_starts_at_one() {
        let today = date(2026, 3, 10);
        let next = advance_streak(StreakState::none(), today);
        assert_eq!(next, state(1, Some(today)));
    }

    #[test]
    fn streak_same_day_is_idempotent() {
        let today = date(2026, 3, 10);
        let once = advance_streak(state(4, Some(date(2026, 3, 9))), today);
        let twice = advance_streak(once, today);
        assert_eq!(once, state(5, Some(today)));
        assert_eq!(twice, once);
    }

    #[test]
    fn streak_increments_on_consecutive_day() {
        let next = advance_streak(state(7, Some(date(2026, 3, 9))), date(2026, 3, 10));
        assert_eq!(next, state(8, Some(date(2026, 3, 10))));
    }

    #[test]
    fn streak_increments_across_month_boundary() {
        let next = advance_streak(state(2, Some(date(2026, 2, 28))), date(2026, 3, 1));
        assert_eq!(next, state(3, Some(date(2026, 3, 1))));
    }

    #[test]
    fn streak_resets_on_any_gap() {
        for gap in 2..6 {
            let last = date(2026, 3, 9);
            let today = last + chrono::Days::new(gap);
            let next = advance_streak(state(9, Some(last)), today);
            assert_eq!(next, state(1, Some(today)), "gap of {} days", gap);
        }
    }

    #[test]
    fn streak_resets_on_clock_skew_backwards() {
        let next = advance_streak(state(9, Some(date(2026, 3, 9))), date(2026, 3, 7));
        assert_eq!(next, state(1, Some(date(2026, 3, 7))));
    }
}
