use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The five question-bank kinds the platform tracks progress for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Mcq,
    Lsa,
    Story,
    Opi,
    Atc,
}

impl ModuleType {
    pub const ALL: [ModuleType; 5] = [
        ModuleType::Mcq,
        ModuleType::Lsa,
        ModuleType::Story,
        ModuleType::Opi,
        ModuleType::Atc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Mcq => "mcq",
            ModuleType::Lsa => "lsa",
            ModuleType::Story => "story",
            ModuleType::Opi => "opi",
            ModuleType::Atc => "atc",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModuleType::Mcq => "Listening Multiple Choice",
            ModuleType::Lsa => "Listening Short Answer",
            ModuleType::Story => "Story Retell",
            ModuleType::Opi => "Oral Proficiency Interview",
            ModuleType::Atc => "ATC Simulation",
        }
    }

    /// MCQ and LSA track correctness; the speaking modules track graded scores.
    pub fn scoring(&self) -> Scoring {
        match self {
            ModuleType::Mcq | ModuleType::Lsa => Scoring::Correctness,
            ModuleType::Story | ModuleType::Opi | ModuleType::Atc => Scoring::AverageScore,
        }
    }

    pub fn question_collection(&self) -> &'static str {
        match self {
            ModuleType::Mcq => "mcq_questions",
            ModuleType::Lsa => "lsa_questions",
            ModuleType::Story => "retell_items",
            ModuleType::Opi => "opi_questions",
            ModuleType::Atc => "atc_turns",
        }
    }

    pub fn response_collection(&self) -> &'static str {
        match self {
            ModuleType::Mcq => "mcq_responses",
            ModuleType::Lsa => "lsa_responses",
            ModuleType::Story => "retell_responses",
            ModuleType::Opi => "opi_responses",
            ModuleType::Atc => "atc_turn_responses",
        }
    }
}

/// Unrecognized module-type tags are rejected at the boundary, never defaulted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown module type: {0}")]
pub struct UnknownModuleType(pub String);

impl FromStr for ModuleType {
    type Err = UnknownModuleType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mcq" => Ok(ModuleType::Mcq),
            "lsa" => Ok(ModuleType::Lsa),
            "story" => Ok(ModuleType::Story),
            "opi" => Ok(ModuleType::Opi),
            "atc" => Ok(ModuleType::Atc),
            other => Err(UnknownModuleType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scoring {
    Correctness,
    AverageScore,
}

/// Attempt mode. It never gates completion, only the practice/exam counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Practice,
    Exam,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Practice => "practice",
            Mode::Exam => "exam",
        }
    }
}

/// A question belonging to an active module, as surfaced by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRef {
    pub question_id: String,
    pub module_id: String,
}

/// One immutable answer attempt. Attempts accumulate; current state is always
/// derived from the latest attempt per question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub user_id: String,
    pub question_id: String,
    pub module_id: String,
    pub mode: Mode,
    pub correct: Option<bool>,
    pub score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// The latest attempt for one `(user, question)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestAttempt {
    pub correct: Option<bool>,
    pub score: Option<f64>,
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleProgress {
    pub module_type: ModuleType,
    pub total: u64,
    pub completed: u64,
    pub progress_pct: f64,
    #[serde(flatten)]
    pub score: ModuleScore,
    pub practice_count: u64,
    pub exam_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ModuleScore {
    Accuracy { correct: u64, accuracy_pct: f64 },
    AverageScore { avg_score: f64 },
}

/// Cross-module rollup. Study time and streak come from the stored snapshot
/// row and are zero/absent for a user without one.
#[derive(Debug, Clone, Serialize)]
pub struct OverallStats {
    pub modules: Vec<ModuleProgress>,
    pub total: u64,
    pub completed: u64,
    pub overall_progress_pct: f64,
    pub total_practice_count: u64,
    pub total_exam_count: u64,
    pub total_study_time: u64,
    pub continuous_days: u32,
    pub last_study_date: Option<NaiveDate>,
}

/// Per-module block of the denormalized snapshot. `correct` is populated for
/// correctness-scored modules, `avg_score` for graded ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    pub total: u64,
    pub completed: u64,
    pub correct: Option<u64>,
    pub avg_score: Option<f64>,
    pub practice_count: u64,
    pub exam_count: u64,
}

impl From<&ModuleProgress> for ModuleSnapshot {
    fn from(progress: &ModuleProgress) -> Self {
        let (correct, avg_score) = match progress.score {
            ModuleScore::Accuracy { correct, .. } => (Some(correct), None),
            ModuleScore::AverageScore { avg_score } => (None, Some(avg_score)),
        };
        ModuleSnapshot {
            total: progress.total,
            completed: progress.completed,
            correct,
            avg_score,
            practice_count: progress.practice_count,
            exam_count: progress.exam_count,
        }
    }
}

/// Denormalized per-user progress row. Exactly one per user: the user id is
/// the document id, so the storage layer enforces the uniqueness invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    #[serde(rename = "_id")]
    pub user_id: String,
    pub mcq: ModuleSnapshot,
    pub lsa: ModuleSnapshot,
    pub story: ModuleSnapshot,
    pub opi: ModuleSnapshot,
    pub atc: ModuleSnapshot,
    /// Cumulative study time in minutes.
    pub total_study_time: u64,
    pub total_practice_count: u64,
    pub total_exam_count: u64,
    pub continuous_days: u32,
    pub last_study_date: Option<NaiveDate>,
    /// Optimistic-lock version, bumped on every replace.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn empty(user_id: &str, now: DateTime<Utc>) -> Self {
        ProgressSnapshot {
            user_id: user_id.to_string(),
            mcq: ModuleSnapshot::default(),
            lsa: ModuleSnapshot::default(),
            story: ModuleSnapshot::default(),
            opi: ModuleSnapshot::default(),
            atc: ModuleSnapshot::default(),
            total_study_time: 0,
            total_practice_count: 0,
            total_exam_count: 0,
            continuous_days: 0,
            last_study_date: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn module(&self, module_type: ModuleType) -> &ModuleSnapshot {
        match module_type {
            ModuleType::Mcq => &self.mcq,
            ModuleType::Lsa => &self.lsa,
            ModuleType::Story => &self.story,
            ModuleType::Opi => &self.opi,
            ModuleType::Atc => &self.atc,
        }
    }

    pub fn module_mut(&mut self, module_type: ModuleType) -> &mut ModuleSnapshot {
        match module_type {
            ModuleType::Mcq => &mut self.mcq,
            ModuleType::Lsa => &mut self.lsa,
            ModuleType::Story => &mut self.story,
            ModuleType::Opi => &mut self.opi,
            ModuleType::Atc => &mut self.atc,
        }
    }

    pub fn streak(&self) -> StreakState {
        StreakState {
            continuous_days: self.continuous_days,
            last_study_date: self.last_study_date,
        }
    }

    pub fn apply_streak(&mut self, streak: StreakState) {
        self.continuous_days = streak.continuous_days;
        self.last_study_date = streak.last_study_date;
    }

    pub fn overall_progress_pct(&self) -> f64 {
        let (total, completed) = ModuleType::ALL.iter().fold((0, 0), |(t, c), mt| {
            let m = self.module(*mt);
            (t + m.total, c + m.completed)
        });
        percentage(completed, total)
    }
}

/// Progress payload returned to clients: the snapshot row flattened, plus the
/// derived percentages rendered directly by the mini-program.
#[derive(Debug, Serialize)]
pub struct LearningProgressResponse {
    #[serde(flatten)]
    pub snapshot: ProgressSnapshot,
    pub overall_progress_pct: f64,
    pub mcq_progress_pct: f64,
    pub lsa_progress_pct: f64,
    pub story_progress_pct: f64,
    pub opi_progress_pct: f64,
    pub atc_progress_pct: f64,
    pub mcq_accuracy_pct: f64,
    pub lsa_accuracy_pct: f64,
}

impl From<ProgressSnapshot> for LearningProgressResponse {
    fn from(snapshot: ProgressSnapshot) -> Self {
        fn progress(m: &ModuleSnapshot) -> f64 {
            percentage(m.completed, m.total)
        }
        fn accuracy(m: &ModuleSnapshot) -> f64 {
            percentage(m.correct.unwrap_or(0), m.completed)
        }
        LearningProgressResponse {
            overall_progress_pct: snapshot.overall_progress_pct(),
            mcq_progress_pct: progress(&snapshot.mcq),
            lsa_progress_pct: progress(&snapshot.lsa),
            story_progress_pct: progress(&snapshot.story),
            opi_progress_pct: progress(&snapshot.opi),
            atc_progress_pct: progress(&snapshot.atc),
            mcq_accuracy_pct: accuracy(&snapshot.mcq),
            lsa_accuracy_pct: accuracy(&snapshot.lsa),
            snapshot,
        }
    }
}

/// Continuous-study-days state, a pure function of the snapshot row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreakState {
    pub continuous_days: u32,
    pub last_study_date: Option<NaiveDate>,
}

impl StreakState {
    pub fn none() -> Self {
        StreakState {
            continuous_days: 0,
            last_study_date: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProgressRequest {
    /// Study time of this session in minutes, added to the cumulative total.
    #[serde(default)]
    pub study_time: u32,
}

#[derive(Debug, Serialize)]
pub struct ModuleTypeInfo {
    pub value: &'static str,
    pub label: &'static str,
}

/// `part / whole * 100`, rounded to two decimals. A zero denominator is
/// defined as 0, never an error.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_type_parses_known_tags() {
        for mt in ModuleType::ALL {
            assert_eq!(mt.as_str().parse::<ModuleType>().unwrap(), mt);
        }
    }

    #[test]
    fn module_type_rejects_unknown_tag() {
        let err = "listening".parse::<ModuleType>().unwrap_err();
        assert_eq!(err.0, "listening");
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(4, 6), 66.67);
        assert_eq!(percentage(6, 10), 60.0);
        assert_eq!(percentage(1, 3), 33.33);
    }

    #[test]
    fn percentage_zero_denominator_is_zero() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(5, 0), 0.0);
    }

    #[test]
    fn percentage_stays_within_bounds() {
        for completed in 0..=20u64 {
            for total in completed..=20u64 {
                let pct = percentage(completed, total);
                assert!(
                    (0.0..=100.0).contains(&pct),
                    "{}/{} -> {}",
                    completed,
                    total,
                    pct
                );
            }
        }
    }

    #[test]
    fn snapshot_overall_progress_sums_all_modules() {
        let mut snapshot = ProgressSnapshot::empty("u1", Utc::now());
        snapshot.mcq.total = 10;
        snapshot.mcq.completed = 6;
        snapshot.opi.total = 10;
        snapshot.opi.completed = 2;
        assert_eq!(snapshot.overall_progress_pct(), 40.0);
    }

    #[test]
    fn empty_snapshot_overall_progress_is_zero() {
        let snapshot = ProgressSnapshot::empty("u1", Utc::now());
        assert_eq!(snapshot.overall_progress_pct(), 0.0);
    }

    #[test]
    fn progress_response_derives_percentages() {
        let mut snapshot = ProgressSnapshot::empty("u1", Utc::now());
        snapshot.mcq = ModuleSnapshot {
            total: 10,
            completed: 6,
            correct: Some(4),
            avg_score: None,
            practice_count: 5,
            exam_count: 1,
        };
        snapshot.opi.total = 10;

        let view = LearningProgressResponse::from(snapshot);
        assert_eq!(view.overall_progress_pct, 30.0);
        assert_eq!(view.mcq_progress_pct, 60.0);
        assert_eq!(view.mcq_accuracy_pct, 66.67);
        assert_eq!(view.opi_progress_pct, 0.0);
        assert_eq!(view.lsa_progress_pct, 0.0);
        assert_eq!(view.lsa_accuracy_pct, 0.0);
    }

    #[test]
    fn progress_response_flattens_snapshot_fields() {
        let view = LearningProgressResponse::from(ProgressSnapshot::empty("u1", Utc::now()));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["_id"], "u1");
        assert_eq!(json["continuous_days"], 0);
        assert_eq!(json["total_study_time"], 0);
        assert_eq!(json["overall_progress_pct"], 0.0);
        assert_eq!(json["mcq"]["total"], 0);
    }
}
