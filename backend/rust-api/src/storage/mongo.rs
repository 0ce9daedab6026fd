use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    Collection, Database,
};

use crate::models::{LatestAttempt, Mode, ModuleType, ProgressSnapshot, QuestionRef};

use super::{AnswerStore, Catalog, SnapshotStore};

const MODULES_COLLECTION: &str = "exam_modules";
const SNAPSHOT_COLLECTION: &str = "learning_progress";

pub struct MongoCatalog {
    db: Database,
}

impl MongoCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for MongoCatalog {
    async fn active_questions(&self, module_type: ModuleType) -> Result<Vec<QuestionRef>> {
        let modules = self.db.collection::<Document>(MODULES_COLLECTION);
        let mut cursor = modules
            .find(doc! { "module_type": module_type.as_str(), "is_active": true })
            .projection(doc! { "_id": 1 })
            .await
            .context("Failed to query active modules")?;

        let mut module_ids = Vec::new();
        while let Some(module_doc) = cursor.try_next().await? {
            module_ids.push(doc_id(&module_doc)?);
        }

        if module_ids.is_empty() {
            return Ok(Vec::new());
        }

        let questions = self.db.collection::<Document>(module_type.question_collection());
        let mut cursor = questions
            .find(doc! { "module_id": { "$in": &module_ids }, "is_active": true })
            .projection(doc! { "_id": 1, "module_id": 1 })
            .await
            .context("Failed to query active questions")?;

        let mut refs = Vec::new();
        while let Some(question_doc) = cursor.try_next().await? {
            refs.push(QuestionRef {
                question_id: doc_id(&question_doc)?,
                module_id: question_doc.get_str("module_id")?.to_string(),
            });
        }

        Ok(refs)
    }
}

pub struct MongoAnswerStore {
    db: Database,
}

impl MongoAnswerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AnswerStore for MongoAnswerStore {
    async fn latest_attempts(
        &self,
        user_id: &str,
        module_type: ModuleType,
        question_ids: &[String],
    ) -> Result<HashMap<String, LatestAttempt>> {
        if question_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let collection = self.db.collection::<Document>(module_type.response_collection());

        // Latest attempt per question in a single round trip; sort before
        // $group so $first picks the newest row of each group.
        let pipeline = vec![
            doc! { "$match": { "user_id": user_id, "question_id": { "$in": question_ids } } },
            doc! { "$sort": { "created_at": -1 } },
            doc! { "$group": {
                "_id": "$question_id",
                "correct": { "$first": "$correct" },
                "score": { "$first": "$score" },
                "mode": { "$first": "$mode" },
                "created_at": { "$first": "$created_at" },
            }},
        ];

        let mut cursor = collection
            .aggregate(pipeline)
            .await
            .context("Failed to aggregate latest attempts")?;

        let mut latest = HashMap::new();
        while let Some(row) = cursor.try_next().await? {
            let question_id = doc_id(&row)?;
            latest.insert(
                question_id,
                LatestAttempt {
                    correct: row.get_bool("correct").ok(),
                    score: read_score(&row),
                    mode: read_mode(&row),
                    created_at: read_created_at(&row),
                },
            );
        }

        Ok(latest)
    }

    async fn count_by_mode(
        &self,
        user_id: &str,
        module_type: ModuleType,
        mode: Mode,
    ) -> Result<u64> {
        let collection = self.db.collection::<Document>(module_type.response_collection());
        collection
            .count_documents(doc! { "user_id": user_id, "mode": mode.as_str() })
            .await
            .context("Failed to count attempts by mode")
    }

    async fn average_score(&self, user_id: &str, module_type: ModuleType) -> Result<Option<f64>> {
        let collection = self.db.collection::<Document>(module_type.response_collection());

        let pipeline = vec![
            doc! { "$match": { "user_id": user_id, "score": { "$ne": null } } },
            doc! { "$group": { "_id": null, "avg_score": { "$avg": "$score" } } },
        ];

        let mut cursor = collection
            .aggregate(pipeline)
            .await
            .context("Failed to aggregate average score")?;

        match cursor.try_next().await? {
            Some(row) => Ok(row.get_f64("avg_score").ok()),
            None => Ok(None),
        }
    }
}

pub struct MongoSnapshotStore {
    collection: Collection<ProgressSnapshot>,
}

impl MongoSnapshotStore {
    pub fn new(db: Database) -> Self {
        Self {
            collection: db.collection(SNAPSHOT_COLLECTION),
        }
    }
}

#[async_trait]
impl SnapshotStore for MongoSnapshotStore {
    async fn load(&self, user_id: &str) -> Result<Option<ProgressSnapshot>> {
        self.collection
            .find_one(doc! { "_id": user_id })
            .await
            .context("Failed to load progress snapshot")
    }

    async fn insert(&self, snapshot: &ProgressSnapshot) -> Result<bool> {
        match self.collection.insert_one(snapshot).await {
            Ok(_) => Ok(true),
            // Duplicate key on _id means another writer created the row first.
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e).context("Failed to insert progress snapshot"),
        }
    }

    async fn replace(&self, snapshot: &ProgressSnapshot, expected_version: i64) -> Result<bool> {
        let result = self
            .collection
            .replace_one(
                doc! { "_id": &snapshot.user_id, "version": expected_version },
                snapshot,
            )
            .await
            .context("Failed to replace progress snapshot")?;

        Ok(result.modified_count > 0)
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we)) =
        *error.kind
    {
        return we.code == 11000;
    }
    false
}

// Catalog and response ids are strings throughout; anything else in `_id` is
// corrupt data and surfaces as an error rather than a silently shrunk result.
fn doc_id(doc: &Document) -> Result<String> {
    Ok(doc
        .get_str("_id")
        .context("document _id is not a string")?
        .to_string())
}

fn read_score(row: &Document) -> Option<f64> {
    row.get_f64("score")
        .ok()
        .or_else(|| row.get_i32("score").ok().map(f64::from))
        .or_else(|| row.get_i64("score").ok().map(|v| v as f64))
}

fn read_mode(row: &Document) -> Mode {
    match row.get_str("mode") {
        Ok("exam") => Mode::Exam,
        _ => Mode::Practice,
    }
}

fn read_created_at(row: &Document) -> DateTime<Utc> {
    if let Ok(dt) = row.get_datetime("created_at") {
        return DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(DateTime::UNIX_EPOCH);
    }
    row.get_str("created_at")
        .ok()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;

    #[test]
    fn doc_id_accepts_string_ids_only() {
        assert_eq!(doc_id(&doc! { "_id": "m1" }).unwrap(), "m1");
        assert!(doc_id(&doc! { "_id": ObjectId::new() }).is_err());
        assert!(doc_id(&doc! { "name": "no id" }).is_err());
    }
}
