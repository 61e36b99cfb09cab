//! Append-only, per-request versioned output store.
//!
//! Versions for a request id start at 1 and are gapless. A record saved
//! with version 0 gets `max + 1`; an explicit version is accepted only if
//! it is exactly `max + 1`. Version assignment runs under a store-wide
//! mutex so concurrent saves for the same request cannot collide.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thoughtline_types::output::{UNASSIGNED_VERSION, VersionedRecord};
use thoughtline_types::{PipelineError, Result};
use tokio::sync::Mutex;
use tracing::debug;

use super::document::{DocumentStore, InMemoryDocumentStore};

/// Range / equality filter over stored outputs. Unset fields match all.
///
/// Score and confidence bounds only match records that carry that field.
#[derive(Debug, Clone, Default)]
pub struct OutputFilter {
    pub request_id: Option<String>,
    pub min_score: Option<f32>,
    pub max_score: Option<f32>,
    pub min_confidence: Option<f32>,
    pub max_confidence: Option<f32>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

fn in_range(value: Option<f32>, min: Option<f32>, max: Option<f32>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(v) = value else {
        return false;
    };
    min.is_none_or(|m| v >= m) && max.is_none_or(|m| v <= m)
}

impl OutputFilter {
    pub fn matches<T: VersionedRecord>(&self, record: &T) -> bool {
        let meta = record.meta();
        if let Some(ref id) = self.request_id
            && meta.request_id != *id
        {
            return false;
        }
        if self.since.is_some_and(|s| meta.timestamp < s)
            || self.until.is_some_and(|u| meta.timestamp > u)
        {
            return false;
        }
        in_range(record.score(), self.min_score, self.max_score)
            && in_range(record.confidence(), self.min_confidence, self.max_confidence)
    }
}

/// Versioned store for one stage's outputs.
pub struct VersionedStore<T: VersionedRecord> {
    docs: Arc<dyn DocumentStore<T>>,
    assign: Mutex<()>,
}

fn prefix(request_id: &str) -> String {
    format!("{request_id}/")
}

fn key(request_id: &str, version: u32) -> String {
    format!("{request_id}/{version:010}")
}

impl<T: VersionedRecord> VersionedStore<T> {
    pub fn new(docs: Arc<dyn DocumentStore<T>>) -> Self {
        Self {
            docs,
            assign: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDocumentStore::<T>::new()))
    }

    /// Persist `record` as the next version for its request id and return
    /// it with the version filled in.
    pub async fn save(&self, mut record: T) -> Result<T> {
        let _guard = self.assign.lock().await;
        let request_id = record.request_id().to_string();
        let next = self
            .get_all_versions_by_request_id(&request_id)
            .await?
            .last()
            .map(|r| r.version() + 1)
            .unwrap_or(1);

        match record.version() {
            UNASSIGNED_VERSION => record.meta_mut().version = next,
            v if v == next => {}
            v => {
                return Err(PipelineError::validation(format!(
                    "{} version {v} for request {request_id} would break the sequence; next is {next}",
                    T::STAGE
                )));
            }
        }

        self.docs
            .put(&key(&request_id, record.version()), &record)
            .await?;
        debug!(
            stage = %T::STAGE,
            request_id = %request_id,
            version = record.version(),
            "saved stage output"
        );
        Ok(record)
    }

    /// Latest version for `request_id`, if any.
    pub async fn get_by_request_id(&self, request_id: &str) -> Result<Option<T>> {
        Ok(self
            .get_all_versions_by_request_id(request_id)
            .await?
            .pop())
    }

    /// Every version for `request_id`, ascending.
    pub async fn get_all_versions_by_request_id(&self, request_id: &str) -> Result<Vec<T>> {
        let mut versions: Vec<T> = self
            .docs
            .scan(&prefix(request_id))
            .await?
            .into_iter()
            .filter(|r| r.request_id() == request_id)
            .collect();
        versions.sort_by_key(|r| r.version());
        Ok(versions)
    }

    /// Records passing `filter`, ordered by timestamp then version.
    pub async fn get_all(&self, filter: &OutputFilter) -> Result<Vec<T>> {
        let candidates = match filter.request_id {
            Some(ref id) => self.docs.scan(&prefix(id)).await?,
            None => self.docs.list().await?,
        };
        let mut records: Vec<T> = candidates
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        records.sort_by(|a, b| {
            a.meta()
                .timestamp
                .cmp(&b.meta().timestamp)
                .then_with(|| a.version().cmp(&b.version()))
        });
        Ok(records)
    }

    pub async fn clear(&self) -> Result<()> {
        self.docs.clear().await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.docs.list().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoughtline_types::context::{ComplexityScore, Detection, RequestContext};
    use thoughtline_types::output::{ComplexityAssessment, OutputMeta, Plan, Step};

    fn plan(request_id: &str) -> Plan {
        Plan {
            meta: OutputMeta::new(&RequestContext::with_id(request_id, None)),
            steps: vec![Step {
                order: 1,
                description: "list".into(),
                action: Some("list_facilities".into()),
                parameters: Default::default(),
            }],
            rationale: String::new(),
            thought_version: 1,
            revised_from_critique: None,
        }
    }

    fn assessment(request_id: &str, score: f32, confidence: f32) -> ComplexityAssessment {
        ComplexityAssessment {
            meta: OutputMeta::new(&RequestContext::with_id(request_id, None)),
            query: "q".into(),
            complexity: ComplexityScore {
                score,
                reasoning_passes: 1,
                confidence,
                detection: Detection::Keyword {
                    detected_keywords: vec![],
                },
            },
        }
    }

    #[tokio::test]
    async fn versions_are_gapless_per_request() {
        let store = VersionedStore::in_memory();
        for _ in 0..3 {
            store.save(plan("a")).await.unwrap();
        }
        store.save(plan("b")).await.unwrap();

        let versions: Vec<u32> = store
            .get_all_versions_by_request_id("a")
            .await
            .unwrap()
            .iter()
            .map(|p| p.version())
            .collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(store.get_by_request_id("a").await.unwrap().unwrap().version(), 3);
        assert_eq!(store.get_by_request_id("b").await.unwrap().unwrap().version(), 1);
        assert!(store.get_by_request_id("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn explicit_version_must_be_next() {
        let store = VersionedStore::in_memory();
        let mut p = plan("a");
        p.meta.version = 1;
        store.save(p).await.unwrap();

        let mut gap = plan("a");
        gap.meta.version = 5;
        assert!(matches!(
            store.save(gap).await,
            Err(PipelineError::Validation { .. })
        ));

        let mut dup = plan("a");
        dup.meta.version = 1;
        assert!(store.save(dup).await.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prefix_collision_is_filtered() {
        let store = VersionedStore::in_memory();
        store.save(plan("a")).await.unwrap();
        store.save(plan("a/b")).await.unwrap();
        assert_eq!(store.get_all_versions_by_request_id("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_saves_stay_contiguous() {
        let store = Arc::new(VersionedStore::in_memory());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.save(plan("r")).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let versions: Vec<u32> = store
            .get_all_versions_by_request_id("r")
            .await
            .unwrap()
            .iter()
            .map(|p| p.version())
            .collect();
        assert_eq!(versions, (1..=8).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn numeric_range_filters() {
        let store = VersionedStore::in_memory();
        store.save(assessment("low", 0.1, 0.9)).await.unwrap();
        store.save(assessment("mid", 0.5, 0.6)).await.unwrap();
        store.save(assessment("high", 0.9, 0.3)).await.unwrap();

        let mid_up = store
            .get_all(&OutputFilter {
                min_score: Some(0.4),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(mid_up.len(), 2);

        let confident = store
            .get_all(&OutputFilter {
                min_confidence: Some(0.5),
                max_score: Some(0.6),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = confident.iter().map(|r| r.request_id()).collect();
        assert_eq!(ids, vec!["low", "mid"]);
    }

    #[tokio::test]
    async fn score_filter_excludes_unscored_records() {
        let store = VersionedStore::in_memory();
        store.save(plan("a")).await.unwrap();
        let hits = store
            .get_all(&OutputFilter {
                min_score: Some(0.0),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(store.get_all(&OutputFilter::default()).await.unwrap().len(), 1);
    }
}
