//! Offline capability implementations.
//!
//! These need no network and are fully deterministic, which makes them the
//! defaults for the CLI and the reference fakes for tests.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;

use parking_lot::RwLock;
use triage_core::{Embedding, GroupId, RcaReport, Result, TriageError, l2_normalize};

use crate::analysis::TemporalPattern;
use crate::capabilities::{EmbeddingProvider, Neighbor, RcaGenerator, RcaRequest, SimilarityIndex};

/// Embeds text by feature-hashing its lowercase tokens.
///
/// Each token is hashed with BLAKE3; the low bits pick a bucket and one more
/// bit picks the sign. The result is L2-normalized, so texts sharing most of
/// their tokens end up close in cosine distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Creates an embedder producing `dimension`-wide vectors.
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Embeds synchronously.
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return Embedding::new(vector);
        }
        for token in tokens(text) {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            let h = u64::from_le_bytes(word);
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        Embedding::new(vector)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Embedding>> + Send + 'a>> {
        Box::pin(async move { Ok(self.embed_sync(text)) })
    }
}

/// Exact nearest-neighbour search over an in-memory map.
#[derive(Debug, Default)]
pub struct FlatIndex {
    dimension: usize,
    vectors: RwLock<HashMap<GroupId, Embedding>>,
}

impl FlatIndex {
    /// Creates an empty index for `dimension`-wide vectors.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Number of indexed groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }

    /// Returns the stored vector for a group.
    #[must_use]
    pub fn get(&self, group_id: &GroupId) -> Option<Embedding> {
        self.vectors.read().get(group_id).cloned()
    }

    fn search(&self, vector: &Embedding, k: usize) -> Result<Vec<Neighbor>> {
        vector.check(self.dimension)?;
        let vectors = self.vectors.read();
        let mut hits: Vec<Neighbor> = vectors
            .iter()
            .map(|(group_id, stored)| Neighbor {
                group_id: group_id.clone(),
                distance: vector.distance_to(stored).unwrap_or(1.0),
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.group_id.cmp(&b.group_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

impl SimilarityIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn query<'a>(
        &'a self,
        vector: &'a Embedding,
        k: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Neighbor>>> + Send + 'a>> {
        Box::pin(async move { self.search(vector, k) })
    }

    fn upsert<'a>(
        &'a self,
        group_id: &'a GroupId,
        vector: &'a Embedding,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            vector.check(self.dimension)?;
            self.vectors.write().insert(group_id.clone(), vector.clone());
            Ok(())
        })
    }

    fn remove<'a>(
        &'a self,
        group_id: &'a GroupId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.vectors.write().remove(group_id);
            Ok(())
        })
    }
}

/// Writes a deterministic narrative from the incident pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRcaGenerator;

impl TemplateRcaGenerator {
    /// Creates the generator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Renders the report synchronously.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::GenerationUnavailable` for a request without alerts.
    pub fn render(&self, request: &RcaRequest) -> Result<RcaReport> {
        let pattern = &request.pattern;
        let Some(first) = pattern.timeline.first() else {
            return Err(TriageError::GenerationUnavailable {
                reason: format!("group {} has no alerts to analyze", request.group.id),
            });
        };
        let group = &request.group;

        let mut text = String::new();
        let _ = writeln!(text, "Root Cause Analysis: {}", group.title);
        let _ = writeln!(text);
        let _ = writeln!(
            text,
            "Summary: {} alerts, highest severity {}, over {} minutes.",
            pattern.timeline.len(),
            group.max_severity,
            pattern.span_secs / 60
        );

        let _ = writeln!(text);
        let _ = writeln!(text, "Root Cause:");
        match pattern.dominant_service() {
            Some(service) => {
                let _ = writeln!(
                    text,
                    "The incident most likely originates in service '{service}', which raised \
                     {} of {} alerts. The first signal was \"{}\".",
                    pattern.services.get(service).copied().unwrap_or(0),
                    pattern.timeline.len(),
                    first.title
                );
            }
            None => {
                let _ = writeln!(
                    text,
                    "No service was reported. The first signal was \"{}\".",
                    first.title
                );
            }
        }
        let _ = writeln!(
            text,
            "{}",
            match pattern.temporal {
                TemporalPattern::Simultaneous => {
                    "Alerts fired together, pointing at a shared dependency or infrastructure fault."
                }
                TemporalPattern::Cascading => {
                    "Alerts followed each other within minutes, consistent with a failure propagating between components."
                }
                TemporalPattern::Sequential => {
                    "Alerts were spread out over time, suggesting a recurring or slowly degrading condition."
                }
            }
        );
        if pattern.is_escalating() {
            let _ = writeln!(text, "Severity escalated over the course of the incident.");
        }

        let _ = writeln!(text);
        let _ = writeln!(text, "Timeline:");
        for entry in &pattern.timeline {
            let _ = writeln!(
                text,
                "- {} [{}] {}{}",
                entry.at.format("%Y-%m-%d %H:%M:%S"),
                entry.severity,
                entry.title,
                entry
                    .service
                    .as_deref()
                    .map(|s| format!(" ({s})"))
                    .unwrap_or_default()
            );
        }

        if !pattern.hosts.is_empty() {
            let hosts: Vec<&str> = pattern.hosts.keys().map(String::as_str).collect();
            let _ = writeln!(text);
            let _ = writeln!(text, "Affected hosts: {}", hosts.join(", "));
        }

        let _ = writeln!(text);
        let _ = writeln!(text, "Recommended Actions:");
        let _ = writeln!(
            text,
            "1. Check recent deployments and configuration changes on the affected services."
        );
        let _ = writeln!(
            text,
            "2. Inspect resource usage on the affected hosts around {}.",
            first.at.format("%H:%M")
        );
        let _ = writeln!(text, "3. Verify upstream dependencies shared by the affected services.");

        let confidence = confidence(request, &text);
        Ok(RcaReport::new(text).with_confidence(confidence))
    }
}

/// Average of three factors: alert volume, pattern quality and narrative depth.
fn confidence(request: &RcaRequest, narrative: &str) -> f64 {
    let volume = match request.alerts.len() {
        n if n >= 5 => 0.9,
        n if n >= 3 => 0.7,
        n if n >= 1 => 0.5,
        _ => 0.2,
    };
    let patterns = if request.pattern.services.is_empty() {
        0.4
    } else {
        0.8
    };
    let depth = if narrative.len() > 1000 && narrative.contains("Root Cause") {
        0.8
    } else if narrative.len() > 500 {
        0.6
    } else {
        0.4
    };
    (volume + patterns + depth) / 3.0
}

impl RcaGenerator for TemplateRcaGenerator {
    fn generate<'a>(
        &'a self,
        request: &'a RcaRequest,
    ) -> Pin<Box<dyn Future<Output = Result<RcaReport>> + Send + 'a>> {
        Box::pin(async move { self.render(request) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::{Alert, Group, Severity};

    mod embedder_tests {
        use super::*;

        #[test]
        fn output_is_unit_length_and_deterministic() {
            let embedder = HashingEmbedder::new(64);
            let a = embedder.embed_sync("CPU usage high on web-01");
            let b = embedder.embed_sync("cpu USAGE high on web-01");
            assert_eq!(a, b);
            let norm: f32 = a.as_slice().iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }

        #[test]
        fn similar_text_is_closer_than_unrelated_text() {
            let embedder = HashingEmbedder::new(256);
            let base = embedder.embed_sync("Title: High CPU usage | Service: web-api | Host: web-01");
            let near = embedder.embed_sync("Title: High CPU usage | Service: web-api | Host: web-02");
            let far = embedder.embed_sync("Title: Disk almost full | Service: billing | Host: db-09");
            let d_near = base.distance_to(&near).expect("distance");
            let d_far = base.distance_to(&far).expect("distance");
            assert!(d_near < d_far, "{d_near} should be below {d_far}");
        }

        #[test]
        fn empty_text_is_zero_vector() {
            let v = HashingEmbedder::new(8).embed_sync("  -- ");
            assert!(v.as_slice().iter().all(|x| *x == 0.0));
        }

        #[tokio::test]
        async fn async_embed_matches_sync() {
            let embedder = HashingEmbedder::new(32);
            let v = embedder.embed("disk full").await.expect("embed");
            assert_eq!(v, embedder.embed_sync("disk full"));
            assert_eq!(EmbeddingProvider::dimension(&embedder), 32);
        }
    }

    mod index_tests {
        use super::*;

        #[tokio::test]
        async fn query_orders_by_distance() {
            let index = FlatIndex::new(2);
            index
                .upsert(&GroupId::new("east"), &Embedding::new(vec![1.0, 0.0]))
                .await
                .expect("upsert");
            index
                .upsert(&GroupId::new("north"), &Embedding::new(vec![0.0, 1.0]))
                .await
                .expect("upsert");
            index
                .upsert(&GroupId::new("diag"), &Embedding::new(vec![1.0, 1.0]))
                .await
                .expect("upsert");

            let hits = index
                .query(&Embedding::new(vec![1.0, 0.1]), 2)
                .await
                .expect("query");
            assert_eq!(hits.len(), 2);
            assert_eq!(hits[0].group_id, GroupId::new("east"));
            assert_eq!(hits[1].group_id, GroupId::new("diag"));
            assert!(hits[0].distance <= hits[1].distance);
        }

        #[tokio::test]
        async fn upsert_replaces_vector() {
            let index = FlatIndex::new(2);
            let id = GroupId::new("g");
            index.upsert(&id, &Embedding::new(vec![1.0, 0.0])).await.expect("upsert");
            index.upsert(&id, &Embedding::new(vec![0.0, 1.0])).await.expect("upsert");
            assert_eq!(index.len(), 1);
            assert_eq!(index.get(&id), Some(Embedding::new(vec![0.0, 1.0])));
        }

        #[tokio::test]
        async fn removed_groups_leave_results() {
            let index = FlatIndex::new(2);
            let kept = GroupId::new("kept");
            let gone = GroupId::new("gone");
            index.upsert(&kept, &Embedding::new(vec![0.0, 1.0])).await.expect("upsert");
            index.upsert(&gone, &Embedding::new(vec![1.0, 0.0])).await.expect("upsert");

            index.remove(&gone).await.expect("remove");
            index.remove(&GroupId::new("never")).await.expect("remove unknown");

            let hits = index
                .query(&Embedding::new(vec![1.0, 0.0]), 5)
                .await
                .expect("query");
            let ids: Vec<&str> = hits.iter().map(|n| n.group_id.as_str()).collect();
            assert_eq!(ids, vec!["kept"]);
        }

        #[tokio::test]
        async fn dimension_mismatch_rejected() {
            let index = FlatIndex::new(3);
            let err = index
                .query(&Embedding::new(vec![1.0, 0.0]), 5)
                .await
                .unwrap_err();
            assert_eq!(
                err,
                TriageError::EmbeddingDimensionMismatch {
                    expected: 3,
                    actual: 2
                }
            );
            assert!(index.is_empty());
        }
    }

    mod generator_tests {
        use super::*;
        use chrono::{Duration, Utc};
        use triage_core::AlertId;

        fn request(n: usize) -> RcaRequest {
            let start = Utc::now();
            let alerts: Vec<Alert> = (0..n)
                .map(|i| {
                    Alert::new(
                        AlertId::new(format!("a{i}")),
                        format!("CPU {}%", 90 + i),
                        Severity::High,
                        "Prometheus",
                    )
                    .with_service("web-api")
                    .with_host("web-01")
                    .at(start + Duration::minutes(i as i64))
                })
                .collect();
            let mut group = Group::seed(GroupId::new("g1"), &alerts[0], &Embedding::new(vec![1.0]));
            for a in &alerts[1..] {
                group.absorb(a, &Embedding::new(vec![1.0]));
            }
            RcaRequest::new(group, alerts)
        }

        #[test]
        fn narrative_mentions_service_and_pattern() {
            let report = TemplateRcaGenerator::new().render(&request(3)).expect("render");
            assert!(report.narrative.contains("Root Cause"));
            assert!(report.narrative.contains("web-api"));
            assert!(report.narrative.contains("CPU 90%"));
            assert!(report.narrative.contains("within minutes") || report.narrative.contains("together"));
            let confidence = report.confidence.expect("confidence");
            assert!((0.0..=1.0).contains(&confidence));
        }

        #[test]
        fn more_alerts_raise_confidence() {
            let generator = TemplateRcaGenerator::new();
            let small = generator.render(&request(1)).expect("render").confidence.expect("c");
            let large = generator.render(&request(6)).expect("render").confidence.expect("c");
            assert!(large > small);
        }

        #[tokio::test]
        async fn empty_request_fails() {
            let mut req = request(1);
            req.alerts.clear();
            req.pattern = crate::analysis::IncidentPattern::analyze(&[]);
            let err = TemplateRcaGenerator::new().generate(&req).await.unwrap_err();
            assert!(err.is_generation_failure());
        }
    }
}
