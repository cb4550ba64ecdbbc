//! Relevance-scored session memory store.
//!
//! Retrieval ranks items with simple lexical heuristics, not embeddings. The
//! weighting constants are empirically chosen and load-bearing for
//! reproducible behavior; they must not be tuned casually.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{MemoryItem, MemoryKind, MemoryMetadata, MemoryStats};
use crate::intent::{Intent, IntentType};

/// Relevance floor for soft context retrieval; scores at or below are excluded.
pub const RELEVANCE_FLOOR: f64 = 0.1;
/// Higher floor for exact lookups via `search`.
pub const SEARCH_FLOOR: f64 = 0.2;

const EXACT_MATCH_SCORE: f64 = 1.0;
const TOKEN_OVERLAP_WEIGHT: f64 = 0.8;
const PREFERENCE_MULTIPLIER: f64 = 1.2;
const FACT_MULTIPLIER: f64 = 1.1;
const CONTEXT_MULTIPLIER: f64 = 0.9;
const RECENCY_WINDOW_HOURS: i64 = 24;
const RECENCY_MULTIPLIER: f64 = 1.1;
const USAGE_BONUS_PER_USE: f64 = 0.05;
const USAGE_BONUS_CAP: f64 = 0.2;
const SCORE_CAP: f64 = 2.0;
/// Scores closer than this are treated as ties for ordering purposes.
const TIE_EPSILON: f64 = 0.01;
/// Each use extends an item's effective sweep lifetime by 10%, uncapped.
const LIFETIME_EXTENSION_PER_USE: f64 = 0.1;

/// Per-session append-only fact store with relevance-ranked retrieval.
///
/// All state lives behind a single async `RwLock`; every mutating operation
/// (including the usage-count side effect of retrieval) takes the write
/// lock, so per-item increments are atomic and different sessions never see
/// each other's updates torn.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Vec<MemoryItem>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one item. Always succeeds; returns the stored item.
    pub async fn store(
        &self,
        session_id: &str,
        content: impl Into<String>,
        kind: MemoryKind,
        metadata: MemoryMetadata,
    ) -> MemoryItem {
        let item = MemoryItem {
            id: format!("mem-{}", Uuid::new_v4()),
            session_id: session_id.to_string(),
            content: content.into(),
            kind,
            created_at: Utc::now(),
            usage_count: 0,
            metadata,
        };

        let mut items = self.items.write().await;
        items
            .entry(session_id.to_string())
            .or_default()
            .push(item.clone());

        tracing::debug!(target: "memory", session_id, kind = ?item.kind, "stored memory item");
        item
    }

    /// Extracts and stores facts from a successfully classified request.
    ///
    /// Captures subject/grade preferences, a context note for the request
    /// itself, intent-specific facts, and teaching-style preferences
    /// signalled by the message wording.
    pub async fn store_classification(
        &self,
        session_id: &str,
        message: &str,
        intent: &Intent,
        subjects: &[String],
        grades: &[i32],
    ) -> Vec<MemoryItem> {
        let metadata = MemoryMetadata {
            intent: Some(intent.kind),
            subjects: subjects.to_vec(),
            grades: grades.to_vec(),
            confidence: Some(intent.confidence),
        };

        let mut stored = Vec::new();
        for (content, kind) in extract_facts(message, intent, subjects, grades) {
            stored
                .push(self.store(session_id, content, kind, metadata.clone()).await);
        }
        stored
    }

    /// Returns up to `limit` items ordered by descending relevance, ties
    /// broken by descending recency.
    ///
    /// Each returned item's usage count is incremented as a side effect, so
    /// callers must not invoke this speculatively.
    pub async fn retrieve_relevant(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> Vec<MemoryItem> {
        self.ranked_retrieval(session_id, query, RELEVANCE_FLOOR, Some(limit), false)
            .await
    }

    /// Same ranking machinery as [`retrieve_relevant`] but with a higher
    /// relevance floor, intended for exact lookups. Ties break by descending
    /// usage count instead of recency.
    ///
    /// [`retrieve_relevant`]: Self::retrieve_relevant
    pub async fn search(&self, session_id: &str, query: &str) -> Vec<MemoryItem> {
        self.ranked_retrieval(session_id, query, SEARCH_FLOOR, None, true)
            .await
    }

    async fn ranked_retrieval(
        &self,
        session_id: &str,
        query: &str,
        floor: f64,
        limit: Option<usize>,
        ties_by_usage: bool,
    ) -> Vec<MemoryItem> {
        let mut guard = self.items.write().await;
        let Some(list) = guard.get_mut(session_id) else {
            return Vec::new();
        };

        let now = Utc::now();
        let mut scored: Vec<(usize, f64, DateTime<Utc>, u32)> = list
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                (
                    idx,
                    relevance_score(item, query, now),
                    item.created_at,
                    item.usage_count,
                )
            })
            .filter(|(_, score, _, _)| *score > floor)
            .collect();

        scored.sort_by(|a, b| {
            if (a.1 - b.1).abs() < TIE_EPSILON {
                if ties_by_usage {
                    b.3.cmp(&a.3)
                } else {
                    b.2.cmp(&a.2)
                }
            } else {
                b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
            }
        });

        if let Some(limit) = limit {
            scored.truncate(limit);
        }

        let mut results = Vec::with_capacity(scored.len());
        for (idx, _, _, _) in scored {
            list[idx].usage_count += 1;
            results.push(list[idx].clone());
        }
        results
    }

    /// Returns the most recent items, newest first. Not a retrieval call:
    /// usage counts are untouched.
    pub async fn recent(&self, session_id: &str, limit: usize) -> Vec<MemoryItem> {
        let guard = self.items.read().await;
        let Some(list) = guard.get(session_id) else {
            return Vec::new();
        };

        let mut items = list.clone();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        items
    }

    /// Returns all items of one kind, in insertion order.
    pub async fn by_kind(&self, session_id: &str, kind: MemoryKind) -> Vec<MemoryItem> {
        let guard = self.items.read().await;
        guard
            .get(session_id)
            .map(|list| list.iter().filter(|i| i.kind == kind).cloned().collect())
            .unwrap_or_default()
    }

    /// Deletes items older than `base_max_age * (1 + usage_count * 0.1)`:
    /// frequently used items survive longer. Returns the number deleted.
    pub async fn sweep(&self, session_id: &str, base_max_age: Duration) -> usize {
        let mut guard = self.items.write().await;
        let Some(list) = guard.get_mut(session_id) else {
            return 0;
        };

        let now = Utc::now();
        let base_secs = base_max_age.num_seconds() as f64;
        let before = list.len();
        list.retain(|item| {
            let effective =
                base_secs * (1.0 + item.usage_count as f64 * LIFETIME_EXTENSION_PER_USE);
            (now - item.created_at).num_seconds() as f64 <= effective
        });

        let deleted = before - list.len();
        if deleted > 0 {
            tracing::info!(target: "memory", session_id, deleted, "retention sweep");
        }
        deleted
    }

    /// Aggregate statistics for one session.
    pub async fn stats(&self, session_id: &str) -> MemoryStats {
        let guard = self.items.read().await;
        let Some(list) = guard.get(session_id) else {
            return MemoryStats::default();
        };

        let total = list.len();
        let usage_sum: u64 = list.iter().map(|i| i.usage_count as u64).sum();
        MemoryStats {
            total_items: total,
            fact_count: list.iter().filter(|i| i.kind == MemoryKind::Fact).count(),
            preference_count: list
                .iter()
                .filter(|i| i.kind == MemoryKind::Preference)
                .count(),
            context_count: list
                .iter()
                .filter(|i| i.kind == MemoryKind::Context)
                .count(),
            average_usage: if total > 0 {
                usage_sum as f64 / total as f64
            } else {
                0.0
            },
            oldest_item: list.iter().map(|i| i.created_at).min(),
            newest_item: list.iter().map(|i| i.created_at).max(),
        }
    }

    /// Clones the session's items for persistence.
    pub async fn snapshot(&self, session_id: &str) -> Vec<MemoryItem> {
        let guard = self.items.read().await;
        guard.get(session_id).cloned().unwrap_or_default()
    }

    /// Replaces the session's items, e.g. when hydrating from storage.
    pub async fn restore(&self, session_id: &str, items: Vec<MemoryItem>) {
        let mut guard = self.items.write().await;
        guard.insert(session_id.to_string(), items);
    }
}

/// Scores one item against a query.
///
/// Exact substring match of the full query adds 1.0; token overlap adds up
/// to 0.8; the item kind multiplies (preference 1.2, fact 1.1, context 0.9);
/// items under 24 hours old multiply by 1.1; usage adds up to 0.2; the total
/// clamps at 2.0.
fn relevance_score(item: &MemoryItem, query: &str, now: DateTime<Utc>) -> f64 {
    let query_lower = query.to_lowercase();
    let query_tokens: Vec<&str> = query_lower.split_whitespace().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }

    let content_lower = item.content.to_lowercase();
    let mut score = 0.0;

    if content_lower.contains(&query_lower) {
        score += EXACT_MATCH_SCORE;
    }

    let item_tokens: Vec<&str> = content_lower.split_whitespace().collect();
    let common = query_tokens
        .iter()
        .filter(|q| item_tokens.iter().any(|t| t.contains(**q) || q.contains(t)))
        .count();
    score += common as f64 / query_tokens.len() as f64 * TOKEN_OVERLAP_WEIGHT;

    score *= match item.kind {
        MemoryKind::Preference => PREFERENCE_MULTIPLIER,
        MemoryKind::Fact => FACT_MULTIPLIER,
        MemoryKind::Context => CONTEXT_MULTIPLIER,
    };

    if now - item.created_at < Duration::hours(RECENCY_WINDOW_HOURS) {
        score *= RECENCY_MULTIPLIER;
    }

    score += (item.usage_count as f64 * USAGE_BONUS_PER_USE).min(USAGE_BONUS_CAP);

    score.min(SCORE_CAP)
}

/// Builds the facts worth remembering from a classified request.
fn extract_facts(
    message: &str,
    intent: &Intent,
    subjects: &[String],
    grades: &[i32],
) -> Vec<(String, MemoryKind)> {
    let mut facts = Vec::new();
    let message_lower = message.to_lowercase();

    if !subjects.is_empty() {
        facts.push((
            format!("Teacher works with subjects: {}", subjects.join(", ")),
            MemoryKind::Preference,
        ));
    }

    if !grades.is_empty() {
        let grades: Vec<String> = grades.iter().map(|g| g.to_string()).collect();
        facts.push((
            format!("Teacher handles grades: {}", grades.join(", ")),
            MemoryKind::Preference,
        ));
    }

    facts.push((
        format!(
            "User requested {} with confidence {}%",
            intent.kind, intent.confidence
        ),
        MemoryKind::Context,
    ));

    match intent.kind {
        IntentType::WorksheetGeneration => facts.push((
            format!(
                "Teacher creates worksheets for {} subjects",
                subjects.join(", ")
            ),
            MemoryKind::Fact,
        )),
        IntentType::LessonPlanning => facts.push((
            "Teacher plans lessons for multi-grade classroom".to_string(),
            MemoryKind::Fact,
        )),
        IntentType::BehaviorManagement => facts.push((
            "Teacher needs help with classroom behavior management".to_string(),
            MemoryKind::Preference,
        )),
        IntentType::Translation => facts.push((
            "Teacher uses bilingual content (English/Hindi)".to_string(),
            MemoryKind::Preference,
        )),
        _ => {}
    }

    if message_lower.contains("simple") || message_lower.contains("easy") {
        facts.push((
            "Teacher prefers simple, easy-to-understand content".to_string(),
            MemoryKind::Preference,
        ));
    }
    if message_lower.contains("visual") || message_lower.contains("diagram") {
        facts.push((
            "Teacher uses visual aids and diagrams".to_string(),
            MemoryKind::Preference,
        ));
    }
    if message_lower.contains("interactive") || message_lower.contains("activity") {
        facts.push((
            "Teacher prefers interactive activities".to_string(),
            MemoryKind::Preference,
        ));
    }

    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "session-test";

    fn item(content: &str, kind: MemoryKind, age: Duration, usage: u32) -> MemoryItem {
        MemoryItem {
            id: format!("mem-{}", Uuid::new_v4()),
            session_id: SESSION.to_string(),
            content: content.to_string(),
            kind,
            created_at: Utc::now() - age,
            usage_count: usage,
            metadata: MemoryMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_store_appends() {
        let store = MemoryStore::new();
        let stored = store
            .store(SESSION, "Teacher uses visual aids", MemoryKind::Preference, MemoryMetadata::default())
            .await;
        assert_eq!(stored.usage_count, 0);

        let snapshot = store.snapshot(SESSION).await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content, "Teacher uses visual aids");
    }

    #[tokio::test]
    async fn test_exact_phrase_outranks_partial_match() {
        let store = MemoryStore::new();
        store
            .restore(
                SESSION,
                vec![
                    item("notes about fractions homework", MemoryKind::Fact, Duration::zero(), 0),
                    item("the visual aids cupboard", MemoryKind::Fact, Duration::zero(), 0),
                ],
            )
            .await;

        let results = store.retrieve_relevant(SESSION, "visual aids", 5).await;
        assert!(!results.is_empty());
        assert_eq!(results[0].content, "the visual aids cupboard");
    }

    #[tokio::test]
    async fn test_retrieval_increments_usage_exactly_once() {
        let store = MemoryStore::new();
        store
            .restore(
                SESSION,
                vec![item("prefers visual diagrams", MemoryKind::Preference, Duration::zero(), 0)],
            )
            .await;

        let results = store.retrieve_relevant(SESSION, "visual diagrams", 5).await;
        assert_eq!(results[0].usage_count, 1);

        let snapshot = store.snapshot(SESSION).await;
        assert_eq!(snapshot[0].usage_count, 1);
    }

    #[tokio::test]
    async fn test_items_beyond_limit_are_not_incremented() {
        let store = MemoryStore::new();
        store
            .restore(
                SESSION,
                vec![
                    item("visual aids for science", MemoryKind::Preference, Duration::zero(), 0),
                    item("visual aids for maths", MemoryKind::Fact, Duration::zero(), 0),
                ],
            )
            .await;

        let results = store.retrieve_relevant(SESSION, "visual aids", 1).await;
        assert_eq!(results.len(), 1);

        let snapshot = store.snapshot(SESSION).await;
        let touched: u32 = snapshot.iter().map(|i| i.usage_count).sum();
        assert_eq!(touched, 1);
    }

    #[test]
    fn test_usage_bonus_caps_at_point_two() {
        let now = Utc::now();
        let low = item("unrelated words entirely", MemoryKind::Context, Duration::hours(48), 2);
        let mid = item("unrelated words entirely", MemoryKind::Context, Duration::hours(48), 4);
        let high = item("unrelated words entirely", MemoryKind::Context, Duration::hours(48), 40);

        let query = "nothing shared";
        assert!(relevance_score(&mid, query, now) > relevance_score(&low, query, now));
        // Both at the cap
        let delta = relevance_score(&high, query, now) - relevance_score(&mid, query, now);
        assert!(delta.abs() < 1e-12);
    }

    #[test]
    fn test_score_clamps_at_two() {
        let now = Utc::now();
        let hot = item("exact match text", MemoryKind::Preference, Duration::zero(), 100);
        assert!(relevance_score(&hot, "exact match text", now) <= 2.0);
    }

    #[test]
    fn test_empty_query_scores_nothing() {
        let now = Utc::now();
        let it = item("anything at all", MemoryKind::Fact, Duration::zero(), 0);
        assert_eq!(relevance_score(&it, "", now), 0.0);
        assert_eq!(relevance_score(&it, "   ", now), 0.0);
    }

    #[tokio::test]
    async fn test_search_uses_higher_floor() {
        let store = MemoryStore::new();
        // Shares one of five query tokens: 0.2 * 0.8 * 0.9 = 0.144, above
        // the retrieval floor but below the search floor.
        store
            .restore(
                SESSION,
                vec![item("fractions worksheet", MemoryKind::Context, Duration::hours(30), 0)],
            )
            .await;

        let query = "quiz about decimals please worksheet"; // 5 tokens, 1 shared
        let soft = store.retrieve_relevant(SESSION, query, 5).await;
        let exact = store.search(SESSION, query).await;
        assert_eq!(soft.len(), 1);
        assert!(exact.is_empty());
    }

    #[tokio::test]
    async fn test_ties_break_by_recency() {
        let store = MemoryStore::new();
        store
            .restore(
                SESSION,
                vec![
                    item("quiz ideas list", MemoryKind::Fact, Duration::hours(30), 0),
                    item("quiz ideas list", MemoryKind::Fact, Duration::hours(26), 0),
                ],
            )
            .await;

        let results = store.retrieve_relevant(SESSION, "quiz ideas list", 5).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].created_at > results[1].created_at);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = MemoryStore::new();
        store
            .restore(
                SESSION,
                vec![
                    item("stale note", MemoryKind::Context, Duration::days(10), 0),
                    item("fresh note", MemoryKind::Context, Duration::hours(1), 0),
                ],
            )
            .await;

        let first = store.sweep(SESSION, Duration::days(7)).await;
        assert_eq!(first, 1);
        let second = store.sweep(SESSION, Duration::days(7)).await;
        assert_eq!(second, 0);
        assert_eq!(store.snapshot(SESSION).await.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_spares_frequently_used_items() {
        let store = MemoryStore::new();
        // 10 days old with base 7 days: survives only with the 50% usage
        // extension from 5 uses (7 * 1.5 = 10.5 days).
        store
            .restore(
                SESSION,
                vec![
                    item("well used note", MemoryKind::Fact, Duration::days(10), 5),
                    item("never used note", MemoryKind::Fact, Duration::days(10), 0),
                ],
            )
            .await;

        let deleted = store.sweep(SESSION, Duration::days(7)).await;
        assert_eq!(deleted, 1);
        let left = store.snapshot(SESSION).await;
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].content, "well used note");
    }

    #[tokio::test]
    async fn test_store_classification_extracts_facts() {
        let store = MemoryStore::new();
        let classifier = crate::intent::IntentClassifier::new();
        let subjects = vec!["Mathematics".to_string()];
        let grades = vec![3];
        let intent = classifier.classify(
            "Create a simple worksheet with visual diagrams",
            &subjects,
            &grades,
        );

        let stored = store
            .store_classification(SESSION, "Create a simple worksheet with visual diagrams", &intent, &subjects, &grades)
            .await;

        let contents: Vec<&str> = stored.iter().map(|i| i.content.as_str()).collect();
        assert!(contents.iter().any(|c| c.contains("works with subjects: Mathematics")));
        assert!(contents.iter().any(|c| c.contains("handles grades: 3")));
        assert!(contents.iter().any(|c| c.contains("requested worksheetGeneration")));
        assert!(contents.iter().any(|c| c.contains("simple, easy-to-understand")));
        assert!(contents.iter().any(|c| c.contains("visual aids and diagrams")));
        assert!(stored.iter().all(|i| i.metadata.intent == Some(IntentType::WorksheetGeneration)));
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryStore::new();
        store
            .restore(
                SESSION,
                vec![
                    item("a fact", MemoryKind::Fact, Duration::hours(2), 2),
                    item("a preference", MemoryKind::Preference, Duration::hours(1), 0),
                ],
            )
            .await;

        let stats = store.stats(SESSION).await;
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.fact_count, 1);
        assert_eq!(stats.preference_count, 1);
        assert_eq!(stats.context_count, 0);
        assert!((stats.average_usage - 1.0).abs() < f64::EPSILON);
        assert!(stats.oldest_item.unwrap() < stats.newest_item.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = MemoryStore::new();
        assert!(store.retrieve_relevant("nope", "query", 5).await.is_empty());
        assert_eq!(store.sweep("nope", Duration::days(1)).await, 0);
        assert_eq!(store.stats("nope").await.total_items, 0);
    }
}
