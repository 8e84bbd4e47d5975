use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

const POPULAR_TOPIC_COUNT: usize = 5;
const MIN_TOPIC_WORD_CHARS: usize = 4;
const DEFAULT_SATISFACTION: f64 = 4.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: Uuid,
    pub query: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub processing_time: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub query: String,
    pub response: String,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAnalytics {
    pub total_feedback: usize,
    pub average_rating: f64,
    /// Count per rating, keyed "1" through "5"
    pub rating_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub total_queries: u64,
    pub average_response_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAnalytics {
    pub total_queries: u64,
    pub average_response_time: f64,
    pub popular_topics: Vec<TopicCount>,
    pub user_satisfaction: f64,
}

#[derive(Debug)]
struct Logs {
    queries: VecDeque<QueryRecord>,
    feedback: VecDeque<FeedbackRecord>,
    total_queries: u64,
    total_response_time: f64,
}

/// In-memory usage log owned by the HTTP shell.
///
/// Query and feedback records are bounded queues that evict their oldest
/// entry when full. Counters cover every query since start or last reset,
/// not just the retained ones. Nothing here survives a restart.
#[derive(Debug)]
pub struct ActivityLog {
    max_queries: usize,
    max_feedback: usize,
    logs: RwLock<Logs>,
}

impl ActivityLog {
    #[inline]
    pub fn new(max_queries: usize, max_feedback: usize) -> Self {
        Self {
            max_queries: max_queries.max(1),
            max_feedback: max_feedback.max(1),
            logs: RwLock::new(Logs {
                queries: VecDeque::new(),
                feedback: VecDeque::new(),
                total_queries: 0,
                total_response_time: 0.0,
            }),
        }
    }

    #[inline]
    pub async fn record_query(&self, record: QueryRecord) {
        let mut logs = self.logs.write().await;
        logs.total_queries += 1;
        logs.total_response_time += record.processing_time;
        if logs.queries.len() == self.max_queries {
            logs.queries.pop_front();
        }
        logs.queries.push_back(record);
    }

    #[inline]
    pub async fn record_feedback(&self, record: FeedbackRecord) {
        let mut logs = self.logs.write().await;
        if logs.feedback.len() == self.max_feedback {
            logs.feedback.pop_front();
        }
        logs.feedback.push_back(record);
    }

    /// Most recent queries first, optionally only those of `user`
    #[inline]
    pub async fn history(&self, limit: usize, user: Option<&str>) -> Vec<QueryRecord> {
        let logs = self.logs.read().await;
        logs.queries
            .iter()
            .rev()
            .filter(|record| user.is_none_or(|u| record.user.as_deref() == Some(u)))
            .take(limit)
            .cloned()
            .collect()
    }

    #[inline]
    pub async fn feedback_analytics(&self) -> FeedbackAnalytics {
        let logs = self.logs.read().await;
        let mut distribution: BTreeMap<String, usize> =
            (1..=5).map(|rating: u8| (rating.to_string(), 0)).collect();
        for record in &logs.feedback {
            *distribution.entry(record.rating.to_string()).or_default() += 1;
        }

        FeedbackAnalytics {
            total_feedback: logs.feedback.len(),
            average_rating: round_to(average_rating(&logs.feedback).unwrap_or(0.0), 2),
            rating_distribution: distribution,
        }
    }

    #[inline]
    pub async fn query_stats(&self) -> QueryStats {
        let logs = self.logs.read().await;
        QueryStats {
            total_queries: logs.total_queries,
            average_response_time: round_to(average_response_time(&logs), 3),
        }
    }

    /// Aggregate usage: popular topics are the most frequent words longer
    /// than three characters across retained questions
    #[inline]
    pub async fn usage_analytics(&self) -> UsageAnalytics {
        let logs = self.logs.read().await;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for record in &logs.queries {
            for word in record
                .query
                .split(|c: char| !c.is_alphanumeric())
                .filter(|word| word.chars().count() >= MIN_TOPIC_WORD_CHARS)
            {
                *counts.entry(word.to_lowercase()).or_default() += 1;
            }
        }
        let popular_topics = counts
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
            .take(POPULAR_TOPIC_COUNT)
            .map(|(topic, count)| TopicCount { topic, count })
            .collect();

        UsageAnalytics {
            total_queries: logs.total_queries,
            average_response_time: round_to(average_response_time(&logs), 3),
            popular_topics,
            user_satisfaction: round_to(
                average_rating(&logs.feedback).unwrap_or(DEFAULT_SATISFACTION),
                2,
            ),
        }
    }

    /// Forget all queries, feedback and counters
    #[inline]
    pub async fn reset(&self) {
        let mut logs = self.logs.write().await;
        logs.queries.clear();
        logs.feedback.clear();
        logs.total_queries = 0;
        logs.total_response_time = 0.0;
    }
}

fn average_rating(feedback: &VecDeque<FeedbackRecord>) -> Option<f64> {
    if feedback.is_empty() {
        return None;
    }
    let sum: u64 = feedback.iter().map(|record| u64::from(record.rating)).sum();
    Some(sum as f64 / feedback.len() as f64)
}

fn average_response_time(logs: &Logs) -> f64 {
    if logs.total_queries == 0 {
        0.0
    } else {
        logs.total_response_time / logs.total_queries as f64
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(text: &str, user: Option<&str>, processing_time: f64) -> QueryRecord {
        QueryRecord {
            query_id: Uuid::new_v4(),
            query: text.to_string(),
            answer: "answer".to_string(),
            sources: vec!["intro.txt".to_string()],
            processing_time,
            timestamp: Utc::now(),
            user: user.map(str::to_string),
        }
    }

    fn feedback(rating: u8) -> FeedbackRecord {
        FeedbackRecord {
            query: "q".to_string(),
            response: "r".to_string(),
            rating,
            comment: None,
            timestamp: Utc::now(),
            user: None,
        }
    }

    #[tokio::test]
    async fn query_log_evicts_oldest() {
        let log = ActivityLog::new(3, 10);
        for n in 0..5 {
            log.record_query(query(&format!("question {n}"), None, 1.0)).await;
        }

        let history = log.history(10, None).await;
        let texts: Vec<&str> = history.iter().map(|r| r.query.as_str()).collect();
        assert_eq!(texts, vec!["question 4", "question 3", "question 2"]);
        assert_eq!(log.query_stats().await.total_queries, 5);
    }

    #[tokio::test]
    async fn history_filters_by_user_and_limit() {
        let log = ActivityLog::new(100, 10);
        log.record_query(query("alice one", Some("alice"), 0.1)).await;
        log.record_query(query("bob one", Some("bob"), 0.1)).await;
        log.record_query(query("alice two", Some("alice"), 0.1)).await;

        let alice = log.history(10, Some("alice")).await;
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].query, "alice two");
        assert_eq!(log.history(1, None).await.len(), 1);
    }

    #[tokio::test]
    async fn feedback_analytics_rounds_and_counts() {
        let log = ActivityLog::new(10, 2);
        for rating in [1, 5, 4] {
            log.record_feedback(feedback(rating)).await;
        }

        let analytics = log.feedback_analytics().await;
        // the rating 1 was evicted
        assert_eq!(analytics.total_feedback, 2);
        assert!((analytics.average_rating - 4.5).abs() < f64::EPSILON);
        assert_eq!(analytics.rating_distribution["1"], 0);
        assert_eq!(analytics.rating_distribution["4"], 1);
        assert_eq!(analytics.rating_distribution["5"], 1);
        assert_eq!(analytics.rating_distribution.len(), 5);
    }

    #[tokio::test]
    async fn usage_analytics_reports_topics_and_default_satisfaction() {
        let log = ActivityLog::new(10, 10);
        log.record_query(query("What is the capital of France?", None, 0.2)).await;
        log.record_query(query("Capital of Germany", None, 0.4)).await;

        let usage = log.usage_analytics().await;

        assert_eq!(usage.total_queries, 2);
        assert!((usage.average_response_time - 0.3).abs() < 1e-9);
        assert_eq!(
            usage.popular_topics[0],
            TopicCount {
                topic: "capital".to_string(),
                count: 2
            }
        );
        assert!(usage.popular_topics.iter().all(|t| t.topic.len() > 3));
        assert!((usage.user_satisfaction - DEFAULT_SATISFACTION).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let log = ActivityLog::new(10, 10);
        log.record_query(query("question", None, 1.0)).await;
        log.record_feedback(feedback(3)).await;

        log.reset().await;

        assert!(log.history(10, None).await.is_empty());
        assert_eq!(log.feedback_analytics().await.total_feedback, 0);
        assert_eq!(log.query_stats().await.total_queries, 0);
    }
}
