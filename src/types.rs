use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How often a pipeline delivers. Stored as a lowercase string; anything the
/// store hands back that is not one of the three known kinds deserializes to
/// `Unknown` and is never considered due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Daily,
    Weekly,
    Monthly,
    #[serde(other)]
    Unknown,
}

impl ScheduleKind {
    /// Listing window the retrieval stage requests from the content source.
    pub fn time_window(self) -> TimeWindow {
        match self {
            ScheduleKind::Daily => TimeWindow::Day,
            ScheduleKind::Weekly => TimeWindow::Week,
            ScheduleKind::Monthly => TimeWindow::Month,
            ScheduleKind::Unknown => TimeWindow::Day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Day,
    Week,
    Month,
}

impl TimeWindow {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
        }
    }
}

fn default_is_active() -> bool {
    true
}

/// One configured recurring content-generation job, owned by the persistence
/// store. `delivery_count` and `last_delivered` are mutated only through the
/// delivery ledger after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub user_id: String,
    pub subreddits: Vec<String>,
    pub schedule: ScheduleKind,
    pub delivery_time: NaiveTime,
    #[serde(default)]
    pub focus: String,
    #[serde(default)]
    pub delivery_count: i64,
    #[serde(default)]
    pub last_delivered: Option<DateTime<Utc>>,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
}

/// One retrieved content unit. `id` is the listing fullname (e.g. `t3_abc12`)
/// and `text` is the title and selftext joined by a newline. Ephemeral: lives
/// for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub source: String,
    pub id: String,
    pub text: String,
    pub num_comments: u32,
    pub score: i64,
    pub permalink: String,
    pub created_utc: f64,
}

/// A titled cluster of related item ids, produced by the selection agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub title: String,
    pub related_post_ids: Vec<String>,
}

/// One resolved group member with its discussion context.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedMember {
    pub item: RawItem,
    pub discussion: String,
    pub permalink: String,
}

/// A Group after enrichment: every member resolved to a retrieved item plus
/// discussion text and an absolute permalink.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedGroup {
    pub title: String,
    pub members: Vec<EnrichedMember>,
}

/// Discussion context for a single item.
#[derive(Debug, Clone)]
pub struct Discussion {
    pub text: String,
    pub permalink: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

/// Citation of one original post inside a generated article. Field names
/// follow the product's established camelCase contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub subreddit: String,
    pub post_id: String,
    pub post_title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPoint {
    pub point: String,
    pub sentiment: Sentiment,
    pub subreddits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevantLink {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentions: Option<u32>,
}

/// Final output unit, one per surviving group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArticle {
    pub title: String,
    pub summary: String,
    pub sources: Vec<SourceRef>,
    pub key_points: Vec<KeyPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevant_links: Option<Vec<RelevantLink>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_sentiment: Option<Sentiment>,
}

/// Structured outcome of one pipeline run, also the wire shape of the trigger
/// surface's per-run responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunResult {
    pub success: bool,
    pub pipeline_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<GeneratedArticle>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineRunResult {
    pub fn ok(pipeline_id: &str, articles: Vec<GeneratedArticle>) -> Self {
        Self {
            success: true,
            pipeline_id: pipeline_id.to_string(),
            content: Some(articles),
            error: None,
        }
    }

    pub fn failed(pipeline_id: &str, error: &PipelineError) -> Self {
        Self {
            success: false,
            pipeline_id: pipeline_id.to_string(),
            content: None,
            error: Some(error.to_string()),
        }
    }
}

/// Stage-level tuning for the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub comment_threshold: u32,
    pub retrieval_limit: usize,
    pub max_comment_depth: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            comment_threshold: 5,
            retrieval_limit: 25,
            max_comment_depth: 5,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Empty result: {0}")]
    Empty(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Pipeline not found: {0}")]
    NotFound(String),

    #[error("Pipeline already running: {0}")]
    AlreadyRunning(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
