use crate::types::{Discussion, PipelineError, RawItem, Result, TimeWindow};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::Client;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_BASE: &str = "https://oauth.reddit.com";
const WEB_BASE: &str = "https://www.reddit.com";

/// Upstream content provider. One method per pipeline stage that talks to it:
/// listing retrieval and per-item discussion context.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Top items for one source over the given window, newest-engagement
    /// first as the provider ranks them.
    async fn fetch_top(&self, source: &str, window: TimeWindow, limit: usize)
        -> Result<Vec<RawItem>>;

    /// Discussion text and canonical permalink for one item.
    async fn fetch_discussion(
        &self,
        source: &str,
        item_id: &str,
        max_depth: usize,
    ) -> Result<Discussion>;
}

#[derive(Debug, Clone)]
pub struct RedditConfig {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    /// Minimum spacing between API requests.
    pub min_request_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: "oxinews-pipeline/0.1".to_string(),
            timeout_seconds: 30,
            min_request_interval_ms: 1000,
            max_retries: 2,
            retry_delay_seconds: 2,
        }
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Reddit API client using the client-credentials OAuth flow. The token is
/// cached until shortly before expiry and refreshed on demand.
pub struct RedditClient {
    client: Client,
    config: RedditConfig,
    token: Arc<RwLock<Option<CachedToken>>>,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RedditClient {
    pub fn new(config: RedditConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            config,
            token: Arc::new(RwLock::new(None)),
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    async fn access_token(&self) -> Result<String> {
        {
            let token = self.token.read().await;
            if let Some(cached) = token.as_ref() {
                if Instant::now() < cached.expires_at {
                    return Ok(cached.access_token.clone());
                }
            }
        }
        self.refresh_token().await
    }

    async fn refresh_token(&self) -> Result<String> {
        debug!("Requesting new Reddit access token");

        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Collaborator(format!(
                "Reddit token request failed with HTTP {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PipelineError::Collaborator(
                    "Reddit token response is missing access_token".to_string(),
                )
            })?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(3600);

        let mut token = self.token.write().await;
        // Refresh a minute early so requests in flight never race expiry.
        *token = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in.saturating_sub(60)),
        });

        Ok(access_token)
    }

    async fn apply_rate_limit(&self) {
        let min_interval = Duration::from_millis(self.config.min_request_interval_ms);
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < min_interval {
                let wait = min_interval - elapsed;
                debug!("Rate limiting Reddit API, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value> {
        self.apply_rate_limit().await;
        let token = self.access_token().await?;
        let url = format!("{}{}", API_BASE, path);

        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            initial_interval: Duration::from_secs(self.config.retry_delay_seconds),
            current_interval: Duration::from_secs(self.config.retry_delay_seconds),
            max_interval: Duration::from_secs(self.config.retry_delay_seconds * 8),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.retry_delay_seconds * 20)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(params)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json::<Value>().await?);
                    }
                    last_error = Some(PipelineError::Collaborator(format!(
                        "Reddit API returned HTTP {} for {}",
                        status, path
                    )));
                    // 4xx will not heal on retry.
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    last_error = Some(PipelineError::Http(e));
                }
            }

            if attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    warn!(
                        "Reddit request attempt {} failed for {}, retrying in {:?}",
                        attempt + 1,
                        path,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PipelineError::Collaborator(format!("Reddit request failed for {}", path))
        }))
    }
}

#[async_trait]
impl ContentSource for RedditClient {
    async fn fetch_top(
        &self,
        source: &str,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<RawItem>> {
        debug!("Fetching top posts from r/{} over one {}", source, window.as_str());

        let body = self
            .get_json(
                &format!("/r/{}/top", source),
                &[
                    ("t", window.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let children = body
            .pointer("/data/children")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut items = Vec::new();
        for child in &children {
            let data = match child.get("data") {
                Some(data) => data,
                None => continue,
            };
            let id = data
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if id.is_empty() {
                continue;
            }
            let title = data.get("title").and_then(|v| v.as_str()).unwrap_or_default();
            let selftext = data
                .get("selftext")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            items.push(RawItem {
                source: data
                    .get("subreddit")
                    .and_then(|v| v.as_str())
                    .unwrap_or(source)
                    .to_string(),
                id,
                text: format!("{}\n{}", title, selftext),
                num_comments: data
                    .get("num_comments")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32,
                score: data.get("score").and_then(|v| v.as_i64()).unwrap_or(0),
                permalink: data
                    .get("permalink")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                created_utc: data
                    .get("created_utc")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
            });
        }

        debug!("Fetched {} posts from r/{}", items.len(), source);
        Ok(items)
    }

    async fn fetch_discussion(
        &self,
        source: &str,
        item_id: &str,
        max_depth: usize,
    ) -> Result<Discussion> {
        let bare_id = item_id.strip_prefix("t3_").unwrap_or(item_id);
        debug!("Fetching discussion for r/{} post {}", source, bare_id);

        let body = self
            .get_json(
                &format!("/r/{}/comments/{}", source, bare_id),
                &[
                    ("depth", max_depth.to_string()),
                    ("limit", "100".to_string()),
                ],
            )
            .await?;

        // The comments endpoint returns two listings: the submission itself,
        // then the comment forest.
        let listings = body.as_array().cloned().unwrap_or_default();

        let permalink = listings
            .first()
            .and_then(|l| l.pointer("/data/children/0/data/permalink"))
            .and_then(|v| v.as_str())
            .map(|p| format!("{}{}", WEB_BASE, p))
            .unwrap_or_else(|| format!("{}/r/{}/comments/{}", WEB_BASE, source, bare_id));

        let mut lines = Vec::new();
        if let Some(forest) = listings
            .get(1)
            .and_then(|l| l.pointer("/data/children"))
            .and_then(|v| v.as_array())
        {
            for node in forest {
                collect_comment_bodies(node, 0, max_depth, &mut lines);
            }
        }

        Ok(Discussion {
            text: lines.join("\n"),
            permalink,
        })
    }
}

/// Walk one comment subtree depth-first, collecting bodies indented by reply
/// depth, stopping at `max_depth`.
fn collect_comment_bodies(node: &Value, depth: usize, max_depth: usize, out: &mut Vec<String>) {
    if depth >= max_depth {
        return;
    }
    let data = match node.get("data") {
        Some(data) => data,
        None => return,
    };
    if let Some(body) = data.get("body").and_then(|v| v.as_str()) {
        if !body.is_empty() {
            out.push(format!("{}- {}", "  ".repeat(depth), body));
        }
    }
    if let Some(replies) = data
        .pointer("/replies/data/children")
        .and_then(|v| v.as_array())
    {
        for child in replies {
            collect_comment_bodies(child, depth + 1, max_depth, out);
        }
    }
}

/// Canned content source for tests and local development. Sources marked
/// failing error on retrieval, everything else serves preloaded data.
#[derive(Default)]
pub struct StaticSource {
    items: HashMap<String, Vec<RawItem>>,
    discussions: HashMap<String, Discussion>,
    failing: HashSet<String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(mut self, source: &str, items: Vec<RawItem>) -> Self {
        self.items.insert(source.to_string(), items);
        self
    }

    pub fn with_discussion(mut self, item_id: &str, discussion: Discussion) -> Self {
        self.discussions.insert(item_id.to_string(), discussion);
        self
    }

    pub fn with_failing_source(mut self, source: &str) -> Self {
        self.failing.insert(source.to_string());
        self
    }
}

#[async_trait]
impl ContentSource for StaticSource {
    async fn fetch_top(
        &self,
        source: &str,
        _window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<RawItem>> {
        if self.failing.contains(source) {
            return Err(PipelineError::Collaborator(format!(
                "source {} is unavailable",
                source
            )));
        }
        Ok(self
            .items
            .get(source)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(limit)
            .collect())
    }

    async fn fetch_discussion(
        &self,
        _source: &str,
        item_id: &str,
        _max_depth: usize,
    ) -> Result<Discussion> {
        self.discussions.get(item_id).cloned().ok_or_else(|| {
            PipelineError::Collaborator(format!("no discussion available for {}", item_id))
        })
    }
}
