use crate::types::{
    GeneratedArticle, Group, KeyPoint, PipelineError, RawItem, Result, Sentiment,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Generation collaborator. Two calls per run: cluster the retrieved items,
/// then write one article per enriched cluster.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Cluster items into titled groups relevant to the focus. May return an
    /// empty list when nothing is relevant.
    async fn select_groups(&self, items: &[RawItem], focus: &str) -> Result<Vec<Group>>;

    /// Write one article for an enriched cluster. `enriched_content` is the
    /// serialized member list with discussion context.
    async fn write_article(
        &self,
        focus: &str,
        group_title: &str,
        enriched_content: &str,
    ) -> Result<GeneratedArticle>;
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 120,
            temperature: 0.2,
        }
    }
}

const SELECTOR_SYSTEM_PROMPT: &str = r#"You will be given a focus topic and a collection of Reddit posts as {post_id: post_content} pairs. Identify the posts relevant to the focus topic and group related posts under a common title. Each title must concisely capture the shared theme of its group and be specific, never generic filler. Discard posts that are irrelevant to the focus topic. Respond with a single JSON object of the form {"output": [{"title": "...", "related_post_ids": ["..."]}]} and nothing else."#;

const WRITER_SYSTEM_PROMPT: &str = r#"You are a professional newsletter writer. You will be given a focus topic, a theme, and a set of Reddit discussions selected for that theme. Write one well-sourced newsletter article covering the discussions, staying on the focus topic and keeping a professional tone. Respond with a single JSON object and nothing else, using exactly this shape:
{
  "title": "...",
  "summary": "...",
  "sources": [{"subreddit": "...", "postId": "...", "postTitle": "...", "url": "...", "commentCount": 0, "upvotes": 0}],
  "keyPoints": [{"point": "...", "sentiment": "positive|negative|neutral|mixed", "subreddits": ["..."]}],
  "relevantLinks": [{"title": "...", "url": "...", "mentions": 0}],
  "overallSentiment": "positive|negative|neutral|mixed"
}"#;

#[derive(Debug, Deserialize)]
struct SelectionResponse {
    output: Vec<Group>,
}

/// Agent backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmAgent {
    client: Client,
    config: AgentConfig,
}

impl LlmAgent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        debug!("Sending chat request to {}", self.config.model);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Collaborator(format!(
                "chat API returned HTTP {}",
                response.status()
            )));
        }

        let payload: Value = response.json().await?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                PipelineError::Collaborator("chat API response is missing message content".to_string())
            })?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl Agent for LlmAgent {
    async fn select_groups(&self, items: &[RawItem], focus: &str) -> Result<Vec<Group>> {
        let mut posts = serde_json::Map::new();
        for item in items {
            posts.insert(item.id.clone(), Value::String(item.text.clone()));
        }

        let user = format!(
            "Focus topic: {}\nPosts:\n{}",
            focus,
            serde_json::to_string_pretty(&Value::Object(posts))?
        );

        let raw = self.chat(SELECTOR_SYSTEM_PROMPT, &user).await?;
        let parsed: SelectionResponse = parse_json_response(&raw)?;
        Ok(parsed.output)
    }

    async fn write_article(
        &self,
        focus: &str,
        group_title: &str,
        enriched_content: &str,
    ) -> Result<GeneratedArticle> {
        let user = format!(
            "Focus topic: {}\nTheme: {}\nSelected discussions:\n{}",
            focus, group_title, enriched_content
        );

        let raw = self.chat(WRITER_SYSTEM_PROMPT, &user).await?;
        parse_json_response(&raw)
    }
}

/// Parse a typed value out of model output, tolerating markdown fences and
/// prose around the JSON object.
fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let object = extract_json_object(raw).ok_or_else(|| {
        PipelineError::Collaborator("agent response contains no JSON object".to_string())
    })?;
    serde_json::from_str(object).map_err(|e| {
        PipelineError::Collaborator(format!("agent response does not match the expected shape: {}", e))
    })
}

/// Extract the first balanced JSON object from `text`. Tracks string and
/// escape state so braces inside string values do not confuse the depth
/// count.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Scripted agent for tests. Queued responses are served in order; with an
/// empty queue it falls back to deterministic output derived from its input,
/// so happy-path tests need no scripting at all.
#[derive(Default)]
pub struct MockAgent {
    selections: Mutex<VecDeque<Result<Vec<Group>>>>,
    articles: Mutex<VecDeque<Result<GeneratedArticle>>>,
    select_calls: Mutex<Vec<Vec<String>>>,
    write_calls: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(delay_ms));
        self
    }

    pub fn push_selection(&self, groups: Vec<Group>) {
        self.selections
            .lock()
            .expect("mock state poisoned")
            .push_back(Ok(groups));
    }

    pub fn push_selection_error(&self, message: &str) {
        self.selections
            .lock()
            .expect("mock state poisoned")
            .push_back(Err(PipelineError::Collaborator(message.to_string())));
    }

    pub fn push_article(&self, article: GeneratedArticle) {
        self.articles
            .lock()
            .expect("mock state poisoned")
            .push_back(Ok(article));
    }

    pub fn push_article_error(&self, message: &str) {
        self.articles
            .lock()
            .expect("mock state poisoned")
            .push_back(Err(PipelineError::Collaborator(message.to_string())));
    }

    /// Item ids passed to each `select_groups` call, in call order.
    pub fn select_calls(&self) -> Vec<Vec<String>> {
        self.select_calls.lock().expect("mock state poisoned").clone()
    }

    /// Group titles passed to `write_article`, in call order.
    pub fn write_calls(&self) -> Vec<String> {
        self.write_calls
            .lock()
            .expect("mock state poisoned")
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }

    /// Serialized enriched content passed to each `write_article` call.
    pub fn write_payloads(&self) -> Vec<String> {
        self.write_calls
            .lock()
            .expect("mock state poisoned")
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn select_groups(&self, items: &[RawItem], focus: &str) -> Result<Vec<Group>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.select_calls
            .lock()
            .expect("mock state poisoned")
            .push(items.iter().map(|item| item.id.clone()).collect());

        let queued = self.selections.lock().expect("mock state poisoned").pop_front();
        match queued {
            Some(result) => result,
            None => {
                let label = if focus.is_empty() { "General" } else { focus };
                Ok(vec![Group {
                    title: format!("{} highlights", label),
                    related_post_ids: items.iter().map(|item| item.id.clone()).collect(),
                }])
            }
        }
    }

    async fn write_article(
        &self,
        _focus: &str,
        group_title: &str,
        enriched_content: &str,
    ) -> Result<GeneratedArticle> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.write_calls
            .lock()
            .expect("mock state poisoned")
            .push((group_title.to_string(), enriched_content.to_string()));

        let queued = self.articles.lock().expect("mock state poisoned").pop_front();
        match queued {
            Some(result) => result,
            None => Ok(GeneratedArticle {
                title: group_title.to_string(),
                summary: format!("Overview of discussions about {}", group_title),
                sources: Vec::new(),
                key_points: vec![KeyPoint {
                    point: format!("Community interest in {}", group_title),
                    sentiment: Sentiment::Neutral,
                    subreddits: Vec::new(),
                }],
                relevant_links: None,
                overall_sentiment: Some(Sentiment::Neutral),
            }),
        }
    }
}
