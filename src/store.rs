use crate::types::{GeneratedArticle, PipelineConfig, PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

/// Persistence boundary. Owns pipeline configs and generated issues; the
/// runner and scheduler only ever go through this trait.
#[async_trait]
pub trait Store: Send + Sync {
    /// One pipeline config by its slug. With `delivery_count` set, the row
    /// must also carry exactly that count to match.
    async fn get_pipeline_config(
        &self,
        pipeline_id: &str,
        delivery_count: Option<i64>,
    ) -> Result<Option<PipelineConfig>>;

    /// All active pipelines, the scheduler's candidate list.
    async fn list_due_candidates(&self) -> Result<Vec<PipelineConfig>>;

    /// Persist one generated issue under the pipeline's identity.
    async fn save_generated_content(
        &self,
        config: &PipelineConfig,
        issue_title: &str,
        articles: &[GeneratedArticle],
    ) -> Result<()>;

    /// Set delivery_count and last_delivered in a single update.
    async fn update_delivery_stats(
        &self,
        pipeline_id: &str,
        new_count: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
}

/// Store backed by Supabase's PostgREST interface. Configs live in
/// `pipeline_configs`, generated issues in `pipeline_reads`.
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        Url::parse(&config.url)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn fetch_configs(&self, params: &[(&str, String)]) -> Result<Vec<PipelineConfig>> {
        let response = self
            .authorized(self.client.get(self.rest_url("pipeline_configs")))
            .query(params)
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(format!("config query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Persistence(format!(
                "config query returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<Vec<PipelineConfig>>()
            .await
            .map_err(|e| PipelineError::Persistence(format!("unexpected config row shape: {}", e)))
    }
}

#[async_trait]
impl Store for SupabaseStore {
    async fn get_pipeline_config(
        &self,
        pipeline_id: &str,
        delivery_count: Option<i64>,
    ) -> Result<Option<PipelineConfig>> {
        let mut params = vec![
            ("pipeline_id", format!("eq.{}", pipeline_id)),
            ("limit", "1".to_string()),
        ];
        if let Some(count) = delivery_count {
            params.push(("delivery_count", format!("eq.{}", count)));
        }

        let rows = self.fetch_configs(&params).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_due_candidates(&self) -> Result<Vec<PipelineConfig>> {
        let candidates = self
            .fetch_configs(&[("is_active", "eq.true".to_string())])
            .await?;
        debug!("Loaded {} active pipeline config(s)", candidates.len());
        Ok(candidates)
    }

    async fn save_generated_content(
        &self,
        config: &PipelineConfig,
        issue_title: &str,
        articles: &[GeneratedArticle],
    ) -> Result<()> {
        let row = json!({
            "pipeline_id": config.pipeline_id,
            "pipeline_name": config.pipeline_name,
            "user_id": config.user_id,
            "title": issue_title,
            "content": articles,
        });

        let response = self
            .authorized(self.client.post(self.rest_url("pipeline_reads")))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(|e| PipelineError::Persistence(format!("failed to save content: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::Persistence(format!(
                "failed to save content (HTTP {})",
                response.status()
            )));
        }

        debug!(
            "Saved issue '{}' for pipeline {}",
            issue_title, config.pipeline_id
        );
        Ok(())
    }

    async fn update_delivery_stats(
        &self,
        pipeline_id: &str,
        new_count: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        // Preferred path: a database function that applies both fields in one
        // statement.
        let rpc_body = json!({
            "p_pipeline_id": pipeline_id,
            "p_delivery_count": new_count,
            "p_last_delivered": timestamp.to_rfc3339(),
        });

        let rpc_response = self
            .authorized(
                self.client
                    .post(self.rest_url("rpc/update_pipeline_delivery")),
            )
            .json(&rpc_body)
            .send()
            .await;

        match rpc_response {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => {
                warn!(
                    "Delivery stats RPC returned HTTP {}, falling back to direct update",
                    response.status()
                );
            }
            Err(e) => {
                warn!(
                    "Delivery stats RPC failed ({}), falling back to direct update",
                    e
                );
            }
        }

        let patch = json!({
            "delivery_count": new_count,
            "last_delivered": timestamp.to_rfc3339(),
        });

        let response = self
            .authorized(self.client.patch(self.rest_url("pipeline_configs")))
            .query(&[("pipeline_id", format!("eq.{}", pipeline_id))])
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await
            .map_err(|e| {
                PipelineError::Persistence(format!("failed to update delivery stats: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(PipelineError::Persistence(format!(
                "failed to update delivery stats (HTTP {})",
                response.status()
            )));
        }
        Ok(())
    }
}

/// One issue as recorded by the in-memory store.
#[derive(Debug, Clone)]
pub struct SavedIssue {
    pub pipeline_id: String,
    pub title: String,
    pub articles: Vec<GeneratedArticle>,
}

/// In-memory store for tests. Behaves like the real one: lookups filter,
/// updates mutate the held config, and failure switches simulate a broken
/// backend.
#[derive(Default)]
pub struct MemoryStore {
    configs: RwLock<HashMap<String, PipelineConfig>>,
    saved: RwLock<Vec<SavedIssue>>,
    fail_saves: AtomicBool,
    fail_updates: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_config(&self, config: PipelineConfig) {
        self.configs
            .write()
            .await
            .insert(config.pipeline_id.clone(), config);
    }

    pub async fn config(&self, pipeline_id: &str) -> Option<PipelineConfig> {
        self.configs.read().await.get(pipeline_id).cloned()
    }

    pub async fn saved_issues(&self) -> Vec<SavedIssue> {
        self.saved.read().await.clone()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_pipeline_config(
        &self,
        pipeline_id: &str,
        delivery_count: Option<i64>,
    ) -> Result<Option<PipelineConfig>> {
        let configs = self.configs.read().await;
        let config = configs.get(pipeline_id).cloned();
        Ok(config.filter(|c| delivery_count.map_or(true, |count| c.delivery_count == count)))
    }

    async fn list_due_candidates(&self) -> Result<Vec<PipelineConfig>> {
        let configs = self.configs.read().await;
        let mut candidates: Vec<PipelineConfig> =
            configs.values().filter(|c| c.is_active).cloned().collect();
        candidates.sort_by(|a, b| a.pipeline_id.cmp(&b.pipeline_id));
        Ok(candidates)
    }

    async fn save_generated_content(
        &self,
        config: &PipelineConfig,
        issue_title: &str,
        articles: &[GeneratedArticle],
    ) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PipelineError::Persistence(
                "failed to save content".to_string(),
            ));
        }
        self.saved.write().await.push(SavedIssue {
            pipeline_id: config.pipeline_id.clone(),
            title: issue_title.to_string(),
            articles: articles.to_vec(),
        });
        Ok(())
    }

    async fn update_delivery_stats(
        &self,
        pipeline_id: &str,
        new_count: i64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(PipelineError::Persistence(
                "failed to update delivery stats".to_string(),
            ));
        }
        let mut configs = self.configs.write().await;
        let config = configs.get_mut(pipeline_id).ok_or_else(|| {
            PipelineError::Persistence(format!("no config stored for {}", pipeline_id))
        })?;
        config.delivery_count = new_count;
        config.last_delivered = Some(timestamp);
        Ok(())
    }
}
