use crate::agent::Agent;
use crate::clock::Clock;
use crate::ledger::DeliveryLedger;
use crate::reddit::ContentSource;
use crate::store::Store;
use crate::types::{
    EnrichedGroup, EnrichedMember, GeneratedArticle, Group, PipelineConfig, PipelineError,
    PipelineRunResult, RawItem, Result, RunnerConfig,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Executes the retrieve, select, enrich, generate and persist sequence for
/// one pipeline. At most one run per pipeline id is in flight at a time;
/// different pipelines run freely in parallel.
pub struct PipelineRunner {
    source: Arc<dyn ContentSource>,
    agent: Arc<dyn Agent>,
    store: Arc<dyn Store>,
    ledger: DeliveryLedger,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl PipelineRunner {
    pub fn new(
        source: Arc<dyn ContentSource>,
        agent: Arc<dyn Agent>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: RunnerConfig,
    ) -> Self {
        let ledger = DeliveryLedger::new(store.clone());
        Self {
            source,
            agent,
            store,
            ledger,
            clock,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Load a config by id and run it now, regardless of schedule. With
    /// `delivery_count` set, only a pipeline at exactly that count matches;
    /// anything else is `NotFound`.
    pub async fn run_by_id(
        &self,
        pipeline_id: &str,
        delivery_count: Option<i64>,
    ) -> Result<PipelineRunResult> {
        let config = self
            .store
            .get_pipeline_config(pipeline_id, delivery_count)
            .await?
            .ok_or_else(|| PipelineError::NotFound(pipeline_id.to_string()))?;
        self.execute(&config).await
    }

    /// Run one pipeline to completion. Stage failures come back inside the
    /// `PipelineRunResult`; an `Err` means the run was rejected before it
    /// started (already in flight).
    pub async fn execute(&self, config: &PipelineConfig) -> Result<PipelineRunResult> {
        if !self.try_begin(&config.pipeline_id).await {
            return Err(PipelineError::AlreadyRunning(config.pipeline_id.clone()));
        }

        let outcome = self.run_stages(config).await;
        self.finish(&config.pipeline_id).await;

        match outcome {
            Ok(articles) => Ok(PipelineRunResult::ok(&config.pipeline_id, articles)),
            Err(e) => {
                error!("Pipeline {} run failed: {}", config.pipeline_id, e);
                Ok(PipelineRunResult::failed(&config.pipeline_id, &e))
            }
        }
    }

    async fn try_begin(&self, pipeline_id: &str) -> bool {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.insert(pipeline_id.to_string())
    }

    async fn finish(&self, pipeline_id: &str) {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.remove(pipeline_id);
    }

    async fn run_stages(&self, config: &PipelineConfig) -> Result<Vec<GeneratedArticle>> {
        let run_id = Uuid::new_v4();
        info!(
            "Starting run {} for pipeline {} ({})",
            run_id, config.pipeline_id, config.pipeline_name
        );

        let items = self.retrieve(config).await?;
        info!(
            "Retrieved {} item(s) for pipeline {}",
            items.len(),
            config.pipeline_id
        );

        let groups = self.select(config, &items).await?;
        info!(
            "Selected {} group(s) for pipeline {}",
            groups.len(),
            config.pipeline_id
        );

        let enriched = self.enrich(&groups, &items).await?;
        info!(
            "Enriched {} group(s) for pipeline {}",
            enriched.len(),
            config.pipeline_id
        );

        let articles = self.generate(config, &enriched).await?;
        info!(
            "Generated {} article(s) for pipeline {}",
            articles.len(),
            config.pipeline_id
        );

        self.persist(config, &articles).await?;

        info!(
            "Run {} for pipeline {} completed successfully",
            run_id, config.pipeline_id
        );
        Ok(articles)
    }

    /// Stage 1: fetch top items from every configured source over the
    /// schedule's window, keeping items at or above the engagement threshold.
    /// A single source failing is logged and skipped; all sources empty fails
    /// the run.
    async fn retrieve(&self, config: &PipelineConfig) -> Result<Vec<RawItem>> {
        let sources = normalize_sources(&config.subreddits);
        if sources.is_empty() {
            return Err(PipelineError::Config(format!(
                "pipeline {} has no valid sources",
                config.pipeline_id
            )));
        }

        let window = config.schedule.time_window();
        let mut items = Vec::new();

        for source in &sources {
            match self
                .source
                .fetch_top(source, window, self.config.retrieval_limit)
                .await
            {
                Ok(fetched) => {
                    let fetched_count = fetched.len();
                    let mut kept: Vec<RawItem> = fetched
                        .into_iter()
                        .filter(|item| item.num_comments >= self.config.comment_threshold)
                        .collect();
                    debug!(
                        "Source {}: {} fetched, {} above the comment threshold",
                        source,
                        fetched_count,
                        kept.len()
                    );
                    items.append(&mut kept);
                }
                Err(e) => {
                    warn!("Failed to retrieve from source {}: {}", source, e);
                }
            }
        }

        if items.is_empty() {
            return Err(PipelineError::Empty("no posts retrieved".to_string()));
        }
        Ok(items)
    }

    /// Stage 2: ask the agent to cluster items around the focus. Duplicate
    /// ids within a group are dropped, keeping first-occurrence order.
    async fn select(&self, config: &PipelineConfig, items: &[RawItem]) -> Result<Vec<Group>> {
        let groups = self.agent.select_groups(items, &config.focus).await?;

        let mut deduped = Vec::with_capacity(groups.len());
        for group in groups {
            let mut seen = HashSet::new();
            let related_post_ids: Vec<String> = group
                .related_post_ids
                .into_iter()
                .filter(|id| seen.insert(id.clone()))
                .collect();
            deduped.push(Group {
                title: group.title,
                related_post_ids,
            });
        }

        if deduped.is_empty() {
            return Err(PipelineError::Empty("no posts selected".to_string()));
        }
        Ok(deduped)
    }

    /// Stage 3: resolve each group member back to its retrieved item and
    /// attach discussion context. Unresolvable members are dropped, a failed
    /// discussion fetch degrades to an empty discussion, and groups left with
    /// no members are dropped entirely.
    async fn enrich(&self, groups: &[Group], items: &[RawItem]) -> Result<Vec<EnrichedGroup>> {
        let mut enriched = Vec::new();

        for group in groups {
            let mut members = Vec::new();

            for member_id in &group.related_post_ids {
                let item = match resolve_item(member_id, items) {
                    Some(item) => item,
                    None => {
                        warn!(
                            "Group '{}' references unknown item {}, dropping it",
                            group.title, member_id
                        );
                        continue;
                    }
                };

                let member = match self
                    .source
                    .fetch_discussion(&item.source, &item.id, self.config.max_comment_depth)
                    .await
                {
                    Ok(discussion) => EnrichedMember {
                        item: item.clone(),
                        discussion: discussion.text,
                        permalink: discussion.permalink,
                    },
                    Err(e) => {
                        warn!("Failed to fetch discussion for {}: {}", item.id, e);
                        EnrichedMember {
                            item: item.clone(),
                            discussion: String::new(),
                            permalink: fallback_permalink(item),
                        }
                    }
                };
                members.push(member);
            }

            if members.is_empty() {
                warn!("Dropping group '{}': no resolvable members", group.title);
                continue;
            }
            enriched.push(EnrichedGroup {
                title: group.title.clone(),
                members,
            });
        }

        if enriched.is_empty() {
            return Err(PipelineError::Empty("no comments retrieved".to_string()));
        }
        Ok(enriched)
    }

    /// Stage 4: one article per enriched group. A group whose generation
    /// fails is logged and skipped; all groups failing fails the run.
    async fn generate(
        &self,
        config: &PipelineConfig,
        groups: &[EnrichedGroup],
    ) -> Result<Vec<GeneratedArticle>> {
        let mut articles = Vec::new();

        for group in groups {
            let payload = serde_json::to_string(&group.members)?;
            match self
                .agent
                .write_article(&config.focus, &group.title, &payload)
                .await
            {
                Ok(article) => articles.push(article),
                Err(e) => {
                    warn!(
                        "Failed to generate an article for group '{}': {}",
                        group.title, e
                    );
                }
            }
        }

        if articles.is_empty() {
            return Err(PipelineError::Empty("no content generated".to_string()));
        }
        Ok(articles)
    }

    /// Stage 5: save the issue under the first article's title, then record
    /// the delivery. The ledger is only touched after the save succeeds, so a
    /// failed run leaves it unchanged.
    async fn persist(&self, config: &PipelineConfig, articles: &[GeneratedArticle]) -> Result<()> {
        let issue_title = articles
            .first()
            .map(|article| article.title.clone())
            .ok_or_else(|| PipelineError::Empty("no content generated".to_string()))?;

        self.store
            .save_generated_content(config, &issue_title, articles)
            .await?;

        self.ledger
            .record_success(
                &config.pipeline_id,
                config.delivery_count + 1,
                self.clock.now(),
            )
            .await?;
        Ok(())
    }
}

/// Split comma-separated source entries, trim whitespace, strip a leading
/// `r/`, drop empties.
pub fn normalize_sources(raw: &[String]) -> Vec<String> {
    let mut sources = Vec::new();
    for entry in raw {
        for part in entry.split(',') {
            let cleaned = part.trim().trim_start_matches("r/");
            if !cleaned.is_empty() {
                sources.push(cleaned.to_string());
            }
        }
    }
    sources
}

/// Resolve a selection id back to a retrieved item: exact match first, then
/// equality with the `t3_` listing prefix stripped from both sides.
fn resolve_item<'a>(member_id: &str, items: &'a [RawItem]) -> Option<&'a RawItem> {
    if let Some(item) = items.iter().find(|item| item.id == member_id) {
        return Some(item);
    }
    let bare = member_id.strip_prefix("t3_").unwrap_or(member_id);
    items
        .iter()
        .find(|item| item.id.strip_prefix("t3_").unwrap_or(&item.id) == bare)
}

fn fallback_permalink(item: &RawItem) -> String {
    if item.permalink.is_empty() {
        let bare = item.id.strip_prefix("t3_").unwrap_or(&item.id);
        format!("https://www.reddit.com/r/{}/comments/{}", item.source, bare)
    } else {
        format!("https://www.reddit.com{}", item.permalink)
    }
}
