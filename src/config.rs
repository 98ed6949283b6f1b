use crate::types::{PipelineError, Result, RunnerConfig};
use std::env;
use std::str::FromStr;
use url::Url;

/// Service configuration, read once at startup from the environment. Missing
/// or malformed values fail startup instead of surfacing mid-run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub supabase_url: String,
    pub supabase_key: String,
    pub reddit_client_id: String,
    pub reddit_client_secret: String,
    pub reddit_user_agent: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub port: u16,
    pub tick_interval_secs: u64,
    pub lead_time_minutes: i64,
    pub comment_threshold: u32,
    pub retrieval_limit: usize,
    pub max_comment_depth: usize,
    pub http_timeout_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            supabase_url: require("SUPABASE_URL")?,
            supabase_key: require("SUPABASE_ANON_KEY")?,
            reddit_client_id: require("REDDIT_CLIENT_ID")?,
            reddit_client_secret: require("REDDIT_CLIENT_SECRET")?,
            reddit_user_agent: optional("REDDIT_USER_AGENT", "oxinews-pipeline/0.1"),
            openai_api_key: require("OPENAI_API_KEY")?,
            openai_base_url: optional("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_model: optional("OPENAI_MODEL", "gpt-4o-mini"),
            port: parse_number("PORT", env::var("PORT").ok(), 5000)?,
            tick_interval_secs: parse_number(
                "TICK_INTERVAL_SECS",
                env::var("TICK_INTERVAL_SECS").ok(),
                60,
            )?,
            lead_time_minutes: parse_number(
                "LEAD_TIME_MINUTES",
                env::var("LEAD_TIME_MINUTES").ok(),
                30,
            )?,
            comment_threshold: parse_number(
                "COMMENT_THRESHOLD",
                env::var("COMMENT_THRESHOLD").ok(),
                5,
            )?,
            retrieval_limit: parse_number("RETRIEVAL_LIMIT", env::var("RETRIEVAL_LIMIT").ok(), 25)?,
            max_comment_depth: parse_number(
                "MAX_COMMENT_DEPTH",
                env::var("MAX_COMMENT_DEPTH").ok(),
                5,
            )?,
            http_timeout_secs: parse_number(
                "HTTP_TIMEOUT_SECS",
                env::var("HTTP_TIMEOUT_SECS").ok(),
                30,
            )?,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Invariant checks over the final field values. Anything that mutates a
    /// field after `from_env` (CLI overrides) must call this again.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.supabase_url).map_err(|e| {
            PipelineError::Config(format!("SUPABASE_URL is not a valid URL: {}", e))
        })?;
        Url::parse(&self.openai_base_url).map_err(|e| {
            PipelineError::Config(format!("OPENAI_BASE_URL is not a valid URL: {}", e))
        })?;
        if self.tick_interval_secs == 0 {
            return Err(PipelineError::Config(
                "TICK_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.lead_time_minutes < 0 {
            return Err(PipelineError::Config(
                "LEAD_TIME_MINUTES must not be negative".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "HTTP_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            comment_threshold: self.comment_threshold,
            retrieval_limit: self.retrieval_limit,
            max_comment_depth: self.max_comment_depth,
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs)
    }

    pub fn lead_time(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lead_time_minutes)
    }
}

fn require(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PipelineError::Config(format!(
            "required environment variable {} is not set",
            name
        ))),
    }
}

fn optional(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_number<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
{
    match raw {
        Some(value) => value.trim().parse::<T>().map_err(|_| {
            PipelineError::Config(format!("{} is not a valid number: {}", name, value))
        }),
        None => Ok(default),
    }
}
