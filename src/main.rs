use clap::Parser;
use oxinews::agent::{AgentConfig, LlmAgent};
use oxinews::clock::SystemClock;
use oxinews::config::Settings;
use oxinews::reddit::{RedditClient, RedditConfig};
use oxinews::runner::PipelineRunner;
use oxinews::scheduler::Scheduler;
use oxinews::server::{self, AppState};
use oxinews::store::{SupabaseConfig, SupabaseStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "oxinews", about = "Scheduled Reddit content pipeline service")]
struct Cli {
    /// Listen port, overrides PORT
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between scheduler ticks, overrides TICK_INTERVAL_SECS
    #[arg(long)]
    tick_interval: Option<u64>,

    /// Serve the trigger surface without the background scheduler
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(tick_interval) = cli.tick_interval {
        settings.tick_interval_secs = tick_interval;
    }
    settings.validate()?;

    info!("Starting oxinews pipeline service");

    let store = Arc::new(SupabaseStore::new(SupabaseConfig {
        url: settings.supabase_url.clone(),
        api_key: settings.supabase_key.clone(),
        timeout_seconds: settings.http_timeout_secs,
    })?);

    let source = Arc::new(RedditClient::new(RedditConfig {
        client_id: settings.reddit_client_id.clone(),
        client_secret: settings.reddit_client_secret.clone(),
        user_agent: settings.reddit_user_agent.clone(),
        timeout_seconds: settings.http_timeout_secs,
        ..RedditConfig::default()
    })?);

    let agent = Arc::new(LlmAgent::new(AgentConfig {
        api_key: settings.openai_api_key.clone(),
        base_url: settings.openai_base_url.clone(),
        model: settings.openai_model.clone(),
        ..AgentConfig::default()
    })?);

    let clock = Arc::new(SystemClock);

    let runner = Arc::new(PipelineRunner::new(
        source,
        agent,
        store.clone(),
        clock.clone(),
        settings.runner_config(),
    ));

    let scheduler = Arc::new(Scheduler::new(
        store,
        runner.clone(),
        clock,
        settings.tick_interval(),
        settings.lead_time(),
    ));

    if cli.no_scheduler {
        info!("Background scheduler disabled");
    } else {
        scheduler.start().await?;
    }

    server::serve(AppState { runner, scheduler }, settings.port).await?;
    Ok(())
}
