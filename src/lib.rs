pub mod agent;
pub mod clock;
pub mod config;
pub mod ledger;
pub mod reddit;
pub mod runner;
pub mod schedule;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod types;

pub use agent::{Agent, AgentConfig, LlmAgent, MockAgent};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Settings;
pub use ledger::DeliveryLedger;
pub use reddit::{ContentSource, RedditClient, RedditConfig, StaticSource};
pub use runner::PipelineRunner;
pub use scheduler::Scheduler;
pub use server::{build_router, AppState};
pub use store::{MemoryStore, Store, SupabaseConfig, SupabaseStore};
pub use types::*;
