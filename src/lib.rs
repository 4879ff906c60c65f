pub mod cli;
pub mod config;
pub mod database;
pub mod images;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod paging;
pub mod store;
pub mod utils;

pub use config::{Config, LlmConfig};
pub use database::Database;
pub use models::{Accelerator, AiReport, JournalEntry, PerfMetrics, UserProfile};
pub use orchestrator::{SaveOrchestrator, SaveOutcome, SaveRequest, SaveState};
pub use store::{JournalStore, ProfileStore};
pub use utils::Profile;
