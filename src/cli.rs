use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::database::{Database, DatabaseError};
use crate::images::{self, ImageError};
use crate::llm::{InferenceSession, LlamaServerRuntime, LlmError, ModelRuntime, is_model_installed};
use crate::models::{Accelerator, JournalEntry};
use crate::orchestrator::{SaveError, SaveOrchestrator, SaveRequest, check_entry_text};
use crate::paging::DatePager;
use crate::store::{JournalStore, ProfileStore};
use crate::utils::{self, parse_date};

#[derive(Parser)]
#[command(name = "mj")]
#[command(about = "Mood journal - daily entries with local AI mood reports")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    /// Print debug logs
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write the entry for a day and generate its AI report
    Write {
        /// Journal text
        text: String,
        /// Day of the entry (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Image to attach to the entry
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Show the entry for a day
    Show {
        /// Day to show (YYYY-MM-DD)
        #[arg(long, conflicts_with = "offset")]
        date: Option<String>,
        /// Days relative to today, e.g. -1 for yesterday
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i64>,
    },
    /// List entries, newest first
    List {
        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },
    /// Delete the entry for a day
    Delete {
        /// Day to delete (YYYY-MM-DD), defaults to today
        #[arg(long)]
        date: Option<String>,
    },
    /// Show or edit the user profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Inspect or tune the local model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Print the stored profile
    Show,
    /// Update profile fields
    Set {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        /// Date of birth
        #[arg(long)]
        dob: Option<String>,
        /// Mark onboarding as completed
        #[arg(long)]
        complete: bool,
    },
}

#[derive(Subcommand)]
pub enum ModelAction {
    /// Check model installation and runtime health
    Status,
    /// Change sampling options
    Configure {
        #[arg(long)]
        top_k: Option<u32>,
        #[arg(long)]
        top_p: Option<f32>,
        #[arg(long)]
        temperature: Option<f32>,
        /// cpu or gpu
        #[arg(long)]
        accelerator: Option<Accelerator>,
        #[arg(long)]
        max_tokens: Option<u32>,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    SaveError(#[from] SaveError),
    #[error("AI model error: {0}")]
    LlmError(#[from] LlmError),
    #[error("Image error: {0}")]
    ImageError(#[from] ImageError),
    #[error("Failed to parse date: {0}")]
    DateParseError(String),
    #[error("AI model is not installed. Expected model file at {0}")]
    ModelNotInstalled(String),
    #[error("No journal entry for {0}")]
    NotFound(String),
}

fn resolve_date(date: Option<&str>) -> Result<chrono::NaiveDate, CliError> {
    match date {
        Some(date_str) => parse_date(date_str)
            .map_err(|e| CliError::DateParseError(format!("Invalid date format '{}': {}", date_str, e))),
        None => Ok(utils::today()),
    }
}

fn find_entry_for_date(db: &Database, date: chrono::NaiveDate) -> Result<Option<JournalEntry>, CliError> {
    let (start, next_start) = utils::day_bounds(date);
    Ok(db.get_journal_for_day(start, next_start)?)
}

/// Handle the write command
pub fn handle_write(
    text: String,
    date: Option<String>,
    image: Option<PathBuf>,
    config: &Config,
    db: &Database,
) -> Result<(), CliError> {
    let date = resolve_date(date.as_deref())?;
    check_entry_text(&text, config.min_entry_length)?;

    let model_path = config.llm.get_model_path();
    if !is_model_installed(&model_path) {
        return Err(CliError::ModelNotInstalled(model_path.display().to_string()));
    }

    let mut session = InferenceSession::new(LlamaServerRuntime::new()?);
    session.init(config.llm.clone())?;

    let mut orchestrator = SaveOrchestrator::new(&mut session, db, config.min_entry_length);
    orchestrator.load_profile(db)?;
    if orchestrator.profile().is_some_and(|p| !p.onboarding_completed) {
        println!("Tip: run `mj profile set --name ... --complete` for more personal reports.");
    }

    // A new image is copied into app storage; otherwise keep the day's existing one
    let (image_path, imported) = match image {
        Some(source) => {
            let copy = images::import_image(&source, &config.get_image_dir())?;
            (Some(copy.clone()), Some(copy))
        }
        None => (
            find_entry_for_date(db, date)?
                .and_then(|e| e.image_path)
                .map(PathBuf::from),
            None,
        ),
    };

    println!("Analysing your entry...");
    let outcome = match orchestrator.save(SaveRequest {
        date,
        text,
        image_path,
    }) {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(copy) = imported {
                images::discard_image(&copy);
            }
            return Err(e.into());
        }
    };

    let pager = DatePager::new(utils::today());
    print_entry(&outcome.entry, &pager);
    if let Some(err) = outcome.report_error {
        println!();
        println!("Entry saved, but no report was generated: {}", err);
    }
    Ok(())
}

/// Handle the show command
pub fn handle_show(date: Option<String>, offset: Option<i64>, db: &Database) -> Result<(), CliError> {
    let mut pager = DatePager::new(utils::today());
    match (date, offset) {
        (Some(date_str), _) => pager.go_to(resolve_date(Some(&date_str))?),
        (None, Some(offset)) => {
            pager
                .step(offset)
                .ok_or_else(|| CliError::DateParseError(format!("Offset {} days is out of range", offset)))?;
        }
        (None, None) => {}
    }

    let date = pager.current();
    match find_entry_for_date(db, date)? {
        Some(entry) => {
            print_entry(&entry, &pager);
            Ok(())
        }
        None => Err(CliError::NotFound(pager.label(date))),
    }
}

/// Handle the list command
pub fn handle_list(from: Option<String>, to: Option<String>, db: &Database) -> Result<(), CliError> {
    let pager = DatePager::new(utils::today());
    let (default_from, default_to) = pager.fetch_range();
    let from = match from {
        Some(d) => resolve_date(Some(&d))?,
        None => default_from,
    };
    let to = match to {
        Some(d) => resolve_date(Some(&d))?,
        None => default_to,
    };

    let start = utils::day_start_millis(from);
    let (_, after_end) = utils::day_bounds(to);
    let entries = db.get_journals_in_range(start, after_end - 1)?;

    if entries.is_empty() {
        println!("No journal entries between {} and {}", from, to);
        return Ok(());
    }
    for entry in entries {
        let label = utils::date_for_timestamp(entry.timestamp)
            .map(|d| pager.label(d))
            .unwrap_or_else(|| entry.timestamp.to_string());
        let glyph = entry
            .ai_report
            .as_ref()
            .and_then(|r| r.emoji_category())
            .map(|c| c.glyph())
            .unwrap_or(" ");
        let headline = match &entry.ai_report {
            Some(report) => report.journal_title.clone(),
            None => preview(&entry.journal_text, 50),
        };
        println!("{}  {}  {}", glyph, label, headline);
    }
    Ok(())
}

/// Handle the delete command
pub fn handle_delete(date: Option<String>, db: &Database) -> Result<(), CliError> {
    let date = resolve_date(date.as_deref())?;
    let pager = DatePager::new(utils::today());
    let entry = find_entry_for_date(db, date)?.ok_or_else(|| CliError::NotFound(pager.label(date)))?;
    if let Some(id) = entry.id {
        db.delete_journal(id)?;
    }
    println!("Deleted journal entry for {}", pager.label(date));
    Ok(())
}

/// Handle the profile subcommands
pub fn handle_profile(action: ProfileAction, db: &Database) -> Result<(), CliError> {
    match action {
        ProfileAction::Show => {}
        ProfileAction::Set {
            name,
            gender,
            dob,
            complete,
        } => {
            if let Some(name) = name {
                db.save_user_name(&name)?;
            }
            if let Some(gender) = gender {
                db.save_user_gender(&gender)?;
            }
            if let Some(dob) = dob {
                db.save_user_dob(&dob)?;
            }
            if complete {
                db.complete_onboarding()?;
            }
            println!("Profile updated");
        }
    }

    let profile = db.load_profile()?;
    println!("Name:          {}", or_unset(&profile.name));
    println!("Gender:        {}", or_unset(&profile.gender));
    println!("Date of birth: {}", or_unset(&profile.date_of_birth));
    println!("Onboarded:     {}", if profile.onboarding_completed { "yes" } else { "no" });
    Ok(())
}

/// Handle the model subcommands
pub fn handle_model(action: ModelAction, config: &mut Config, config_path: &Path) -> Result<(), CliError> {
    match action {
        ModelAction::Status => {
            let model_path = config.llm.get_model_path();
            if is_model_installed(&model_path) {
                println!("Model installed: {}", model_path.display());
            } else {
                println!("Model NOT installed (expected at {})", model_path.display());
            }

            let mut runtime = LlamaServerRuntime::new()?;
            match runtime.initialize(&config.llm) {
                Ok(()) => println!("Runtime reachable at {}", config.llm.server_url),
                Err(e) => println!("Runtime unavailable: {}", e),
            }
            runtime.dispose();
        }
        ModelAction::Configure {
            top_k,
            top_p,
            temperature,
            accelerator,
            max_tokens,
        } => {
            let mut llm = config.llm.clone();
            if let Some(top_k) = top_k {
                llm.top_k = top_k;
            }
            if let Some(top_p) = top_p {
                llm.top_p = top_p;
            }
            if let Some(temperature) = temperature {
                llm.temperature = temperature;
            }
            if let Some(accelerator) = accelerator {
                llm.accelerator = accelerator;
            }
            if let Some(max_tokens) = max_tokens {
                llm.max_tokens = max_tokens;
            }
            llm.validate()?;
            config.llm = llm;
            config.save_to(config_path)?;
            println!("Model configuration saved to {}", config_path.display());
        }
    }

    let llm = &config.llm;
    println!(
        "top_k={} top_p={} temperature={} max_tokens={} max_images={} accelerator={}",
        llm.top_k, llm.top_p, llm.temperature, llm.max_tokens, llm.max_images, llm.accelerator
    );
    Ok(())
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() { "(not set)" } else { value }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head.trim_end())
    } else {
        head
    }
}

fn print_entry(entry: &JournalEntry, pager: &DatePager) {
    let label = utils::date_for_timestamp(entry.timestamp)
        .map(|d| pager.label(d))
        .unwrap_or_else(|| entry.timestamp.to_string());
    println!("{}", label);
    println!("{}", "-".repeat(label.chars().count()));
    println!("{}", entry.journal_text);
    if let Some(image) = &entry.image_path {
        println!("[image: {}]", image);
    }

    if let Some(report) = &entry.ai_report {
        println!();
        let glyph = report.emoji_category().map(|c| c.glyph()).unwrap_or("");
        println!("{} {}", glyph, report.journal_title);
        println!("{}", report.journal_summary);
        if !report.mood.is_empty() {
            println!("Mood:    {}", report.mood.join(", "));
        }
        println!("Emotion: {}", report.emotion);
        for highlight in &report.journal_highlights {
            println!("  * {}", highlight);
        }
    }

    if let Some(metrics) = &entry.perf_metrics {
        println!();
        println!(
            "[{}] first token {:.2}s, prefill {:.1} tok/s, decode {:.1} tok/s, total {:.2}s",
            metrics.accelerator,
            metrics.time_to_first_token_secs,
            metrics.prefill_speed,
            metrics.decode_speed,
            metrics.latency_secs
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_resolve_date_rejects_bad_input() {
        assert!(matches!(resolve_date(Some("yesterday")), Err(CliError::DateParseError(_))));
        assert_eq!(resolve_date(None).unwrap(), utils::today());
    }

    #[test]
    fn test_delete_missing_entry_reports_not_found() {
        let db = Database::open_in_memory().unwrap();
        let result = handle_delete(Some("2024-01-01".to_string()), &db);
        assert!(matches!(result, Err(CliError::NotFound(_))));
    }

    #[test]
    fn test_delete_removes_day_entry() {
        let db = Database::open_in_memory().unwrap();
        let date = parse_date("2024-01-01").unwrap();
        db.upsert_journal(&JournalEntry::new(utils::day_start_millis(date), "x".to_string()))
            .unwrap();
        handle_delete(Some("2024-01-01".to_string()), &db).unwrap();
        assert!(db.get_all_journals().unwrap().is_empty());
    }

    #[test]
    fn test_write_requires_installed_model() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let mut config = Config::default();
        config.llm.model_path = dir.path().join("missing.gguf").to_string_lossy().to_string();

        let result = handle_write("some text".to_string(), None, None, &config, &db);
        assert!(matches!(result, Err(CliError::ModelNotInstalled(_))));
    }

    fn offline_config(dir: &Path) -> Config {
        let model = dir.join("model.gguf");
        std::fs::write(&model, b"weights").unwrap();
        let mut config = Config::default();
        config.llm.model_path = model.to_string_lossy().to_string();
        config.llm.server_url = "http://127.0.0.1:9".to_string();
        config.image_dir = dir.join("images").to_string_lossy().to_string();
        config
    }

    fn image_count(config: &Config) -> usize {
        std::fs::read_dir(config.get_image_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_write_rejects_short_text_before_touching_image_or_model() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let config = offline_config(dir.path());
        let photo = dir.path().join("photo.jpg");
        std::fs::write(&photo, b"pixels").unwrap();

        let result = handle_write("too short".to_string(), None, Some(photo), &config, &db);
        assert!(matches!(
            result,
            Err(CliError::SaveError(SaveError::TooShort { len: 9, min: 40 }))
        ));
        assert_eq!(image_count(&config), 0);
        assert!(db.get_all_journals().unwrap().is_empty());
    }

    #[test]
    fn test_write_with_unreachable_model_leaves_no_image_copy() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let config = offline_config(dir.path());
        let photo = dir.path().join("photo.jpg");
        std::fs::write(&photo, b"pixels").unwrap();

        let text = "A long enough entry about a quiet walk by the river today.".to_string();
        let result = handle_write(text, None, Some(photo), &config, &db);
        assert!(matches!(result, Err(CliError::LlmError(_))));
        assert_eq!(image_count(&config), 0);
        assert!(db.get_all_journals().unwrap().is_empty());
    }

    #[test]
    fn test_show_out_of_range_offset_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let result = handle_show(None, Some(1_000_000_000), &db);
        assert!(matches!(result, Err(CliError::DateParseError(_))));
    }

    #[test]
    fn test_configure_persists_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        handle_model(
            ModelAction::Configure {
                top_k: Some(8),
                top_p: None,
                temperature: Some(0.2),
                accelerator: Some(Accelerator::Gpu),
                max_tokens: None,
            },
            &mut config,
            &path,
        )
        .unwrap();

        let saved = Config::load_from(&path, utils::Profile::Prod).unwrap();
        assert_eq!(saved.llm.top_k, 8);
        assert_eq!(saved.llm.accelerator, Accelerator::Gpu);
    }

    #[test]
    fn test_configure_rejects_invalid_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        let result = handle_model(
            ModelAction::Configure {
                top_k: Some(0),
                top_p: None,
                temperature: None,
                accelerator: None,
                max_tokens: None,
            },
            &mut config,
            &path,
        );
        assert!(matches!(result, Err(CliError::ConfigError(_))));
        assert!(!path.exists());
        assert_eq!(config.llm.top_k, 64);
    }
}
