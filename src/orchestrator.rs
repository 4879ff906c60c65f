//! Runs the prompt -> inference -> parse -> persist pipeline for one entry.

use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

use crate::database::DatabaseError;
use crate::images::{self, ImageError};
use crate::llm::aggregator::{AggregatorError, StreamAggregator, prefill_token_estimate};
use crate::llm::{InferenceSession, LlmError, ModelRuntime, build_prompt, parse_report};
use crate::models::{JournalEntry, UserProfile};
use crate::store::{JournalStore, ProfileStore};
use crate::utils;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("A save is already in progress")]
    AlreadySaving,
    #[error("Journal entry is empty")]
    EmptyText,
    #[error("Journal entry is too short ({len} characters, at least {min} required)")]
    TooShort { len: usize, min: usize },
    #[error("User profile has not been loaded")]
    ProfileNotLoaded,
    #[error("AI model is not ready")]
    ModelNotReady,
    #[error("Inference failed: {0}")]
    Inference(#[from] LlmError),
    #[error("Image error: {0}")]
    Image(#[from] ImageError),
    #[error("Failed to save journal entry: {0}")]
    Persistence(#[from] DatabaseError),
}

impl From<AggregatorError> for SaveError {
    fn from(e: AggregatorError) -> Self {
        match e {
            AggregatorError::NotDone => SaveError::Inference(LlmError::StreamEnded),
            AggregatorError::AlreadyDone => SaveError::Inference(LlmError::Api(e.to_string())),
        }
    }
}

/// What one save attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub entry: JournalEntry,
    /// Set when the model output could not be turned into a report; the entry
    /// was saved with its text only.
    pub report_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveState {
    Idle,
    Saving,
    Saved(SaveOutcome),
    Failed(String),
}

/// Input for one save.
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub date: NaiveDate,
    pub text: String,
    pub image_path: Option<PathBuf>,
}

/// Trimmed entry text, or why it is too little to analyse.
pub fn check_entry_text(text: &str, min_entry_length: usize) -> Result<&str, SaveError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SaveError::EmptyText);
    }
    let len = text.chars().count();
    if len < min_entry_length {
        return Err(SaveError::TooShort {
            len,
            min: min_entry_length,
        });
    }
    Ok(text)
}

pub struct SaveOrchestrator<'a, R: ModelRuntime, S: JournalStore> {
    session: &'a mut InferenceSession<R>,
    store: &'a S,
    min_entry_length: usize,
    profile: Option<UserProfile>,
    state: SaveState,
}

impl<'a, R: ModelRuntime, S: JournalStore> SaveOrchestrator<'a, R, S> {
    pub fn new(session: &'a mut InferenceSession<R>, store: &'a S, min_entry_length: usize) -> Self {
        Self {
            session,
            store,
            min_entry_length,
            profile: None,
            state: SaveState::Idle,
        }
    }

    pub fn state(&self) -> &SaveState {
        &self.state
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    pub fn set_profile(&mut self, profile: UserProfile) {
        self.profile = Some(profile);
    }

    /// Load the profile from `profiles`; saves are refused until this succeeds.
    pub fn load_profile(&mut self, profiles: &impl ProfileStore) -> Result<(), SaveError> {
        self.profile = Some(profiles.load_profile()?);
        Ok(())
    }

    /// Return to `Idle` after a terminal state has been shown.
    pub fn reset(&mut self) {
        if self.state != SaveState::Saving {
            self.state = SaveState::Idle;
        }
    }

    /// Generate a report for `request.text` and store the entry for `request.date`.
    /// Precondition failures leave the state untouched.
    pub fn save(&mut self, request: SaveRequest) -> Result<SaveOutcome, SaveError> {
        if self.state == SaveState::Saving {
            return Err(SaveError::AlreadySaving);
        }
        let text = check_entry_text(&request.text, self.min_entry_length)?;
        let profile = self.profile.clone().ok_or(SaveError::ProfileNotLoaded)?;
        if !self.session.is_ready() {
            return Err(SaveError::ModelNotReady);
        }

        self.state = SaveState::Saving;
        tracing::info!("Saving journal entry for {}", request.date);

        let result = self.run_pipeline(&profile, text, &request);
        match &result {
            Ok(outcome) => self.state = SaveState::Saved(outcome.clone()),
            Err(e) => {
                tracing::error!("Error saving journal entry: {}", e);
                self.state = SaveState::Failed(e.to_string());
            }
        }
        result
    }

    fn run_pipeline(
        &mut self,
        profile: &UserProfile,
        text: &str,
        request: &SaveRequest,
    ) -> Result<SaveOutcome, SaveError> {
        let images = match &request.image_path {
            Some(path) => vec![images::load_image(path)?],
            None => Vec::new(),
        };

        let prompt = build_prompt(profile, text);
        let text_tokens = self.session.token_count(&prompt)?;
        let prefill_tokens = prefill_token_estimate(text_tokens, images.len());
        let accelerator = self
            .session
            .config()
            .map(|c| c.accelerator)
            .unwrap_or_default();
        tracing::debug!("Prompt is ~{} prefill tokens", prefill_tokens);

        let start = Instant::now();
        let mut aggregator = StreamAggregator::new(start, prefill_tokens, accelerator);
        for partial in self.session.run_inference(&prompt, &images)? {
            let partial = partial?;
            aggregator.push(&partial.text, partial.done, Instant::now())?;
            if partial.done {
                break;
            }
        }
        let (output, metrics) = aggregator.finish()?;

        let report = parse_report(&output);
        let report_error = if report.is_none() {
            Some("Failed to parse AI response".to_string())
        } else {
            None
        };

        let mut entry = JournalEntry::new(utils::day_start_millis(request.date), text.to_string());
        entry.image_path = request
            .image_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string());
        entry.perf_metrics = report.as_ref().map(|_| metrics);
        entry.ai_report = report;

        let id = self.store.upsert_journal(&entry)?;
        entry.id = Some(id);

        if let Some(ref err) = report_error {
            tracing::warn!("Saved journal {} without a report: {}", id, err);
        } else {
            tracing::info!("Saved journal {} with report", id);
        }
        Ok(SaveOutcome { entry, report_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::database::Database;
    use crate::llm::session::tests::ScriptedRuntime;

    const REPORT: &str = r#"{"journalTitle":"A calm day","journalSummary":"You slowed down.","journalHighlights":["Tea"],"mood":["Calm"],"emotion":"Peaceful","emoji":"happy"}"#;
    const LONG_TEXT: &str = "Spent the afternoon reading by the window and drinking tea.";

    fn ready_session(chunks: &[&str]) -> InferenceSession<ScriptedRuntime> {
        let mut session = InferenceSession::new(ScriptedRuntime::with_chunks(chunks));
        session.init(LlmConfig::default()).unwrap();
        session
    }

    fn request(text: &str) -> SaveRequest {
        SaveRequest {
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            text: text.to_string(),
            image_path: None,
        }
    }

    fn profile() -> UserProfile {
        UserProfile {
            name: "Ada".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_text_below_threshold() {
        let db = Database::open_in_memory().unwrap();
        let mut session = ready_session(&[REPORT]);
        let mut orchestrator = SaveOrchestrator::new(&mut session, &db, 40);
        orchestrator.set_profile(profile());

        let text = "x".repeat(39);
        let result = orchestrator.save(request(&text));
        assert!(matches!(result, Err(SaveError::TooShort { len: 39, min: 40 })));
        assert_eq!(orchestrator.state(), &SaveState::Idle);

        assert!(matches!(orchestrator.save(request("   ")), Err(SaveError::EmptyText)));
        assert!(orchestrator.save(request(&"x".repeat(40))).is_ok());
    }

    #[test]
    fn test_requires_profile_and_ready_session() {
        let db = Database::open_in_memory().unwrap();
        let mut session = InferenceSession::new(ScriptedRuntime::with_chunks(&[REPORT]));
        {
            let mut orchestrator = SaveOrchestrator::new(&mut session, &db, 10);
            assert!(matches!(orchestrator.save(request(LONG_TEXT)), Err(SaveError::ProfileNotLoaded)));
            orchestrator.load_profile(&db).unwrap();
            assert!(matches!(orchestrator.save(request(LONG_TEXT)), Err(SaveError::ModelNotReady)));
        }
        assert!(db.get_all_journals().unwrap().is_empty());
    }

    #[test]
    fn test_successful_save_stores_report_and_metrics() {
        let db = Database::open_in_memory().unwrap();
        let mut session = ready_session(&["Sure! ", &REPORT[..20], &REPORT[20..], " Done."]);
        let mut orchestrator = SaveOrchestrator::new(&mut session, &db, 40);
        orchestrator.set_profile(profile());

        let outcome = orchestrator.save(request(&format!("  {}  ", LONG_TEXT))).unwrap();
        assert!(outcome.report_error.is_none());
        assert!(matches!(orchestrator.state(), SaveState::Saved(_)));

        let stored = db.get_journal(outcome.entry.id.unwrap()).unwrap().unwrap();
        assert_eq!(stored.journal_text, LONG_TEXT);
        assert_eq!(stored.ai_report.unwrap().journal_title, "A calm day");
        let metrics = stored.perf_metrics.unwrap();
        assert!(!metrics.decode_speed.is_nan());

        let prompt = &session.runtime().prompts[0];
        assert!(prompt.contains("The user's name is: Ada."));
        assert!(prompt.ends_with(LONG_TEXT));
    }

    #[test]
    fn test_unparseable_output_still_saves_text() {
        let db = Database::open_in_memory().unwrap();
        let mut session = ready_session(&["I'm not sure ", "what to say."]);
        let mut orchestrator = SaveOrchestrator::new(&mut session, &db, 10);
        orchestrator.set_profile(profile());

        let outcome = orchestrator.save(request(LONG_TEXT)).unwrap();
        assert!(outcome.report_error.is_some());
        assert!(outcome.entry.ai_report.is_none());
        assert_eq!(db.get_all_journals().unwrap().len(), 1);
    }

    #[test]
    fn test_resave_same_day_overwrites_and_keeps_id() {
        let db = Database::open_in_memory().unwrap();
        let mut session = ready_session(&[REPORT]);
        let mut orchestrator = SaveOrchestrator::new(&mut session, &db, 10);
        orchestrator.set_profile(profile());

        let first = orchestrator.save(request(LONG_TEXT)).unwrap();
        orchestrator.reset();
        let second = orchestrator.save(request("A different entry for the same day.")).unwrap();

        assert_eq!(first.entry.id, second.entry.id);
        let all = db.get_all_journals().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].journal_text, "A different entry for the same day.");
    }

    #[test]
    fn test_stream_without_done_fails_without_saving() {
        let db = Database::open_in_memory().unwrap();
        let mut session = ready_session(&[]);
        let mut orchestrator = SaveOrchestrator::new(&mut session, &db, 10);
        orchestrator.set_profile(profile());

        let result = orchestrator.save(request(LONG_TEXT));
        assert!(matches!(result, Err(SaveError::Inference(LlmError::StreamEnded))));
        assert!(matches!(orchestrator.state(), SaveState::Failed(_)));
        orchestrator.reset();
        assert_eq!(orchestrator.state(), &SaveState::Idle);
        assert!(db.get_all_journals().unwrap().is_empty());
    }

    #[test]
    fn test_second_save_rejected_while_saving() {
        let db = Database::open_in_memory().unwrap();
        let mut session = ready_session(&[REPORT]);
        let mut orchestrator = SaveOrchestrator::new(&mut session, &db, 10);
        orchestrator.set_profile(profile());
        orchestrator.state = SaveState::Saving;

        assert!(matches!(orchestrator.save(request(LONG_TEXT)), Err(SaveError::AlreadySaving)));
        orchestrator.reset();
        assert_eq!(orchestrator.state(), &SaveState::Saving);
    }

    #[test]
    fn test_image_is_loaded_and_passed() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("view.jpg");
        std::fs::write(&image, b"jpeg").unwrap();

        let db = Database::open_in_memory().unwrap();
        let mut session = ready_session(&[REPORT]);
        let mut orchestrator = SaveOrchestrator::new(&mut session, &db, 10);
        orchestrator.set_profile(profile());

        let mut req = request(LONG_TEXT);
        req.image_path = Some(image.clone());
        let outcome = orchestrator.save(req).unwrap();

        assert_eq!(outcome.entry.image_path, Some(image.to_string_lossy().to_string()));
        assert_eq!(session.runtime().image_counts, vec![1]);
    }
}
