//! Persistence contracts for journal entries and the user profile.
//!
//! [`crate::Database`] implements both on SQLite; the save pipeline only
//! depends on these traits.

use std::sync::mpsc::Receiver;

use crate::database::DatabaseError;
use crate::models::{JournalEntry, UserProfile};

pub trait JournalStore {
    /// Insert or overwrite the entry for `entry.timestamp`'s day.
    /// An existing row for that day keeps its id. Returns the row id.
    fn upsert_journal(&self, entry: &JournalEntry) -> Result<i64, DatabaseError>;

    /// Overwrite the row identified by `entry.id`.
    fn update_journal(&self, entry: &JournalEntry) -> Result<(), DatabaseError>;

    fn delete_journal(&self, id: i64) -> Result<(), DatabaseError>;

    fn get_journal(&self, id: i64) -> Result<Option<JournalEntry>, DatabaseError>;

    /// Entry with the greatest timestamp
    fn get_latest_journal(&self) -> Result<Option<JournalEntry>, DatabaseError>;

    /// Entry whose timestamp lies in `[start_of_day, start_of_next_day)`
    fn get_journal_for_day(
        &self,
        start_of_day: i64,
        start_of_next_day: i64,
    ) -> Result<Option<JournalEntry>, DatabaseError>;

    /// Entries with `start <= timestamp <= end`, newest first
    fn get_journals_in_range(&self, start: i64, end: i64) -> Result<Vec<JournalEntry>, DatabaseError>;

    /// Every entry, newest first
    fn get_all_journals(&self) -> Result<Vec<JournalEntry>, DatabaseError>;
}

/// Keys of the profile preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreferenceKey {
    UserName,
    UserGender,
    UserDateOfBirth,
    OnboardingCompleted,
}

impl PreferenceKey {
    pub fn as_str(self) -> &'static str {
        match self {
            PreferenceKey::UserName => "user_name",
            PreferenceKey::UserGender => "user_sex",
            PreferenceKey::UserDateOfBirth => "user_dob",
            PreferenceKey::OnboardingCompleted => "has_completed_nux",
        }
    }
}

pub trait ProfileStore {
    fn get_preference(&self, key: PreferenceKey) -> Result<Option<String>, DatabaseError>;

    fn set_preference(&self, key: PreferenceKey, value: &str) -> Result<(), DatabaseError>;

    /// Observe one key. The receiver yields the current value first, then
    /// every later write of that key until it is dropped.
    fn watch(&self, key: PreferenceKey) -> Result<Receiver<Option<String>>, DatabaseError>;

    fn save_user_name(&self, name: &str) -> Result<(), DatabaseError> {
        self.set_preference(PreferenceKey::UserName, name)
    }

    fn save_user_gender(&self, gender: &str) -> Result<(), DatabaseError> {
        self.set_preference(PreferenceKey::UserGender, gender)
    }

    fn save_user_dob(&self, date_of_birth: &str) -> Result<(), DatabaseError> {
        self.set_preference(PreferenceKey::UserDateOfBirth, date_of_birth)
    }

    fn complete_onboarding(&self) -> Result<(), DatabaseError> {
        self.set_preference(PreferenceKey::OnboardingCompleted, "true")
    }

    fn is_onboarding_completed(&self) -> Result<bool, DatabaseError> {
        Ok(self
            .get_preference(PreferenceKey::OnboardingCompleted)?
            .is_some_and(|v| v == "true"))
    }

    /// Snapshot of all profile fields; unset fields come back empty.
    fn load_profile(&self) -> Result<UserProfile, DatabaseError> {
        Ok(UserProfile {
            name: self.get_preference(PreferenceKey::UserName)?.unwrap_or_default(),
            gender: self.get_preference(PreferenceKey::UserGender)?.unwrap_or_default(),
            date_of_birth: self
                .get_preference(PreferenceKey::UserDateOfBirth)?
                .unwrap_or_default(),
            onboarding_completed: self.is_onboarding_completed()?,
        })
    }
}
