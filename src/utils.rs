use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Profile mode for the application (dev or prod)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    /// Directory name used for this profile's config and data
    pub fn app_name(self) -> &'static str {
        match self {
            Profile::Dev => "mood-journal-dev",
            Profile::Prod => "mood-journal",
        }
    }
}

/// Get the configuration directory path
/// If profile is Dev, uses "mood-journal-dev" instead of "mood-journal"
pub fn get_config_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "mood-journal", profile.app_name())
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the data directory path (database, imported images, models)
pub fn get_data_dir(profile: Profile) -> Option<PathBuf> {
    ProjectDirs::from("com", "mood-journal", profile.app_name())
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Expand `~` in a path string to the user's home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse a date string in ISO 8601 format (YYYY-MM-DD)
pub fn parse_date(date_str: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
}

/// Today's date in the local timezone
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Epoch millis of local midnight for `date`. This is the key entries are stored under.
pub fn day_start_millis(date: NaiveDate) -> i64 {
    let midnight = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt.timestamp_millis(),
        // Midnight falls in a DST gap: the day starts at the first valid local instant.
        None => Local
            .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
            .earliest()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| midnight.and_utc().timestamp_millis()),
    }
}

/// Half-open `[start, next_start)` millis range covering `date`
pub fn day_bounds(date: NaiveDate) -> (i64, i64) {
    let next = date.succ_opt().unwrap_or(date);
    (day_start_millis(date), day_start_millis(next))
}

/// Local calendar date containing the instant `millis`
pub fn date_for_timestamp(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|utc| utc.with_timezone(&Local).date_naive())
}
