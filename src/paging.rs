//! Day-per-page navigation anchored on today.

use chrono::{NaiveDate, TimeDelta};

/// Page shown for today; earlier days get smaller indexes.
pub const INITIAL_PAGE: i64 = 10_000;

/// Entries are loaded this many years either side of today.
pub const FETCH_RANGE_YEARS: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePager {
    today: NaiveDate,
    current: NaiveDate,
}

impl DatePager {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            current: today,
        }
    }

    pub fn current(&self) -> NaiveDate {
        self.current
    }

    pub fn page_index(&self) -> i64 {
        self.page_for_date(self.current)
    }

    /// `None` when the page lies outside the representable calendar.
    pub fn date_for_page(&self, page: i64) -> Option<NaiveDate> {
        offset_date(self.today, page.checked_sub(INITIAL_PAGE)?)
    }

    pub fn page_for_date(&self, date: NaiveDate) -> i64 {
        INITIAL_PAGE + (date - self.today).num_days()
    }

    /// Move `offset` days (negative goes back) and return the new date.
    /// Leaves the pager untouched and returns `None` on calendar overflow.
    pub fn step(&mut self, offset: i64) -> Option<NaiveDate> {
        self.current = offset_date(self.current, offset)?;
        Some(self.current)
    }

    pub fn go_to(&mut self, date: NaiveDate) {
        self.current = date;
    }

    /// "May 01, 2024", with " (Today)" appended for today's page
    pub fn label(&self, date: NaiveDate) -> String {
        let formatted = date.format("%b %d, %Y").to_string();
        if date == self.today {
            format!("{} (Today)", formatted)
        } else {
            formatted
        }
    }

    /// Dates bounding the default listing window
    pub fn fetch_range(&self) -> (NaiveDate, NaiveDate) {
        let start = self
            .today
            .checked_sub_months(chrono::Months::new(12 * FETCH_RANGE_YEARS as u32))
            .unwrap_or(NaiveDate::MIN);
        let end = self
            .today
            .checked_add_months(chrono::Months::new(12 * FETCH_RANGE_YEARS as u32))
            .unwrap_or(NaiveDate::MAX);
        (start, end)
    }
}

fn offset_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(TimeDelta::try_days(days)?)
}
