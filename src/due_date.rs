//! Due-date arithmetic for default and "quick" dates.
//!
//! Every function takes the reference `now` explicitly. Nothing in here reads
//! the system clock.

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Canonical storage format of date-time attribute values.
pub const DUE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCEPTED_FORMATS: &[&str] = &[DUE_DATE_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Named calendar offsets offered as one-click due dates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum QuickDate {
    Today,
    Tomorrow,
    NextWeek,
    NextMonth,
    NextQuarter,
}

impl QuickDate {
    /// Shifts `date` by this offset. Month arithmetic clamps to the last day
    /// of the target month.
    pub fn shift(&self, date: NaiveDate) -> NaiveDate {
        let shifted = match self {
            Self::Today => Some(date),
            Self::Tomorrow => date.checked_add_days(Days::new(1)),
            Self::NextWeek => date.checked_add_days(Days::new(7)),
            Self::NextMonth => date.checked_add_months(Months::new(1)),
            Self::NextQuarter => date.checked_add_months(Months::new(3)),
        };
        shifted.unwrap_or(date)
    }
}

/// Computes default and relative due dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueDateCalculator {
    default_time: NaiveTime,
}

impl Default for DueDateCalculator {
    fn default() -> Self {
        Self {
            default_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl DueDateCalculator {
    pub fn new(default_time: NaiveTime) -> Self {
        Self { default_time }
    }

    pub fn default_time(&self) -> NaiveTime {
        self.default_time
    }

    /// Today at the default hour. Used when a node has no prior due date.
    pub fn default_due_date(&self, now: NaiveDateTime) -> NaiveDateTime {
        now.date().and_time(self.default_time)
    }

    pub fn today(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.quick(QuickDate::Today, now, None)
    }

    pub fn tomorrow(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.quick(QuickDate::Tomorrow, now, None)
    }

    pub fn next_week(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.quick(QuickDate::NextWeek, now, None)
    }

    pub fn next_month(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.quick(QuickDate::NextMonth, now, None)
    }

    pub fn next_quarter(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.quick(QuickDate::NextQuarter, now, None)
    }

    /// `now`'s date shifted by `kind`, keeping the time of day of `existing`
    /// when there is one.
    pub fn quick(
        &self,
        kind: QuickDate,
        now: NaiveDateTime,
        existing: Option<NaiveDateTime>,
    ) -> NaiveDateTime {
        self.keep_time_part(existing, kind.shift(now.date()))
    }

    /// Combines `new_date` with the time of day of `existing`, or with the
    /// default hour when there is no existing due date.
    pub fn keep_time_part(
        &self,
        existing: Option<NaiveDateTime>,
        new_date: NaiveDate,
    ) -> NaiveDateTime {
        match existing {
            Some(existing) => new_date.and_time(existing.time()),
            None => new_date.and_time(self.default_time),
        }
    }

    /// Parses a stored attribute value. A bare date gets the default hour.
    pub fn parse(&self, value: &str) -> Result<NaiveDateTime, TaskError> {
        let trimmed = value.trim();
        for format in ACCEPTED_FORMATS {
            if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Ok(parsed);
            }
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(|date| date.and_time(self.default_time))
            .map_err(|_| TaskError::InvalidAttributeValue {
                value: value.to_string(),
            })
    }
}

/// Formats a date-time the way it is stored in node attributes.
pub fn format_due_date(value: NaiveDateTime) -> String {
    value.format(DUE_DATE_FORMAT).to_string()
}

/// Time-relative grouping of a due date, recomputed on every refresh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskBucket {
    Overdue,
    Today,
    Tomorrow,
    ThisWeek,
    Later,
}

impl TaskBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::Today => "today",
            Self::Tomorrow => "tomorrow",
            Self::ThisWeek => "this_week",
            Self::Later => "later",
        }
    }

    /// Weeks start on Monday.
    pub fn classify(due: NaiveDateTime, now: NaiveDateTime) -> Self {
        let today = now.date();
        if due < now {
            return Self::Overdue;
        }
        if due.date() == today {
            return Self::Today;
        }
        if today.succ_opt() == Some(due.date()) {
            return Self::Tomorrow;
        }
        let days_left = 7 - u64::from(today.weekday().num_days_from_monday());
        match today.checked_add_days(Days::new(days_left)) {
            Some(next_monday) if due.date() < next_monday => Self::ThisWeek,
            _ => Self::Later,
        }
    }
}
