//! Region clock: wall clock, or a fixed application date with live time of day.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

use crate::{CicsError, CicsResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionClock {
    application_date: Option<NaiveDate>,
}

impl RegionClock {
    /// Wall clock.
    pub fn system() -> Self {
        Self::default()
    }

    /// Fixed application date.
    pub fn with_date(date: NaiveDate) -> Self {
        Self {
            application_date: Some(date),
        }
    }

    /// Build from the configured `YYYY-MM-DD` date, if any.
    pub fn from_setting(date: Option<&str>) -> CicsResult<Self> {
        match date {
            None => Ok(Self::system()),
            Some(text) => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .map(Self::with_date)
                .map_err(|e| CicsError::Config(format!("application_date '{text}': {e}"))),
        }
    }

    pub fn application_date(&self) -> Option<NaiveDate> {
        self.application_date
    }

    /// Current timestamp.
    pub fn now(&self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        match self.application_date {
            Some(date) => date.and_time(now.time()),
            None => now,
        }
    }
}

/// EIBDATE: `0CYYDDD`, C = 0 for 19xx, 1 for 20xx.
pub fn eib_date(at: NaiveDateTime) -> u32 {
    let year = at.year();
    let century = u32::from(year >= 2000);
    let yy = u32::try_from(year.rem_euclid(100)).unwrap_or(0);
    century * 100_000 + yy * 1000 + at.ordinal()
}

/// EIBTIME: `HHMMSS`.
pub fn eib_time(at: NaiveDateTime) -> u32 {
    at.hour() * 10_000 + at.minute() * 100 + at.second()
}
