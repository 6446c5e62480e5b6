//! Time window selection: "N months back" and the matching start date

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use thiserror::Error;

/// Bounds of the months-back selector
pub const MIN_MONTHS: u32 = 1;
pub const MAX_MONTHS: u32 = 48;

#[derive(Error, Debug, PartialEq)]
pub enum WindowError {
    #[error("window must be between 1 and 48 months, got {0}")]
    OutOfRange(u32),
    #[error("start date before {0} is not representable")]
    Overflow(NaiveDate),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub months: u32,
    pub start: DateTime<Utc>,
}

impl TimeWindow {
    pub fn ending_now(months: u32) -> Result<Self, WindowError> {
        Self::ending_on(Utc::now().date_naive(), months)
    }

    pub fn ending_on(today: NaiveDate, months: u32) -> Result<Self, WindowError> {
        if !(MIN_MONTHS..=MAX_MONTHS).contains(&months) {
            return Err(WindowError::OutOfRange(months));
        }
        Ok(Self {
            months,
            start: start_of_window(today, months)?,
        })
    }

    /// Relative range start for Flux, e.g. `-3mo`
    pub fn flux_range(&self) -> String {
        format!("-{}mo", self.months)
    }
}

/// Roll `today` back to a month start `months` times.
///
/// A date already on the 1st moves a full month on the first step, so the
/// result is always strictly before `today`.
pub fn start_of_window(today: NaiveDate, months: u32) -> Result<DateTime<Utc>, WindowError> {
    let first = today.with_day(1).ok_or(WindowError::Overflow(today))?;
    let back = if today.day() == 1 { months } else { months.saturating_sub(1) };
    let start = first
        .checked_sub_months(Months::new(back))
        .ok_or(WindowError::Overflow(today))?;
    Ok(start.and_time(chrono::NaiveTime::MIN).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn midnight(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        date(y, m, d).and_hms_opt(0, 0, 0).unwrap().and_utc()
    }

    #[test]
    fn test_mid_month() {
        assert_eq!(start_of_window(date(2026, 10, 19), 1).unwrap(), midnight(2026, 10, 1));
        assert_eq!(start_of_window(date(2026, 10, 19), 2).unwrap(), midnight(2026, 9, 1));
    }

    #[test]
    fn test_first_of_month_rolls_a_full_month() {
        assert_eq!(start_of_window(date(2026, 10, 1), 1).unwrap(), midnight(2026, 9, 1));
    }

    #[test]
    fn test_crosses_year() {
        assert_eq!(start_of_window(date(2026, 2, 14), 4).unwrap(), midnight(2025, 11, 1));
    }

    #[test]
    fn test_bounds() {
        assert_eq!(
            TimeWindow::ending_on(date(2026, 1, 5), 0),
            Err(WindowError::OutOfRange(0))
        );
        assert!(TimeWindow::ending_on(date(2026, 1, 5), 49).is_err());
        let window = TimeWindow::ending_on(date(2026, 1, 5), 48).unwrap();
        assert_eq!(window.flux_range(), "-48mo");
        assert_eq!(window.start, midnight(2022, 2, 1));
    }
}
