//! Monthly refresh schedule.

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};

/// Format of the date recorded in `lastupdate.cdate`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// First day of the month after `last`.
pub fn next_check_date(last: NaiveDate) -> NaiveDate {
    last.with_day0(0)
        .and_then(|first| first.checked_add_months(Months::new(1)))
        .unwrap_or(NaiveDate::MAX)
}

/// Whether a sync is due: `now` has reached the first day of the month
/// following `last_checked`.
pub fn is_due(last_checked: &str, now: NaiveDateTime) -> Result<bool, chrono::ParseError> {
    let last = NaiveDate::parse_from_str(last_checked, DATE_FORMAT)?;
    Ok(now.date() >= next_check_date(last))
}
