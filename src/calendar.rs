//! Month view model: six weeks of days starting on Sunday, each classified
//! for display.

use crate::sqlite::{RowStore, StoreError, Value};
use crate::sync::Holiday;
use chrono::{Datelike, Days, Local, Months, NaiveDate, Weekday};

pub const WEEKS: usize = 6;
pub const DAYS_PER_WEEK: usize = 7;

/// Column headers, Sunday first.
pub const WEEKDAY_LABELS: [&str; DAYS_PER_WEEK] = ["日", "月", "火", "水", "木", "金", "土"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayKind {
    Weekday,
    Saturday,
    Sunday,
    Holiday(String),
}

impl DayKind {
    fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sun => DayKind::Sunday,
            Weekday::Sat => DayKind::Saturday,
            _ => DayKind::Weekday,
        }
    }

    /// Sundays and holidays.
    pub fn is_red(&self) -> bool {
        matches!(self, DayKind::Sunday | DayKind::Holiday(_))
    }

    pub fn is_blue(&self) -> bool {
        matches!(self, DayKind::Saturday)
    }

    pub fn holiday_name(&self) -> Option<&str> {
        match self {
            DayKind::Holiday(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCell {
    pub date: NaiveDate,
    /// False for the leading and trailing days of the neighbouring months.
    pub in_month: bool,
    pub kind: DayKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
    first: NaiveDate,
    cells: Vec<DayCell>,
}

impl MonthGrid {
    /// `None` when `month` is not 1..=12 or the year is out of range.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(Self::starting)
    }

    pub fn containing(date: NaiveDate) -> Self {
        Self::starting(date.with_day(1).unwrap_or(date))
    }

    pub fn today() -> Self {
        Self::containing(Local::now().date_naive())
    }

    fn starting(first: NaiveDate) -> Self {
        let lead = u64::from(first.weekday().num_days_from_sunday());
        let start = first.checked_sub_days(Days::new(lead)).unwrap_or(first);
        let cells = start
            .iter_days()
            .take(WEEKS * DAYS_PER_WEEK)
            .map(|date| DayCell {
                date,
                in_month: date.year() == first.year() && date.month() == first.month(),
                kind: DayKind::of(date),
            })
            .collect();
        Self { first, cells }
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn title(&self) -> String {
        format!("{:04}年{:02}月", self.year(), self.month())
    }

    pub fn cells(&self) -> &[DayCell] {
        &self.cells
    }

    pub fn weeks(&self) -> impl Iterator<Item = &[DayCell]> {
        self.cells.chunks(DAYS_PER_WEEK)
    }

    /// First and last date shown, including neighbouring-month days.
    pub fn span(&self) -> (NaiveDate, NaiveDate) {
        match (self.cells.first(), self.cells.last()) {
            (Some(first), Some(last)) => (first.date, last.date),
            _ => (self.first, self.first),
        }
    }

    /// The grid `delta` months away. `None` past the representable range.
    pub fn shift(&self, delta: i32) -> Option<Self> {
        let months = Months::new(delta.unsigned_abs());
        let first = if delta >= 0 {
            self.first.checked_add_months(months)
        } else {
            self.first.checked_sub_months(months)
        };
        first.map(Self::starting)
    }

    /// Mark the given holidays; dates outside the grid are ignored.
    pub fn apply_holidays(&mut self, holidays: &[Holiday]) {
        for cell in &mut self.cells {
            if let Some(holiday) = holidays.iter().find(|h| h.date == cell.date) {
                cell.kind = DayKind::Holiday(holiday.name.clone());
            }
        }
    }

    /// Mark holidays from the cached list.
    pub fn with_holidays(mut self, store: &mut RowStore) -> Result<Self, StoreError> {
        let (first, last) = self.span();
        let holidays = holidays_between(store, first, last)?;
        self.apply_holidays(&holidays);
        Ok(self)
    }

    /// Holidays falling inside the displayed month, in date order.
    pub fn holidays(&self) -> impl Iterator<Item = (NaiveDate, &str)> {
        self.cells
            .iter()
            .filter(|cell| cell.in_month)
            .filter_map(|cell| cell.kind.holiday_name().map(|name| (cell.date, name)))
    }
}

/// Name of the holiday on `date`, if it is one.
pub fn holiday_name(store: &mut RowStore, date: NaiveDate) -> Result<Option<String>, StoreError> {
    store.query_column_optional("SELECT name FROM weekday WHERE wdate = ?", &[Value::from(date)])
}

/// Cached holidays between `first` and `last` inclusive.
pub fn holidays_between(
    store: &mut RowStore,
    first: NaiveDate,
    last: NaiveDate,
) -> Result<Vec<Holiday>, StoreError> {
    store.query_all(
        "SELECT wdate, name FROM weekday WHERE wdate BETWEEN ? AND ? ORDER BY wdate",
        &[Value::from(first), Value::from(last)],
    )
}
