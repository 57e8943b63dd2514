//! Mirror of the remote holiday list.
//!
//! A sync fetches the feed, compares its SHA-512 digest with the one stored in
//! `lastupdate`, and only when they differ rewrites `weekday` row by row. The
//! digest is updated in the same transaction as the rows it describes.

use crate::error::{SyncError, SyncResult};
use crate::source::{DatasetSource, FetchError};
use crate::sqlite::{
    ColumnDefinition, DataType, FromRow, Params, RowStore, Schema, StoreError, TableDefinition,
};
use chrono::NaiveDate;
use rusqlite::Row;
use sha2::{Digest, Sha512};
use tracing::{debug, info, warn};

pub const LAST_UPDATE_TABLE: &str = "lastupdate";
pub const HOLIDAY_TABLE: &str = "weekday";

/// The two tables backing the holiday cache.
pub fn holiday_schema() -> Schema {
    Schema::new()
        .add_table(
            TableDefinition::new(LAST_UPDATE_TABLE)
                .with_column(
                    ColumnDefinition::new("cdate")
                        .of_type(DataType::DateTime)
                        .primary_key(),
                )
                .with_column(ColumnDefinition::new("hash").of_type(DataType::Text)),
        )
        .add_table(
            TableDefinition::new(HOLIDAY_TABLE)
                .with_column(
                    ColumnDefinition::new("wdate")
                        .of_type(DataType::Date)
                        .primary_key(),
                )
                .with_column(ColumnDefinition::new("name").of_type(DataType::Text)),
        )
}

/// One special date of the holiday list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
}

impl Holiday {
    fn params(&self) -> Params {
        Params::new()
            .with_value("wdate", self.date)
            .with_value("name", self.name.as_str())
    }
}

impl FromRow for Holiday {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            date: row.get("wdate")?,
            name: row.get("name")?,
        })
    }
}

/// What the last successful sync saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// `YYYY-MM-DD` date the state row was first recorded.
    pub checked_on: String,
    /// Hex SHA-512 of the decoded feed text.
    pub hash: String,
}

impl FromRow for SyncState {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            checked_on: row.get("cdate")?,
            hash: row.get("hash")?,
        })
    }
}

/// Read the recorded sync state, if any.
pub fn read_state(store: &mut RowStore) -> Result<Option<SyncState>, StoreError> {
    store.query_optional("SELECT cdate, hash FROM lastupdate", &[])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The feed could not be fetched; nothing was written.
    Skipped(FetchError),
    /// The feed hash matches the stored one; nothing was written.
    Unchanged,
    Updated { records: usize },
}

impl SyncOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, SyncOutcome::Updated { .. })
    }
}

pub struct Synchronizer<S> {
    source: S,
}

impl<S: DatasetSource> Synchronizer<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the feed and replace the local mirror if it changed.
    ///
    /// Writes are staged in `store`'s transaction; the caller commits on `Ok`
    /// and must roll back on `Err`.
    pub fn run(
        &self,
        store: &mut RowStore,
        prior: Option<&SyncState>,
        today: NaiveDate,
    ) -> SyncResult<SyncOutcome> {
        let text = match self.source.fetch() {
            Ok(text) => text,
            Err(err) => {
                warn!("no holiday update performed: {}", err);
                return Ok(SyncOutcome::Skipped(err));
            }
        };

        let hash = content_hash(&text);
        if prior.is_some_and(|state| state.hash == hash) {
            debug!("holiday feed unchanged");
            return Ok(SyncOutcome::Unchanged);
        }

        let holidays = parse_dataset(&text)?;
        for holiday in &holidays {
            store.upsert(HOLIDAY_TABLE, &holiday.params())?;
        }
        record_state(store, prior, &hash, today)?;

        info!("holiday list updated with {} records", holidays.len());
        Ok(SyncOutcome::Updated {
            records: holidays.len(),
        })
    }
}

/// An existing state row keeps its key and takes the new hash; a first sync
/// records today's date.
fn record_state(
    store: &mut RowStore,
    prior: Option<&SyncState>,
    hash: &str,
    today: NaiveDate,
) -> Result<(), StoreError> {
    match prior {
        Some(state) => {
            let fields = Params::new()
                .with_value("cdate", state.checked_on.as_str())
                .with_value("hash", hash);
            store.upsert(LAST_UPDATE_TABLE, &fields)?;
        }
        None => {
            let fields = Params::new()
                .with_value("cdate", today)
                .with_value("hash", hash);
            store.insert(LAST_UPDATE_TABLE, &fields)?;
        }
    }
    Ok(())
}

/// Lowercase hex SHA-512 of the decoded feed text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Parse every line after the header as `year/month/day,label[,...]`.
///
/// The first malformed line fails the whole dataset.
pub fn parse_dataset(text: &str) -> SyncResult<Vec<Holiday>> {
    split_lines(text)
        .enumerate()
        .skip(1)
        .map(|(idx, line)| {
            parse_line(line).map_err(|reason| SyncError::MalformedDataset {
                line: idx + 1,
                content: line.to_string(),
                reason,
            })
        })
        .collect()
}

/// Split on every line boundary: `\r\n`, a lone `\r` or `\n`, and the
/// other Unicode separators. A trailing terminator yields no empty line.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let mut rest = text;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        match rest.char_indices().find(|(_, c)| is_line_boundary(*c)) {
            Some((idx, c)) => {
                let line = &rest[..idx];
                let mut next = idx + c.len_utf8();
                if c == '\r' && rest[next..].starts_with('\n') {
                    next += 1;
                }
                rest = &rest[next..];
                Some(line)
            }
            None => {
                let line = rest;
                rest = "";
                Some(line)
            }
        }
    })
}

fn is_line_boundary(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r'
            | '\u{0b}'
            | '\u{0c}'
            | '\u{1c}'
            | '\u{1d}'
            | '\u{1e}'
            | '\u{85}'
            | '\u{2028}'
            | '\u{2029}'
    )
}

fn parse_line(line: &str) -> Result<Holiday, String> {
    let mut fields = line.split(',');
    let date = fields
        .next()
        .map(str::trim)
        .ok_or_else(|| "missing date".to_string())?;
    let date = parse_date(date)?;
    let name = fields
        .next()
        .map(str::trim)
        .ok_or_else(|| "missing label".to_string())?;
    Ok(Holiday {
        date,
        name: name.to_string(),
    })
}

/// `yyyy/m/d`, zero padding optional.
fn parse_date(field: &str) -> Result<NaiveDate, String> {
    let parts: Vec<&str> = field.split('/').collect();
    let [year, month, day] = parts.as_slice() else {
        return Err(format!("expected year/month/day, got {field:?}"));
    };
    let year: i32 = parse_number(year)?;
    let month: u32 = parse_number(month)?;
    let day: u32 = parse_number(day)?;
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| format!("{field:?} is not a calendar date"))
}

fn parse_number<T: std::str::FromStr>(part: &str) -> Result<T, String> {
    part.trim()
        .parse()
        .map_err(|_| format!("{part:?} is not a number"))
}
