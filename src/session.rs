//! Session start: ensure the cache tables, decide whether the holiday list is
//! due for a refresh, and run the sync as one transaction.

use crate::error::SyncResult;
use crate::source::DatasetSource;
use crate::sqlite::RowStore;
use crate::staleness::is_due;
use crate::sync::{holiday_schema, read_state, SyncOutcome, Synchronizer};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReport {
    /// The cache was checked this month already; the feed was not contacted.
    Fresh,
    Synced(SyncOutcome),
}

/// Refresh the holiday cache if it is absent or stale.
///
/// Staged writes are committed when the sync succeeds (including soft
/// fetch failures, which write nothing) and rolled back before any error is
/// returned.
pub fn load_holidays<S: DatasetSource>(
    store: &mut RowStore,
    synchronizer: &Synchronizer<S>,
    now: NaiveDateTime,
) -> SyncResult<SessionReport> {
    run_session(store, synchronizer, now, false)
}

/// Like [`load_holidays`] but ignores the monthly schedule. The hash
/// comparison still prevents rewriting an unchanged list.
pub fn refresh_holidays<S: DatasetSource>(
    store: &mut RowStore,
    synchronizer: &Synchronizer<S>,
    now: NaiveDateTime,
) -> SyncResult<SessionReport> {
    run_session(store, synchronizer, now, true)
}

fn run_session<S: DatasetSource>(
    store: &mut RowStore,
    synchronizer: &Synchronizer<S>,
    now: NaiveDateTime,
    force: bool,
) -> SyncResult<SessionReport> {
    store.ensure_schema(&holiday_schema())?;
    let prior = read_state(store)?;

    let due = match &prior {
        None => true,
        Some(_) if force => true,
        Some(state) => match is_due(&state.checked_on, now) {
            Ok(due) => due,
            Err(err) => {
                warn!(
                    "unreadable last update date {:?} ({}), refreshing",
                    state.checked_on, err
                );
                true
            }
        },
    };
    if !due {
        debug!("holiday cache is fresh");
        return Ok(SessionReport::Fresh);
    }

    info!("synchronizing holiday list");
    let outcome = store
        .transaction(|store| synchronizer.run(store, prior.as_ref(), now.date()))
        .inspect_err(|err| warn!("holiday sync rolled back: {}", err))?;
    Ok(SessionReport::Synced(outcome))
}
