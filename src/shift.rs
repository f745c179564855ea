//! Shift Resolver: given `(employee, instant)`, returns the covering shift
//! window or `none`. Pure logic over rows already fetched from the
//! [`crate::store::Store`]; the async fetch itself lives in
//! [`resolve`], the only place this module touches the store.

use crate::domain::{EmployeeId, Shift};
use crate::store::{Store, StoreResult};
use chrono::{Duration, NaiveDateTime};

/// Candidate dates for a punch at `instant`: its own date and the day
/// before, so an overnight shift starting yesterday can still admit it.
pub fn candidate_dates(instant: NaiveDateTime) -> [chrono::NaiveDate; 2] {
    let today = instant.date();
    [today, today - Duration::days(1)]
}

/// Pick the first candidate shift whose admission window contains `instant`,
/// skipping holiday-with-midnight-start rows (§3, bypassed shifts) and rows
/// missing a usable `in_tmp`/`out_tmp` pair (already filtered out by the
/// store, but defended here too since `shifts` may come from a fake in
/// tests). Candidates are assumed pre-sorted by `date_period` descending, so
/// the first match is the most recent shift still covering `instant` --
/// this is what prefers an overnight shift from day D over a coincidentally
/// overlapping day-D+1 shift near midnight.
pub fn select(shifts: &[Shift], instant: NaiveDateTime) -> Option<Shift> {
    shifts
        .iter()
        .filter(|s| !s.is_bypassed())
        .find(|s| s.admits(instant))
        .copied()
}

/// Fetch candidate shift rows for `employee_id` around `instant` and resolve
/// the covering shift, if any.
pub async fn resolve(
    store: &dyn Store,
    employee_id: &EmployeeId,
    instant: NaiveDateTime,
) -> StoreResult<Option<Shift>> {
    let dates = candidate_dates(instant);
    let shifts = store.shifts_for(employee_id, &dates).await?;
    Ok(select(&shifts, instant))
}
