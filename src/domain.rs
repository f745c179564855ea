//! Core data model: punches, attendance rows, and planned shifts.
//!
//! Mirrors the shape of `[EmpBook_db].[dbo].[TimeAttandanceLog]` and the
//! read-only `[db_pfpdashboard].[dbo].[VListPeriodEmployee]` view. Nothing in
//! this module talks to the database directly -- see [`crate::store`].

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// Sentinel written to `ip_out` when a `TimeOut` was synthesized rather than
/// observed from a real punch. Downstream consumers key off this literal.
pub const AUTO_CLEANUP: &str = "AUTO_CLEANUP";

/// Sub-minute duplicate window: punches within this of the open `TimeIn` are discarded.
pub const DUP_WINDOW: ChronoDuration = ChronoDuration::seconds(60);
/// Window in which a second out-punch amends the prior `TimeOut`.
pub const AMEND_WINDOW: ChronoDuration = ChronoDuration::hours(1);
/// Longest an interval may stay open before a fresh punch closes it instead of discarding.
pub const MAX_OPEN_AGE: ChronoDuration = ChronoDuration::hours(16);
/// Age past which an open row with no resolvable shift is considered abandoned.
pub const STALE_SHIFT_AGE: ChronoDuration = ChronoDuration::hours(20);
/// Default `CLEANUP_THRESHOLD_HOURS` consulted by the Janitor.
pub const DEFAULT_CLEANUP_THRESHOLD_HOURS: i64 = 16;

/// Canonical employee identifier: left-zero-padded to width 5, never blank.
///
/// Construction is the only place normalization happens -- once built, an
/// `EmployeeId` is known-valid everywhere downstream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmployeeId(String);

impl EmployeeId {
    /// Normalize a raw identifier. Returns `None` for blank/whitespace-only input.
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let padded = if trimmed.len() < 5 {
            format!("{trimmed:0>5}")
        } else {
            trimmed.to_owned()
        };
        Some(Self(padded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single attendance event normalized from a terminal's live event stream.
#[derive(Debug, Clone)]
pub struct Punch {
    pub employee_id: EmployeeId,
    pub device_ip: String,
    pub instant: NaiveDateTime,
    /// Opaque pass-through fields, unused by reconciliation.
    pub kind: Option<String>,
    pub status: Option<i64>,
}

/// Whether the latest row for an employee is open, closed, or absent.
///
/// `None` only arises from the absence of a row at all -- see
/// [`RowState::of`], which classifies an `Option<&AttendanceRow>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    None,
    Open,
    Closed,
}

impl RowState {
    pub fn of(row: Option<&AttendanceRow>) -> Self {
        match row {
            None => RowState::None,
            Some(r) => r.state(),
        }
    }
}

/// One ledger entry, pairing (at most) a `TimeIn` with a later `TimeOut`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRow {
    pub id: i64,
    pub date_stamp: NaiveDate,
    pub employee_id: EmployeeId,
    pub time_in: Option<NaiveDateTime>,
    pub time_out: Option<NaiveDateTime>,
    pub ip_in: Option<String>,
    pub ip_out: Option<String>,
}

impl AttendanceRow {
    /// A persisted row is always `Open` or `Closed` -- `RowState::None`
    /// describes the absence of a row, see [`RowState::of`].
    pub fn state(&self) -> RowState {
        if self.time_out.is_some() {
            RowState::Closed
        } else {
            RowState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), RowState::Open)
    }

    /// `time_in`, falling back to the midnight of `date_stamp` when TimeIn is null
    /// (an out-only row). Used as the cleanup reference instant.
    pub fn reference_instant(&self) -> NaiveDateTime {
        self.time_in
            .unwrap_or_else(|| self.date_stamp.and_hms_opt(0, 0, 0).expect("midnight is valid"))
    }

    pub fn was_auto_closed(&self) -> bool {
        self.ip_out.as_deref() == Some(AUTO_CLEANUP)
    }
}

/// A planned work window read from `VListPeriodEmployee`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    pub date_period: NaiveDate,
    pub in_tmp: NaiveTime,
    pub out_tmp: NaiveTime,
    pub holiday: bool,
}

impl Shift {
    /// A holiday row with a midnight start carries no real plan; shift
    /// selection must skip it and let the fallback path run.
    pub fn is_bypassed(&self) -> bool {
        self.holiday && self.in_tmp == NaiveTime::from_hms_opt(0, 0, 0).unwrap()
    }

    pub fn shift_start(&self) -> NaiveDateTime {
        self.date_period.and_time(self.in_tmp)
    }

    /// End of the shift, wrapped forward 24h if it would otherwise precede the start.
    pub fn shift_end(&self) -> NaiveDateTime {
        let end = self.date_period.and_time(self.out_tmp);
        if end <= self.shift_start() {
            end + ChronoDuration::hours(24)
        } else {
            end
        }
    }

    /// `[shift_start - 4h, shift_end + 8h]`: the window a punch must fall in
    /// to be attributed to this shift.
    pub fn admission_window(&self) -> (NaiveDateTime, NaiveDateTime) {
        (
            self.shift_start() - ChronoDuration::hours(4),
            self.shift_end() + ChronoDuration::hours(8),
        )
    }

    pub fn admits(&self, instant: NaiveDateTime) -> bool {
        let (start, end) = self.admission_window();
        instant >= start && instant <= end
    }

    pub fn midpoint(&self) -> NaiveDateTime {
        self.shift_start() + (self.shift_end() - self.shift_start()) / 2
    }
}
