//! Transactional interface over the attendance ledger and a read-only
//! interface over the shift-plan view.
//!
//! The reconciliation engine and the Janitor are written against the
//! [`Store`] trait so they can be exercised in tests against
//! [`testing::FakeStore`] without a live MSSQL instance.

pub mod mssql;
pub mod testing;

use crate::domain::{AttendanceRow, EmployeeId, Shift};
use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Newest row for the employee, ordered by `(date_stamp, id)` descending.
    async fn latest_row_for(&self, employee_id: &EmployeeId) -> StoreResult<Option<AttendanceRow>>;

    /// Newest row for the employee on a specific logical day.
    async fn latest_row_on(
        &self,
        employee_id: &EmployeeId,
        date_stamp: NaiveDate,
    ) -> StoreResult<Option<AttendanceRow>>;

    /// All open rows (`time_out IS NULL`) whose effective open instant
    /// (`coalesce(time_in, date_stamp)`) precedes `threshold`.
    async fn find_open_rows_older_than(
        &self,
        threshold: NaiveDateTime,
    ) -> StoreResult<Vec<AttendanceRow>>;

    /// Insert a new open row (`TimeIn` set, `TimeOut` null).
    async fn insert_open(
        &self,
        date_stamp: NaiveDate,
        employee_id: &EmployeeId,
        ip_in: &str,
        time_in: NaiveDateTime,
    ) -> StoreResult<AttendanceRow>;

    /// Insert an out-only row (`TimeIn` null, `TimeOut` set).
    async fn insert_out_only(
        &self,
        date_stamp: NaiveDate,
        employee_id: &EmployeeId,
        ip_out: &str,
        time_out: NaiveDateTime,
    ) -> StoreResult<AttendanceRow>;

    /// Overwrite `TimeOut`/`IpOut` on an existing row.
    async fn update_close(
        &self,
        id: i64,
        time_out: NaiveDateTime,
        ip_out: &str,
    ) -> StoreResult<()>;

    /// Planned `OutTmp` for an employee on a given logical day, if a plan row exists.
    async fn shift_end_time_for(
        &self,
        employee_id: &EmployeeId,
        date_period: NaiveDate,
    ) -> StoreResult<Option<NaiveTime>>;

    /// All plan rows for the listed candidate dates, most recent `date_period` first.
    async fn shifts_for(
        &self,
        employee_id: &EmployeeId,
        dates: &[NaiveDate],
    ) -> StoreResult<Vec<Shift>>;

    /// Liveness check, used by both daemons at startup.
    async fn ping(&self) -> StoreResult<()>;
}
