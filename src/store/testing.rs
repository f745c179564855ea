//! In-memory [`Store`] double backing engine and janitor unit tests, so
//! neither needs a live MSSQL instance.

use super::{Store, StoreResult};
use crate::domain::{AttendanceRow, EmployeeId, Shift};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<Vec<AttendanceRow>>,
    shifts: Mutex<Vec<Shift>>,
    next_id: AtomicI64,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push_shift(&self, shift: Shift) {
        self.shifts.lock().await.push(shift);
    }

    pub async fn all_rows(&self) -> Vec<AttendanceRow> {
        self.rows.lock().await.clone()
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn latest_row_for(&self, employee_id: &EmployeeId) -> StoreResult<Option<AttendanceRow>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| &r.employee_id == employee_id)
            .max_by_key(|r| (r.date_stamp, r.id))
            .cloned())
    }

    async fn latest_row_on(
        &self,
        employee_id: &EmployeeId,
        date_stamp: NaiveDate,
    ) -> StoreResult<Option<AttendanceRow>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| &r.employee_id == employee_id && r.date_stamp == date_stamp)
            .max_by_key(|r| r.id)
            .cloned())
    }

    async fn find_open_rows_older_than(
        &self,
        threshold: NaiveDateTime,
    ) -> StoreResult<Vec<AttendanceRow>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| r.time_out.is_none() && r.reference_instant() < threshold)
            .cloned()
            .collect())
    }

    async fn insert_open(
        &self,
        date_stamp: NaiveDate,
        employee_id: &EmployeeId,
        ip_in: &str,
        time_in: NaiveDateTime,
    ) -> StoreResult<AttendanceRow> {
        let row = AttendanceRow {
            id: self.next_id(),
            date_stamp,
            employee_id: employee_id.clone(),
            time_in: Some(time_in),
            time_out: None,
            ip_in: Some(ip_in.to_owned()),
            ip_out: None,
        };
        self.rows.lock().await.push(row.clone());
        Ok(row)
    }

    async fn insert_out_only(
        &self,
        date_stamp: NaiveDate,
        employee_id: &EmployeeId,
        ip_out: &str,
        time_out: NaiveDateTime,
    ) -> StoreResult<AttendanceRow> {
        let row = AttendanceRow {
            id: self.next_id(),
            date_stamp,
            employee_id: employee_id.clone(),
            time_in: None,
            time_out: Some(time_out),
            ip_in: None,
            ip_out: Some(ip_out.to_owned()),
        };
        self.rows.lock().await.push(row.clone());
        Ok(row)
    }

    async fn update_close(&self, id: i64, time_out: NaiveDateTime, ip_out: &str) -> StoreResult<()> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            row.time_out = Some(time_out);
            row.ip_out = Some(ip_out.to_owned());
        }
        Ok(())
    }

    async fn shift_end_time_for(
        &self,
        employee_id: &EmployeeId,
        date_period: NaiveDate,
    ) -> StoreResult<Option<NaiveTime>> {
        let _ = employee_id; // FakeStore is single-tenant; the real store scopes by EmpId too.
        let shifts = self.shifts.lock().await;
        Ok(shifts
            .iter()
            .find(|s| s.date_period == date_period)
            .map(|s| s.out_tmp))
    }

    async fn shifts_for(
        &self,
        employee_id: &EmployeeId,
        dates: &[NaiveDate],
    ) -> StoreResult<Vec<Shift>> {
        let _ = employee_id;
        let shifts = self.shifts.lock().await;
        let mut matched: Vec<Shift> = shifts
            .iter()
            .filter(|s| dates.contains(&s.date_period))
            .copied()
            .collect();
        matched.sort_by(|a, b| b.date_period.cmp(&a.date_period));
        Ok(matched)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
