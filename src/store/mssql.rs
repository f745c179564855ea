//! `tiberius`-backed [`Store`] over `[EmpBook_db].[dbo].[TimeAttandanceLog]`
//! and `[db_pfpdashboard].[dbo].[VListPeriodEmployee]`.
//!
//! `sqlx` -- the SQL crate this codebase otherwise reaches for -- has no TDS
//! backend, so MSSQL access here goes through `tiberius` pooled with
//! `bb8-tiberius` instead; see `DESIGN.md` for the substitution rationale.

use super::{Store, StoreResult};
use crate::domain::{AttendanceRow, EmployeeId, Shift};
use crate::errors::StoreError;
use anyhow::Context;
use async_trait::async_trait;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{AuthMethod, Config as TiberiusConfig, Query};
use tracing::debug;

/// Connection parameters for the MSSQL backend, distinct from the process-wide
/// [`crate::config::Config`] so the store crate boundary stays narrow.
#[derive(Debug, Clone)]
pub struct MssqlConnectOptions {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

pub struct MssqlStore {
    pool: Pool<ConnectionManager>,
}

impl MssqlStore {
    /// Build a connection pool and verify connectivity before returning.
    pub async fn connect(opts: MssqlConnectOptions) -> anyhow::Result<Self> {
        let mut config = TiberiusConfig::new();
        config.host(&opts.server);
        config.database(&opts.database);
        config.authentication(AuthMethod::sql_server(&opts.user, &opts.password));
        config.trust_cert();

        let manager = ConnectionManager::new(config);
        let pool = Pool::builder()
            .min_idle(Some(0))
            .max_size(8)
            .connection_timeout(std::time::Duration::from_secs(5))
            .build(manager)
            .await
            .context("failed to build MSSQL connection pool")?;

        let store = Self { pool };
        store.ping().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        debug!(server = %opts.server, database = %opts.database, "MSSQL store connected");
        Ok(store)
    }

    fn wrap<E: Into<anyhow::Error>>(err: E) -> StoreError {
        // tiberius surfaces connect/timeout failures as generic io/protocol
        // errors indistinguishable from permanent ones at this layer; callers
        // that know a query is idempotent treat both the same way (drop and
        // retry next cycle), so the coarse classification below is sufficient.
        StoreError::Transient(err.into())
    }
}

fn row_to_attendance(row: &tiberius::Row) -> anyhow::Result<AttendanceRow> {
    let id: i64 = row.get("Id").context("missing Id")?;
    let date_stamp: NaiveDateTime = row.get("DateTimeStamp").context("missing DateTimeStamp")?;
    let employee_raw: &str = row.get("EmpId").context("missing EmpId")?;
    let employee_id =
        EmployeeId::normalize(employee_raw).context("EmpId in ledger row is blank")?;
    Ok(AttendanceRow {
        id,
        date_stamp: date_stamp.date(),
        employee_id,
        time_in: row.get("TimeIn"),
        time_out: row.get("TimeOut"),
        ip_in: row.get::<&str, _>("IPStampIn").map(str::to_owned),
        ip_out: row.get::<&str, _>("IPStampOut").map(str::to_owned),
    })
}

#[async_trait]
impl Store for MssqlStore {
    async fn latest_row_for(&self, employee_id: &EmployeeId) -> StoreResult<Option<AttendanceRow>> {
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        let mut q = Query::new(
            "SELECT TOP 1 [Id], [DateTimeStamp], [EmpId], [TimeIn], [TimeOut], [IPStampIn], [IPStampOut]
             FROM [EmpBook_db].[dbo].[TimeAttandanceLog] WITH (NOLOCK)
             WHERE [EmpId] = @P1
             ORDER BY [DateTimeStamp] DESC, [Id] DESC",
        );
        q.bind(employee_id.as_str());
        let stream = q.query(&mut conn).await.map_err(Self::wrap)?;
        let row = stream.into_row().await.map_err(Self::wrap)?;
        row.as_ref()
            .map(row_to_attendance)
            .transpose()
            .map_err(StoreError::Permanent)
    }

    async fn latest_row_on(
        &self,
        employee_id: &EmployeeId,
        date_stamp: NaiveDate,
    ) -> StoreResult<Option<AttendanceRow>> {
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        let mut q = Query::new(
            "SELECT TOP 1 [Id], [DateTimeStamp], [EmpId], [TimeIn], [TimeOut], [IPStampIn], [IPStampOut]
             FROM [EmpBook_db].[dbo].[TimeAttandanceLog] WITH (NOLOCK)
             WHERE [EmpId] = @P1 AND CAST([DateTimeStamp] AS DATE) = @P2
             ORDER BY [Id] DESC",
        );
        q.bind(employee_id.as_str());
        q.bind(date_stamp);
        let stream = q.query(&mut conn).await.map_err(Self::wrap)?;
        let row = stream.into_row().await.map_err(Self::wrap)?;
        row.as_ref()
            .map(row_to_attendance)
            .transpose()
            .map_err(StoreError::Permanent)
    }

    async fn find_open_rows_older_than(
        &self,
        threshold: NaiveDateTime,
    ) -> StoreResult<Vec<AttendanceRow>> {
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        let mut q = Query::new(
            "SELECT [Id], [DateTimeStamp], [EmpId], [TimeIn], [TimeOut], [IPStampIn], [IPStampOut]
             FROM [EmpBook_db].[dbo].[TimeAttandanceLog] WITH (NOLOCK)
             WHERE [TimeOut] IS NULL
               AND (
                 ([TimeIn] IS NOT NULL AND [TimeIn] < @P1)
                 OR ([TimeIn] IS NULL AND [DateTimeStamp] < @P1)
               )",
        );
        q.bind(threshold);
        let stream = q.query(&mut conn).await.map_err(Self::wrap)?;
        let rows = stream.into_first_result().await.map_err(Self::wrap)?;
        rows.iter()
            .map(row_to_attendance)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(StoreError::Permanent)
    }

    async fn insert_open(
        &self,
        date_stamp: NaiveDate,
        employee_id: &EmployeeId,
        ip_in: &str,
        time_in: NaiveDateTime,
    ) -> StoreResult<AttendanceRow> {
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        let mut q = Query::new(
            "INSERT INTO [EmpBook_db].[dbo].[TimeAttandanceLog]
                ([DateTimeStamp], [EmpId], [IPStampIn], [TimeIn], [TimeOut])
             OUTPUT INSERTED.[Id]
             VALUES (@P1, @P2, @P3, @P4, NULL)",
        );
        q.bind(date_stamp.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        q.bind(employee_id.as_str());
        q.bind(ip_in);
        q.bind(time_in);
        let stream = q.query(&mut conn).await.map_err(Self::wrap)?;
        let row = stream.into_row().await.map_err(Self::wrap)?;
        let id: i64 = row
            .context("INSERT ... OUTPUT returned no row")
            .map_err(StoreError::Permanent)?
            .get("Id")
            .context("missing Id in OUTPUT clause")
            .map_err(StoreError::Permanent)?;
        Ok(AttendanceRow {
            id,
            date_stamp,
            employee_id: employee_id.clone(),
            time_in: Some(time_in),
            time_out: None,
            ip_in: Some(ip_in.to_owned()),
            ip_out: None,
        })
    }

    async fn insert_out_only(
        &self,
        date_stamp: NaiveDate,
        employee_id: &EmployeeId,
        ip_out: &str,
        time_out: NaiveDateTime,
    ) -> StoreResult<AttendanceRow> {
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        let mut q = Query::new(
            "INSERT INTO [EmpBook_db].[dbo].[TimeAttandanceLog]
                ([DateTimeStamp], [EmpId], [IPStampOut], [TimeIn], [TimeOut])
             OUTPUT INSERTED.[Id]
             VALUES (@P1, @P2, @P3, NULL, @P4)",
        );
        q.bind(date_stamp.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap()));
        q.bind(employee_id.as_str());
        q.bind(ip_out);
        q.bind(time_out);
        let stream = q.query(&mut conn).await.map_err(Self::wrap)?;
        let row = stream.into_row().await.map_err(Self::wrap)?;
        let id: i64 = row
            .context("INSERT ... OUTPUT returned no row")
            .map_err(StoreError::Permanent)?
            .get("Id")
            .context("missing Id in OUTPUT clause")
            .map_err(StoreError::Permanent)?;
        Ok(AttendanceRow {
            id,
            date_stamp,
            employee_id: employee_id.clone(),
            time_in: None,
            time_out: Some(time_out),
            ip_in: None,
            ip_out: Some(ip_out.to_owned()),
        })
    }

    async fn update_close(&self, id: i64, time_out: NaiveDateTime, ip_out: &str) -> StoreResult<()> {
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        let mut q = Query::new(
            "UPDATE [EmpBook_db].[dbo].[TimeAttandanceLog]
             SET [TimeOut] = @P1, [IPStampOut] = @P2
             WHERE [Id] = @P3",
        );
        q.bind(time_out);
        q.bind(ip_out);
        q.bind(id);
        q.execute(&mut conn).await.map_err(Self::wrap)?;
        Ok(())
    }

    async fn shift_end_time_for(
        &self,
        employee_id: &EmployeeId,
        date_period: NaiveDate,
    ) -> StoreResult<Option<NaiveTime>> {
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        let mut q = Query::new(
            "SELECT TOP 1 [OutTmp]
             FROM [db_pfpdashboard].[dbo].[VListPeriodEmployee] WITH (NOLOCK)
             WHERE [EmpId] = @P1 AND [DatePeriod] = @P2",
        );
        q.bind(employee_id.as_str());
        q.bind(date_period);
        let stream = q.query(&mut conn).await.map_err(Self::wrap)?;
        let row = stream.into_row().await.map_err(Self::wrap)?;
        Ok(row.and_then(|r| r.get::<NaiveTime, _>("OutTmp")))
    }

    async fn shifts_for(
        &self,
        employee_id: &EmployeeId,
        dates: &[NaiveDate],
    ) -> StoreResult<Vec<Shift>> {
        if dates.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        // `tiberius` has no native array bind; the candidate set is always
        // {today, yesterday} per the spec, so two placeholders cover it.
        let placeholders: Vec<String> = (2..=dates.len() + 1).map(|i| format!("@P{i}")).collect();
        let sql = format!(
            "SELECT [DatePeriod], [InTmp], [OutTmp], [HoliDay]
             FROM [db_pfpdashboard].[dbo].[VListPeriodEmployee] WITH (NOLOCK)
             WHERE [EmpId] = @P1 AND [DatePeriod] IN ({})
             ORDER BY [DatePeriod] DESC",
            placeholders.join(", ")
        );
        let mut q = Query::new(sql);
        q.bind(employee_id.as_str());
        for d in dates {
            q.bind(*d);
        }
        let stream = q.query(&mut conn).await.map_err(Self::wrap)?;
        let rows = stream.into_first_result().await.map_err(Self::wrap)?;
        let mut shifts = Vec::with_capacity(rows.len());
        for row in &rows {
            // `DatePeriod` is a SQL `date` column (§3, GLOSSARY), same as the
            // bind side in `shift_end_time_for` above -- read it as
            // `NaiveDate`, not `NaiveDateTime`, or tiberius's `FromSql`
            // conversion fails on every row and the shift-aware path never
            // sees a plan.
            let date_period: NaiveDate = match row.get::<NaiveDate, _>("DatePeriod") {
                Some(d) => d,
                None => continue,
            };
            let (Some(in_tmp), Some(out_tmp)) = (
                row.get::<NaiveTime, _>("InTmp"),
                row.get::<NaiveTime, _>("OutTmp"),
            ) else {
                continue;
            };
            // `HoliDay` is declared `bit` in the view (§3: "holiday
            // (boolean/0-1)"), which tiberius decodes straight to `bool`.
            let holiday = row.get::<bool, _>("HoliDay").unwrap_or(false);
            shifts.push(Shift {
                date_period,
                in_tmp,
                out_tmp,
                holiday,
            });
        }
        Ok(shifts)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.pool.get().await.map_err(Self::wrap)?;
        let mut q = Query::new("SELECT 1");
        q.query(&mut conn).await.map_err(Self::wrap)?;
        Ok(())
    }
}
