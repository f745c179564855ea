//! The Shift-Aware Punch Reconciliation Engine: the state machine that
//! classifies each incoming punch into {open, close, amend,
//! cleanup-then-open, discard} and executes the corresponding store
//! mutation (§4.4).
//!
//! Per-employee ordering is enforced by a sharded mutex map (§5,
//! [`ReconciliationEngine::lock_for`]) rather than relying on SQL-side
//! serializability alone, because classification reads then writes based on
//! the read.

use crate::clock::Clock;
use crate::domain::{
    AMEND_WINDOW, AUTO_CLEANUP, AttendanceRow, DUP_WINDOW, EmployeeId, MAX_OPEN_AGE, Punch,
    RowState, STALE_SHIFT_AGE, Shift,
};
use crate::shift;
use crate::store::{Store, StoreResult};
use chrono::Duration;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What the engine actually did with a punch. Never surfaced to callers as
/// an error -- §7's propagation policy has the engine return only a
/// did-mutate signal, logged here and collapsed to a `bool` at the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Sub-minute duplicate of the open row's `TimeIn`; no mutation.
    Discard,
    /// Closed the employee's currently open row with this punch.
    Close,
    /// Overwrote an existing `TimeOut` (synthetic or recent).
    Amend,
    /// Opened a new `TimeIn` row.
    Open,
    /// Inserted an out-only row (`TimeIn` null, `TimeOut` set).
    OutOnly,
}

impl Outcome {
    pub fn did_mutate(self) -> bool {
        !matches!(self, Outcome::Discard)
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    /// Sharded per-employee mutex map: one lock guards the full
    /// read-then-write sequence (Steps A-D) for a given employee, so
    /// concurrent device streams can't race the "at most one open row"
    /// invariant.
    locks: DashMap<EmployeeId, Arc<Mutex<()>>>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            locks: DashMap::new(),
        }
    }

    fn lock_handle(&self, employee_id: &EmployeeId) -> Arc<Mutex<()>> {
        self.locks
            .entry(employee_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Classify and apply `punch`, returning whether it mutated the store.
    /// Never returns a `StoreError` to the caller's caller -- the Supervisor
    /// only logs the outcome, per §7.
    pub async fn process(&self, punch: Punch) -> StoreResult<Outcome> {
        let lock = self.lock_handle(&punch.employee_id);
        let _guard = lock.lock().await;
        self.process_locked(&punch).await
    }

    async fn process_locked(&self, punch: &Punch) -> StoreResult<Outcome> {
        let shift = shift::resolve(self.store.as_ref(), &punch.employee_id, punch.instant).await?;

        // Step A: cleanup a stale previous open interval, if any. Remember
        // which row (if any) we just auto-closed -- §9's "cleanup tie with
        // AMEND" resolution is that this same row must never be re-amended
        // by Step C below, even though a fresh AUTO_CLEANUP sentinel would
        // otherwise make it look AMEND-eligible.
        let mut just_cleaned_up: Option<i64> = None;
        if let Some(prev) = self.store.latest_row_for(&punch.employee_id).await?
            && prev.is_open()
            && self.should_cleanup(&prev, punch.instant, shift.as_ref())
        {
            self.cleanup(&prev).await?;
            just_cleaned_up = Some(prev.id);
        }

        // Step B: select the candidate row for amendment.
        let candidate = match &shift {
            Some(s) => {
                self.store
                    .latest_row_on(&punch.employee_id, s.date_period)
                    .await?
            }
            None => self.store.latest_row_for(&punch.employee_id).await?,
        };
        let candidate = candidate.filter(|row| Some(row.id) != just_cleaned_up);

        // Step C: classify against the candidate.
        match RowState::of(candidate.as_ref()) {
            RowState::Open => {
                let row = candidate.expect("RowState::Open implies a row");
                let basis = row
                    .time_in
                    .expect("an open row always has TimeIn set (see domain invariants)");
                let diff = punch.instant - basis;
                // `diff == 0` is an exact replay of the opening punch itself
                // (P3: idempotence), folded into the same discard path as a
                // sub-minute duplicate rather than falling through to Step D.
                if diff >= Duration::zero() && diff < DUP_WINDOW {
                    debug!(employee_id = %punch.employee_id, "discarding sub-minute duplicate punch");
                    return Ok(Outcome::Discard);
                }
                if diff > Duration::zero() && diff < MAX_OPEN_AGE {
                    self.store
                        .update_close(row.id, punch.instant, &punch.device_ip)
                        .await?;
                    info!(employee_id = %punch.employee_id, row_id = row.id, "closed open interval");
                    return Ok(Outcome::Close);
                }
                // Earlier than basis, or more than MAX_OPEN_AGE after: fall through to Step D.
            }
            RowState::Closed => {
                let row = candidate.expect("RowState::Closed implies a row");
                let time_out = row
                    .time_out
                    .expect("a closed row always has TimeOut set (see domain invariants)");
                // `time_out >= punch.instant` covers both an amendment by an
                // earlier-recorded punch and an exact replay of the closing
                // punch itself (P3: idempotence is an AMEND no-op, per §4.4).
                let should_amend = row.was_auto_closed() || time_out >= punch.instant || {
                    let diff = punch.instant - time_out;
                    diff > Duration::zero() && diff < AMEND_WINDOW
                };
                if should_amend {
                    self.store
                        .update_close(row.id, punch.instant, &punch.device_ip)
                        .await?;
                    info!(employee_id = %punch.employee_id, row_id = row.id, "amended TimeOut");
                    return Ok(Outcome::Amend);
                }
                // Fall through to Step D.
            }
            RowState::None => {}
        }

        // Step D: open a new interval.
        self.open_new(punch, shift.as_ref()).await
    }

    /// §4.4 Step A predicate: does the previous open row belong to a
    /// different shift than the one covering `t` (or has it simply gone
    /// stale with no shift to anchor it)?
    fn should_cleanup(&self, prev: &AttendanceRow, t: chrono::NaiveDateTime, shift: Option<&Shift>) -> bool {
        match shift {
            Some(s) => {
                let basis = prev.time_in.unwrap_or(prev.reference_instant());
                !s.admits(basis)
            }
            None => {
                let basis = prev.reference_instant();
                t - basis > STALE_SHIFT_AGE
            }
        }
    }

    /// Synthesize and write a `TimeOut` for an abandoned open row, per the
    /// shared Step-A/Janitor recipe: prefer the planned `OutTmp`, wrapping
    /// overnight if needed, else fall back to the row's own reference instant.
    async fn cleanup(&self, prev: &AttendanceRow) -> StoreResult<()> {
        let synthetic = self.synthesize_close(prev).await?;
        self.store
            .update_close(prev.id, synthetic, AUTO_CLEANUP)
            .await?;
        warn!(
            employee_id = %prev.employee_id,
            row_id = prev.id,
            synthetic_time_out = %synthetic,
            "auto-closed abandoned open interval"
        );
        Ok(())
    }

    /// Compute the synthetic `TimeOut` for `row` without writing it.
    /// Shared by [`Self::cleanup`] (engine Step A) and the Janitor sweep,
    /// which apply the identical recipe per §4.6.
    pub async fn synthesize_close(&self, row: &AttendanceRow) -> StoreResult<chrono::NaiveDateTime> {
        let planned = self
            .store
            .shift_end_time_for(&row.employee_id, row.date_stamp)
            .await?;
        Ok(match planned {
            Some(out_tmp) => {
                let basis = row.time_in.unwrap_or_else(|| row.reference_instant());
                let mut candidate = row.date_stamp.and_time(out_tmp);
                if candidate <= basis {
                    candidate += chrono::Duration::hours(24);
                }
                candidate
            }
            None => row.reference_instant(),
        })
    }

    async fn open_new(&self, punch: &Punch, shift: Option<&Shift>) -> StoreResult<Outcome> {
        match shift {
            Some(s) if punch.instant > s.midpoint() => {
                self.store
                    .insert_out_only(s.date_period, &punch.employee_id, &punch.device_ip, punch.instant)
                    .await?;
                info!(employee_id = %punch.employee_id, "opened out-only row (late first punch)");
                Ok(Outcome::OutOnly)
            }
            Some(s) => {
                self.store
                    .insert_open(s.date_period, &punch.employee_id, &punch.device_ip, punch.instant)
                    .await?;
                info!(employee_id = %punch.employee_id, "opened new interval (shift-anchored)");
                Ok(Outcome::Open)
            }
            None => {
                self.store
                    .insert_open(
                        punch.instant.date(),
                        &punch.employee_id,
                        &punch.device_ip,
                        punch.instant,
                    )
                    .await?;
                info!(employee_id = %punch.employee_id, "opened new interval (no plan)");
                Ok(Outcome::Open)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use crate::domain::EmployeeId;
    use crate::store::testing::FakeStore;
    use chrono::{NaiveDate, NaiveTime};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }
    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }
    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32) -> chrono::NaiveDateTime {
        date(y, m, d).and_time(time(h, mi))
    }
    fn emp(id: &str) -> EmployeeId {
        EmployeeId::normalize(id).unwrap()
    }
    fn punch(id: &str, ip: &str, when: chrono::NaiveDateTime) -> Punch {
        Punch {
            employee_id: emp(id),
            device_ip: ip.to_owned(),
            instant: when,
            kind: None,
            status: None,
        }
    }

    fn engine(store: Arc<FakeStore>) -> ReconciliationEngine {
        ReconciliationEngine::new(store, Arc::new(FixedClock::new(dt(2025, 1, 15, 0, 0))))
    }

    /// Scenario 1: normal in/out, no plan.
    #[tokio::test]
    async fn normal_in_then_out_pairs_into_one_row() {
        let store = Arc::new(FakeStore::new());
        let eng = engine(store.clone());

        let out1 = eng
            .process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 8, 0)))
            .await
            .unwrap();
        assert_eq!(out1, Outcome::Open);

        let out2 = eng
            .process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 17, 0)))
            .await
            .unwrap();
        assert_eq!(out2, Outcome::Close);

        let row = store.latest_row_for(&emp("05233")).await.unwrap().unwrap();
        assert_eq!(row.date_stamp, date(2025, 1, 15));
        assert_eq!(row.time_in, Some(dt(2025, 1, 15, 8, 0)));
        assert_eq!(row.time_out, Some(dt(2025, 1, 15, 17, 0)));
        assert_eq!(row.ip_in.as_deref(), Some("10.0.0.1"));
        assert_eq!(row.ip_out.as_deref(), Some("10.0.0.1"));
    }

    /// Scenario 2: sub-minute duplicate is discarded.
    #[tokio::test]
    async fn sub_minute_duplicate_is_discarded() {
        let store = Arc::new(FakeStore::new());
        let eng = engine(store.clone());

        eng.process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 8, 0, )))
            .await
            .unwrap();
        let out = eng
            .process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 8, 0) + Duration::seconds(30)))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Discard);

        assert_eq!(store.all_rows().await.len(), 1);
        let row = store.latest_row_for(&emp("05233")).await.unwrap().unwrap();
        assert!(row.is_open());
        assert_eq!(row.time_in, Some(dt(2025, 1, 15, 8, 0)));
    }

    /// Scenario 3: AMEND within 1h, then a new row after the window closes.
    #[tokio::test]
    async fn amend_within_window_then_new_row_after() {
        let store = Arc::new(FakeStore::new());
        let eng = engine(store.clone());

        eng.process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 8, 0)))
            .await
            .unwrap();
        eng.process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 17, 0)))
            .await
            .unwrap();

        let amend = eng
            .process(punch("05233", "10.0.0.2", dt(2025, 1, 15, 17, 45)))
            .await
            .unwrap();
        assert_eq!(amend, Outcome::Amend);
        let row = store.latest_row_for(&emp("05233")).await.unwrap().unwrap();
        assert_eq!(row.time_out, Some(dt(2025, 1, 15, 17, 45)));
        assert_eq!(row.ip_out.as_deref(), Some("10.0.0.2"));

        let opened = eng
            .process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 19, 0)))
            .await
            .unwrap();
        assert_eq!(opened, Outcome::Open);
        assert_eq!(store.all_rows().await.len(), 2);
    }

    /// Scenario 4: overnight shift pairs a late punch with next-day exit.
    #[tokio::test]
    async fn overnight_shift_pairs_across_midnight() {
        let store = Arc::new(FakeStore::new());
        store
            .push_shift(Shift {
                date_period: date(2025, 1, 15),
                in_tmp: time(22, 0),
                out_tmp: time(6, 0),
                holiday: false,
            })
            .await;
        let eng = engine(store.clone());

        eng.process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 21, 55)))
            .await
            .unwrap();
        let out = eng
            .process(punch("05233", "10.0.0.1", dt(2025, 1, 16, 6, 10)))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Close);

        let row = store.latest_row_for(&emp("05233")).await.unwrap().unwrap();
        assert_eq!(row.date_stamp, date(2025, 1, 15));
        assert_eq!(row.time_in, Some(dt(2025, 1, 15, 21, 55)));
        assert_eq!(row.time_out, Some(dt(2025, 1, 16, 6, 10)));
    }

    /// Scenario 5: an abandoned prior-day open row is auto-closed before the
    /// new punch opens its own interval.
    #[tokio::test]
    async fn cleanup_closes_abandoned_prior_row_then_opens_new_one() {
        let store = Arc::new(FakeStore::new());
        let eng = engine(store.clone());

        store
            .insert_open(date(2025, 1, 14), &emp("05233"), "10.0.0.1", dt(2025, 1, 14, 8, 0))
            .await
            .unwrap();

        let out = eng
            .process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 8, 5)))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Open);

        let rows = store.all_rows().await;
        assert_eq!(rows.len(), 2);
        let old = rows.iter().find(|r| r.date_stamp == date(2025, 1, 14)).unwrap();
        assert_eq!(old.time_out, Some(dt(2025, 1, 14, 8, 0)));
        assert_eq!(old.ip_out.as_deref(), Some(AUTO_CLEANUP));

        let new = rows.iter().find(|r| r.date_stamp == date(2025, 1, 15)).unwrap();
        assert_eq!(new.time_in, Some(dt(2025, 1, 15, 8, 5)));
    }

    /// §9 open question resolution: a row auto-closed by Step A must never
    /// be re-amended by Step C, even though its fresh AUTO_CLEANUP sentinel
    /// would otherwise make it look AMEND-eligible. The punch that triggered
    /// the cleanup opens its own new interval instead.
    #[tokio::test]
    async fn cleanup_tie_with_amend_never_reamends_the_just_closed_row() {
        let store = Arc::new(FakeStore::new());
        let eng = engine(store.clone());

        store
            .insert_open(date(2025, 1, 14), &emp("05233"), "10.0.0.1", dt(2025, 1, 14, 8, 0))
            .await
            .unwrap();

        // >20h after the abandoned row's reference instant, no shift configured.
        let out = eng
            .process(punch("05233", "10.0.0.2", dt(2025, 1, 15, 9, 0)))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Open, "must open a new row, not amend the just-cleaned one");

        let rows = store.all_rows().await;
        assert_eq!(rows.len(), 2);
        let old = rows.iter().find(|r| r.date_stamp == date(2025, 1, 14)).unwrap();
        assert_eq!(old.ip_out.as_deref(), Some(AUTO_CLEANUP));
        assert_eq!(old.time_out, Some(dt(2025, 1, 14, 8, 0)), "cleanup's synthetic close must survive untouched");

        let new = rows.iter().find(|r| r.date_stamp == date(2025, 1, 15)).unwrap();
        assert_eq!(new.time_in, Some(dt(2025, 1, 15, 9, 0)));
        assert_eq!(new.ip_in.as_deref(), Some("10.0.0.2"));
    }

    /// Scenario 6: a late first punch (past midpoint) opens an out-only row.
    #[tokio::test]
    async fn late_first_punch_opens_out_only_row() {
        let store = Arc::new(FakeStore::new());
        store
            .push_shift(Shift {
                date_period: date(2025, 1, 15),
                in_tmp: time(8, 0),
                out_tmp: time(17, 0),
                holiday: false,
            })
            .await;
        let eng = engine(store.clone());

        let out = eng
            .process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 16, 30)))
            .await
            .unwrap();
        assert_eq!(out, Outcome::OutOnly);

        let row = store.latest_row_for(&emp("05233")).await.unwrap().unwrap();
        assert_eq!(row.date_stamp, date(2025, 1, 15));
        assert_eq!(row.time_in, None);
        assert_eq!(row.time_out, Some(dt(2025, 1, 15, 16, 30)));
        assert_eq!(row.ip_out.as_deref(), Some("10.0.0.1"));
    }

    /// P6: a holiday row with a midnight start never routes AMEND/CLOSE; the
    /// punch follows the no-shift fallback path instead.
    #[tokio::test]
    async fn holiday_midnight_shift_is_bypassed() {
        let store = Arc::new(FakeStore::new());
        store
            .push_shift(Shift {
                date_period: date(2025, 1, 15),
                in_tmp: time(0, 0),
                out_tmp: time(0, 0),
                holiday: true,
            })
            .await;
        let eng = engine(store.clone());

        let out = eng
            .process(punch("05233", "10.0.0.1", dt(2025, 1, 15, 9, 0)))
            .await
            .unwrap();
        assert_eq!(out, Outcome::Open);
        let row = store.latest_row_for(&emp("05233")).await.unwrap().unwrap();
        // Fallback date_stamp is the punch's own date, not the bypassed shift's.
        assert_eq!(row.date_stamp, date(2025, 1, 15));
    }

    /// P4: consecutive AMENDs are monotone-nondecreasing in TimeOut.
    #[tokio::test]
    async fn consecutive_amends_are_monotone() {
        let store = Arc::new(FakeStore::new());
        let eng = engine(store.clone());

        eng.process(punch("05233", "ip", dt(2025, 1, 15, 8, 0)))
            .await
            .unwrap();
        eng.process(punch("05233", "ip", dt(2025, 1, 15, 17, 0)))
            .await
            .unwrap();
        eng.process(punch("05233", "ip", dt(2025, 1, 15, 17, 20)))
            .await
            .unwrap();
        eng.process(punch("05233", "ip", dt(2025, 1, 15, 17, 40)))
            .await
            .unwrap();

        let row = store.latest_row_for(&emp("05233")).await.unwrap().unwrap();
        assert_eq!(row.time_out, Some(dt(2025, 1, 15, 17, 40)));
    }

    /// P3: replaying the just-processed punch is idempotent (discard, not a
    /// second row).
    #[tokio::test]
    async fn replaying_the_same_punch_is_idempotent() {
        let store = Arc::new(FakeStore::new());
        let eng = engine(store.clone());
        let p = punch("05233", "ip", dt(2025, 1, 15, 8, 0));

        eng.process(p.clone()).await.unwrap();
        let before = store.all_rows().await;
        eng.process(p).await.unwrap();
        let after = store.all_rows().await;
        assert_eq!(before, after);
    }

    /// Degenerate no-plan path collapses to the simpler open/close/amend
    /// semantics of the original no-shift listener variant.
    #[tokio::test]
    async fn empty_plan_reproduces_degenerate_open_close_semantics() {
        let store = Arc::new(FakeStore::new());
        let eng = engine(store.clone());

        let opened = eng
            .process(punch("05233", "ip", dt(2025, 1, 15, 8, 0)))
            .await
            .unwrap();
        assert_eq!(opened, Outcome::Open);
        let closed = eng
            .process(punch("05233", "ip", dt(2025, 1, 15, 12, 0)))
            .await
            .unwrap();
        assert_eq!(closed, Outcome::Close);
    }
}
