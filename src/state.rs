//! The application state shared by every screen.
//!
//! [`AppState`] owns the store, the current [`Snapshot`] of it and everything derived from
//! that snapshot. Mutators run their saga, post a [`Notice`], reload the snapshot from the
//! store whatever the outcome, and tell every subscriber that the state changed.

use crate::{
    config::Config,
    decode::Snapshot,
    ledger::{AttendanceEffect, AttendanceMark, Confirmation, Ledger, Purchase, Refund, Release},
    model::{
        grade_for, Attendance, AttendanceStatus, Expense, FinancialTransaction, Group, GroupId,
        NewStudent, NewTransaction, RefundTarget, ScheduleEvent, ScheduleEventException,
        Student, StudentId, SubscriptionPlan,
    },
    notify::{Mailer, Notice, PaymentReminder},
    occurrence::OccurrenceKey,
    records::Records,
    recurrence::{expand, VisibleEvent},
    report::{self, DashboardSummary, HistoryEntry, Period, PeriodReport, StudentStanding},
    saga::SagaError,
    store::{EntityStore, StoreError},
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error};
use rust_decimal::Decimal;
use std::mem;
use thiserror::Error;

/// Sent to subscribers whenever the state they can read has changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// The snapshot was reloaded from the store.
    Reloaded,
    /// One attendance mark was updated in place, ahead of a reload.
    AttendancePatched {
        student_id: StudentId,
        date: NaiveDate,
    },
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Saga(#[from] SagaError),
    #[error("could not load the store: {0}")]
    Load(#[from] StoreError),
}

// Whether an operation found something to act on. Not-found outcomes get no success notice.
trait Applied {
    fn applied(&self) -> bool {
        true
    }
}

impl Applied for () {}
impl Applied for Student {}
impl Applied for Vec<Student> {}
impl Applied for Group {}
impl Applied for SubscriptionPlan {}
impl Applied for ScheduleEvent {}
impl Applied for Expense {}

impl Applied for bool {
    fn applied(&self) -> bool {
        *self
    }
}

impl Applied for usize {
    fn applied(&self) -> bool {
        *self > 0
    }
}

impl<T> Applied for Option<T> {
    fn applied(&self) -> bool {
        self.is_some()
    }
}

pub struct AppState<S: EntityStore, M: Mailer> {
    store: S,
    config: Config,
    mailer: M,
    snapshot: Snapshot,
    visible: Option<Vec<VisibleEvent>>,
    notices: Vec<Notice>,
    subscribers: Vec<Sender<StateChange>>,
    clock: Option<NaiveDateTime>,
}

impl<S: EntityStore, M: Mailer> AppState<S, M> {
    /// Load the store and wrap it.
    pub fn new(store: S, config: Config, mailer: M) -> Result<Self, StateError> {
        let snapshot = Snapshot::load(&store, &config)?;

        Ok(AppState {
            store,
            config,
            mailer,
            snapshot,
            visible: None,
            notices: Vec::new(),
            subscribers: Vec::new(),
            clock: None,
        })
    }

    /// Pin "now" to a fixed moment instead of the system clock.
    pub fn with_clock(mut self, now: NaiveDateTime) -> Self {
        self.clock = Some(now);
        self
    }

    /// The current local wall-clock time.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.unwrap_or_else(|| {
            Utc::now()
                .with_timezone(&self.config.local_offset())
                .naive_local()
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// A channel that receives every later [`StateChange`].
    pub fn subscribe(&mut self) -> Receiver<StateChange> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Drain the notices posted since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        mem::take(&mut self.notices)
    }

    fn broadcast(&mut self, change: StateChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Replace the snapshot with a fresh read of the store.
    pub fn reload(&mut self) -> Result<(), StateError> {
        self.snapshot = Snapshot::load(&self.store, &self.config)?;
        self.visible = None;
        self.broadcast(StateChange::Reloaded);
        Ok(())
    }

    fn apply<T, F>(&mut self, done: &str, failed: &str, op: F) -> Result<T, StateError>
    where
        T: Applied,
        F: FnOnce(&mut S, &Snapshot, &Config, &M) -> Result<T, SagaError>,
    {
        let outcome = op(&mut self.store, &self.snapshot, &self.config, &self.mailer);

        match outcome {
            Ok(ref value) if value.applied() => self.notices.push(Notice::success(done)),
            Ok(_) => debug!("{}: nothing to do", done),
            Err(ref e) => self.notices.push(Notice::error(failed, e)),
        }

        if let Err(e) = self.reload() {
            error!("reload after '{}' failed: {}", done, e);
            self.notices.push(Notice::error("Could not refresh data", &e));
            if outcome.is_ok() {
                return Err(e);
            }
        }

        outcome.map_err(StateError::from)
    }

    fn ledger_op<T, F>(&mut self, done: &str, failed: &str, op: F) -> Result<T, StateError>
    where
        T: Applied,
        F: FnOnce(&mut Ledger<'_, S>, NaiveDateTime) -> Result<T, SagaError>,
    {
        let now = self.now();
        self.apply(done, failed, |store, snapshot, config, _| {
            op(&mut Ledger::new(store, snapshot, config), now)
        })
    }

    fn records_op<T, F>(&mut self, done: &str, failed: &str, op: F) -> Result<T, StateError>
    where
        T: Applied,
        F: FnOnce(&mut Records<'_, S, M>) -> Result<T, SagaError>,
    {
        self.apply(done, failed, |store, snapshot, _, mailer| {
            op(&mut Records::new(store, snapshot, mailer))
        })
    }

    /// Every event instance the calendar shows, computed once per snapshot.
    pub fn visible_events(&mut self) -> &[VisibleEvent] {
        let snapshot = &self.snapshot;
        let horizon = self.config.recurrence_horizon_weeks;
        self.visible
            .get_or_insert_with(|| expand(&snapshot.events, &snapshot.exceptions, horizon))
    }

    pub fn set_attendance(
        &mut self,
        mark: AttendanceMark,
    ) -> Result<Option<AttendanceEffect>, StateError> {
        let now = self.now();
        let outcome = Ledger::new(&mut self.store, &self.snapshot, &self.config)
            .set_attendance(mark.clone(), now);

        match outcome {
            Ok(Some(_)) => {
                self.patch_attendance(&mark);
                self.notices.push(Notice::success("Attendance saved."));
            }
            Ok(None) => debug!("attendance for unknown student {}", mark.student_id),
            Err(ref e) => self
                .notices
                .push(Notice::error("Could not save attendance", e)),
        }

        if let Err(e) = self.reload() {
            error!("reload after attendance change failed: {}", e);
            self.notices.push(Notice::error("Could not refresh data", &e));
            if outcome.is_ok() {
                return Err(e);
            }
        }

        outcome.map_err(StateError::from)
    }

    // Reflect a saved mark in the snapshot straight away. The reload that follows replaces it.
    fn patch_attendance(&mut self, mark: &AttendanceMark) {
        let attendance = &mut self.snapshot.attendance;
        let existing = attendance
            .iter()
            .position(|a| a.student_id == mark.student_id && a.date == mark.date);

        match (existing, mark.status) {
            (Some(i), Some(status)) => {
                attendance[i].status = status;
                attendance[i].grade = grade_for(status, mark.grade).ok().flatten();
            }
            (Some(i), None) => {
                attendance.remove(i);
            }
            (None, Some(status)) => attendance.push(Attendance {
                student_id: mark.student_id.clone(),
                date: mark.date,
                status,
                grade: grade_for(status, mark.grade).ok().flatten(),
                subscription_id: None,
                debt_transaction_id: None,
                stored_date: None,
            }),
            (None, None) => return,
        }

        self.broadcast(StateChange::AttendancePatched {
            student_id: mark.student_id.clone(),
            date: mark.date,
        });
    }

    /// Move a journal cell one step along none, present, absent, excused.
    pub fn cycle_attendance(
        &mut self,
        student_id: &str,
        date: NaiveDate,
        group_id: Option<GroupId>,
    ) -> Result<Option<AttendanceEffect>, StateError> {
        let current = self
            .snapshot
            .attendance_on(student_id, date)
            .map(|a| a.status);

        let mut mark = AttendanceMark::new(
            student_id,
            date,
            AttendanceStatus::next_in_cycle(current),
        );
        mark.group_id = group_id;
        self.set_attendance(mark)
    }

    pub fn delete_attendance(
        &mut self,
        student_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Release>, StateError> {
        self.ledger_op(
            "Attendance removed.",
            "Could not remove attendance",
            |ledger, now| ledger.delete_attendance(student_id, date, now),
        )
    }

    pub fn add_subscription(
        &mut self,
        student_id: &str,
        plan_id: &str,
        price_paid: Decimal,
        lessons_total: u32,
        assigned_group_id: Option<GroupId>,
    ) -> Result<Option<Purchase>, StateError> {
        let purchase = self.ledger_op(
            "Subscription added.",
            "Could not add the subscription",
            |ledger, now| {
                ledger.add_subscription(
                    student_id,
                    plan_id,
                    price_paid,
                    lessons_total,
                    assigned_group_id,
                    now,
                )
            },
        )?;

        if let Some(cleared) = purchase
            .as_ref()
            .map(|p| p.cleared_debt_lessons)
            .filter(|n| *n > 0)
        {
            self.notices.push(Notice::success(format!(
                "{} debt lesson(s) covered by the new subscription.",
                cleared
            )));
        }

        Ok(purchase)
    }

    pub fn cancel_subscription(
        &mut self,
        subscription_id: &str,
        target: RefundTarget,
    ) -> Result<Option<Refund>, StateError> {
        let done = match target {
            RefundTarget::Balance => "Subscription cancelled, refund added to the balance.",
            RefundTarget::Cash => "Subscription cancelled, refund paid in cash.",
        };
        self.ledger_op(done, "Could not cancel the subscription", |ledger, now| {
            ledger.cancel_subscription(subscription_id, target, now)
        })
    }

    pub fn update_subscription_group(
        &mut self,
        subscription_id: &str,
        group_id: Option<&str>,
    ) -> Result<bool, StateError> {
        self.records_op(
            "Subscription group updated.",
            "Could not update the subscription",
            |records| records.update_subscription_group(subscription_id, group_id),
        )
    }

    pub fn add_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> Result<Option<FinancialTransaction>, StateError> {
        self.ledger_op(
            "Transaction recorded.",
            "Could not record the transaction",
            |ledger, now| ledger.record_transaction(transaction, now),
        )
    }

    pub fn clear_all_financial_data(
        &mut self,
        confirmation: Confirmation,
    ) -> Result<(), StateError> {
        self.ledger_op(
            "All financial data cleared.",
            "Could not clear financial data",
            |ledger, _| ledger.clear_all_financial_data(confirmation),
        )
    }

    pub fn add_student(&mut self, student: &NewStudent) -> Result<Student, StateError> {
        self.records_op("Student added.", "Could not add the student", |records| {
            records.add_student(student)
        })
    }

    pub fn add_students(&mut self, students: &[NewStudent]) -> Result<Vec<Student>, StateError> {
        self.records_op("Students added.", "Could not add the students", |records| {
            records.add_students(students)
        })
    }

    pub fn update_student(&mut self, student: &Student) -> Result<bool, StateError> {
        self.records_op("Student saved.", "Could not save the student", |records| {
            records.update_student(student)
        })
    }

    pub fn archive_student(&mut self, id: &str) -> Result<bool, StateError> {
        let now = self.now();
        self.records_op("Student archived.", "Could not archive the student", |records| {
            records.archive_student(id, now)
        })
    }

    pub fn restore_student(&mut self, id: &str) -> Result<bool, StateError> {
        self.records_op("Student restored.", "Could not restore the student", |records| {
            records.restore_student(id)
        })
    }

    pub fn delete_students(&mut self, ids: &[&str]) -> Result<usize, StateError> {
        self.records_op("Students deleted.", "Could not delete the students", |records| {
            records.delete_students(ids)
        })
    }

    pub fn add_group(&mut self, name: &str) -> Result<Group, StateError> {
        self.records_op("Group added.", "Could not add the group", |records| {
            records.add_group(name)
        })
    }

    pub fn rename_group(&mut self, id: &str, name: &str) -> Result<bool, StateError> {
        self.records_op("Group renamed.", "Could not rename the group", |records| {
            records.rename_group(id, name)
        })
    }

    pub fn delete_group(&mut self, id: &str) -> Result<bool, StateError> {
        self.records_op("Group deleted.", "Could not delete the group", |records| {
            records.delete_group(id)
        })
    }

    pub fn add_plan(&mut self, plan: &SubscriptionPlan) -> Result<SubscriptionPlan, StateError> {
        self.records_op("Plan added.", "Could not add the plan", |records| {
            records.add_plan(plan)
        })
    }

    pub fn update_plan(&mut self, plan: &SubscriptionPlan) -> Result<bool, StateError> {
        self.records_op("Plan saved.", "Could not save the plan", |records| {
            records.update_plan(plan)
        })
    }

    pub fn delete_plan(&mut self, id: &str) -> Result<bool, StateError> {
        self.records_op("Plan deleted.", "Could not delete the plan", |records| {
            records.delete_plan(id)
        })
    }

    pub fn set_default_plan(&mut self, id: &str) -> Result<bool, StateError> {
        self.records_op(
            "Default plan set.",
            "Could not set the default plan",
            |records| records.set_default_plan(id),
        )
    }

    pub fn add_event(&mut self, event: &ScheduleEvent) -> Result<ScheduleEvent, StateError> {
        self.records_op("Lesson added to the schedule.", "Could not add the lesson", |records| {
            records.add_event(event)
        })
    }

    pub fn update_event(&mut self, event: &ScheduleEvent) -> Result<bool, StateError> {
        self.records_op("Series updated.", "Could not update the series", |records| {
            records.update_event(event)
        })
    }

    pub fn delete_event(&mut self, id: &str) -> Result<bool, StateError> {
        self.records_op("Series deleted.", "Could not delete the series", |records| {
            records.delete_event(id)
        })
    }

    pub fn edit_occurrence(
        &mut self,
        event_id: &str,
        occurrence: &OccurrenceKey,
        title: &str,
        group_id: Option<GroupId>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<ScheduleEventException>, StateError> {
        self.records_op(
            "Only this lesson was changed.",
            "Could not change the lesson",
            |records| records.edit_occurrence(event_id, occurrence, title, group_id, start, end),
        )
    }

    pub fn delete_occurrence(
        &mut self,
        event_id: &str,
        occurrence: &OccurrenceKey,
    ) -> Result<bool, StateError> {
        self.records_op(
            "Only this lesson was deleted.",
            "Could not delete the lesson",
            |records| records.delete_occurrence(event_id, occurrence),
        )
    }

    /// Record an expense, dated now unless `date` says otherwise.
    pub fn add_expense(
        &mut self,
        description: &str,
        amount: Decimal,
        date: Option<NaiveDateTime>,
    ) -> Result<Expense, StateError> {
        let date = date.unwrap_or_else(|| self.now());
        self.records_op("Expense added.", "Could not add the expense", |records| {
            let expense = Expense::new(date, description, amount)?;
            records.add_expense(&expense)
        })
    }

    pub fn update_expense(&mut self, expense: &Expense) -> Result<bool, StateError> {
        self.records_op("Expense saved.", "Could not save the expense", |records| {
            records.update_expense(expense)
        })
    }

    pub fn delete_expense(&mut self, id: &str) -> Result<bool, StateError> {
        self.records_op("Expense deleted.", "Could not delete the expense", |records| {
            records.delete_expense(id)
        })
    }

    /// E-mail a student's parents about a payment. Returns `false` for an unknown student.
    pub fn send_payment_reminder(&mut self, student_id: &str, reminder: &PaymentReminder) -> bool {
        match self.snapshot.student(student_id) {
            Some(student) => {
                self.mailer.payment_reminder(student, reminder);
                self.notices.push(Notice::success("Payment reminder sent."));
                true
            }
            None => false,
        }
    }

    pub fn period_report(&self, period: Period) -> PeriodReport {
        report::period_report(&self.snapshot, period, self.now())
    }

    pub fn balance_history(&self, student_id: &str) -> Vec<HistoryEntry> {
        report::balance_history(&self.snapshot, student_id)
    }

    pub fn student_standing(&self, student_id: &str) -> Option<StudentStanding> {
        report::student_standing(&self.snapshot, student_id)
    }

    pub fn dashboard(&mut self) -> DashboardSummary {
        let now = self.now();
        let limit = self.config.upcoming_events_limit;
        self.visible_events();

        let visible = self.visible.as_deref().unwrap_or(&[]);
        report::dashboard(&self.snapshot, visible, now, limit)
    }
}
