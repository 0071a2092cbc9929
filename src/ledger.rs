//! The attendance-driven ledger.
//!
//! Every operation here is a short saga: a fixed sequence of single-entity store writes
//! computed from one [`Snapshot`]. A failed write stops the saga and is reported with the
//! step that failed; earlier writes are not rolled back. The caller reloads the snapshot
//! after every operation, successful or not.

use crate::{
    config::Config,
    decode::Snapshot,
    model::{
        grade_for, Attendance, AttendanceStatus, FinancialTransaction, GroupId,
        NewTransaction, PlanId, RefundTarget, StudentId, StudentSubscription, SubscriptionId,
        TransactionId, TransactionKind, ValidationError,
    },
    saga::{step, SagaError},
    store::{matched, patch, row_id, to_row, to_value, EntityStore, Filter, Table},
};
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde_json::{json, Value};

/// A change to one journal cell
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceMark {
    pub student_id: StudentId,
    pub date: NaiveDate,
    /// `None` removes the mark altogether.
    pub status: Option<AttendanceStatus>,
    pub grade: Option<u8>,
    /// The group whose lesson this is. Without one, only unassigned credit can be used.
    pub group_id: Option<GroupId>,
}

impl AttendanceMark {
    pub fn new<S: Into<StudentId>>(
        student_id: S,
        date: NaiveDate,
        status: Option<AttendanceStatus>,
    ) -> Self {
        AttendanceMark {
            student_id: student_id.into(),
            date,
            status,
            grade: None,
            group_id: None,
        }
    }

    pub fn with_grade(mut self, grade: u8) -> Self {
        self.grade = Some(grade);
        self
    }

    pub fn in_group<S: Into<GroupId>>(mut self, group_id: S) -> Self {
        self.group_id = Some(group_id.into());
        self
    }
}

/// What undoing a visit gave back
#[derive(Debug, Clone, PartialEq)]
pub enum Release {
    /// One lesson went back onto this subscription.
    Credit { subscription_id: SubscriptionId },
    /// The debit that billed the lesson was reversed by this correction.
    Debt { correction_id: TransactionId },
    /// The visit had consumed nothing that could still be returned.
    Nothing,
}

/// The credit consequence of an attendance change
#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceEffect {
    /// A lesson was taken from this subscription.
    Consumed { subscription_id: SubscriptionId },
    /// No credit was available. The lesson was billed by `debit_id` unless the default
    /// lesson price is zero.
    Debt { debit_id: Option<TransactionId> },
    Released(Release),
    Unchanged,
}

/// The outcome of a purchase
#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub subscription: StudentSubscription,
    pub payment_id: TransactionId,
    /// Earlier debt lessons now paid for by this subscription
    pub cleared_debt_lessons: u32,
    pub correction_id: Option<TransactionId>,
}

/// The outcome of a cancellation
#[derive(Debug, Clone, PartialEq)]
pub struct Refund {
    pub subscription_id: SubscriptionId,
    pub student_id: StudentId,
    pub amount: Decimal,
    pub target: RefundTarget,
    /// `None` when nothing was left to refund.
    pub transaction_id: Option<TransactionId>,
}

/// Proof that the caller asked for a destructive reset on purpose.
#[derive(Debug)]
pub struct Confirmation(());

impl Confirmation {
    pub fn confirmed() -> Self {
        Confirmation(())
    }
}

// Matches the stored row of `attendance`, whatever layout its date was saved in.
fn attendance_filter(attendance: &Attendance) -> Filter {
    Filter::eq("student_id", attendance.student_id.as_str()).and("date", attendance.date_key())
}

/// Applies ledger operations to a store, reading current state from a snapshot of it.
pub struct Ledger<'a, S: EntityStore> {
    store: &'a mut S,
    snapshot: &'a Snapshot,
    config: &'a Config,
}

impl<'a, S: EntityStore> Ledger<'a, S> {
    pub fn new(store: &'a mut S, snapshot: &'a Snapshot, config: &'a Config) -> Self {
        Ledger {
            store,
            snapshot,
            config,
        }
    }

    /// Set a student's mark for a date, moving credit as the transition requires.
    ///
    /// Returns `Ok(None)` when the student no longer exists.
    pub fn set_attendance(
        &mut self,
        mark: AttendanceMark,
        now: NaiveDateTime,
    ) -> Result<Option<AttendanceEffect>, SagaError> {
        let snapshot = self.snapshot;
        let student = match snapshot.student(&mark.student_id) {
            Some(student) => student,
            None => {
                debug!("attendance for unknown student {}", mark.student_id);
                return Ok(None);
            }
        };

        let status = match mark.status {
            Some(status) => status,
            None => {
                let release = self.delete_attendance(&mark.student_id, mark.date, now)?;
                return Ok(Some(
                    release.map_or(AttendanceEffect::Unchanged, AttendanceEffect::Released),
                ));
            }
        };

        student.ensure_active()?;
        let grade = grade_for(status, mark.grade)?;

        let existing = snapshot.attendance_on(&student.id, mark.date);
        let was_visit = existing.map_or(false, Attendance::is_visit);

        let mut record = Attendance {
            student_id: student.id.clone(),
            date: mark.date,
            status,
            grade,
            subscription_id: None,
            debt_transaction_id: None,
            stored_date: None,
        };

        let effect = match (was_visit, status.is_visit()) {
            (false, true) => self.charge_visit(&mut record, mark.group_id.as_deref(), now)?,
            (true, false) => match existing {
                Some(existing) => AttendanceEffect::Released(self.release(existing, now)?),
                None => AttendanceEffect::Unchanged,
            },
            (true, true) => {
                if let Some(existing) = existing {
                    record.subscription_id = existing.subscription_id.clone();
                    record.debt_transaction_id = existing.debt_transaction_id.clone();
                }
                AttendanceEffect::Unchanged
            }
            (false, false) => AttendanceEffect::Unchanged,
        };

        // An existing row is rewritten in place, which also brings its date to canonical form.
        let written = to_row(&record).and_then(|row| match existing {
            Some(existing) => matched(
                Table::Attendance,
                self.store
                    .update(Table::Attendance, &attendance_filter(existing), row),
            )
            .map(|_| ()),
            None => self
                .store
                .upsert(Table::Attendance, row, &["student_id", "date"])
                .map(|_| ()),
        });
        step("write attendance", written)?;
        debug!(
            "{} on {}: {:?} -> {:?}",
            record.student_id,
            record.date,
            existing.map(|a| a.status),
            effect
        );

        Ok(Some(effect))
    }

    /// Remove a student's mark for a date, first giving back whatever the visit consumed.
    ///
    /// Returns `Ok(None)` when there was no mark.
    pub fn delete_attendance(
        &mut self,
        student_id: &str,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<Option<Release>, SagaError> {
        let snapshot = self.snapshot;
        let existing = match snapshot.attendance_on(student_id, date) {
            Some(existing) => existing,
            None => return Ok(None),
        };

        let release = if existing.is_visit() {
            self.release(existing, now)?
        } else {
            Release::Nothing
        };

        step(
            "delete attendance",
            matched(
                Table::Attendance,
                self.store
                    .delete(Table::Attendance, &attendance_filter(existing)),
            ),
        )?;

        Ok(Some(release))
    }

    /// Sell a subscription to a student.
    ///
    /// The payment is always recorded. Any debt lessons the student has are then covered by
    /// the new credit, oldest first, and the debits that billed them are corrected.
    pub fn add_subscription(
        &mut self,
        student_id: &str,
        plan_id: &str,
        price_paid: Decimal,
        lessons_total: u32,
        assigned_group_id: Option<GroupId>,
        now: NaiveDateTime,
    ) -> Result<Option<Purchase>, SagaError> {
        let snapshot = self.snapshot;
        let student = match snapshot.student(student_id) {
            Some(student) => student,
            None => return Ok(None),
        };
        if snapshot.plan(plan_id).is_none() {
            warn!("purchase of unknown plan {}", plan_id);
            return Ok(None);
        }

        student.ensure_active()?;
        if price_paid < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount("price paid", price_paid).into());
        }
        if lessons_total == 0 {
            return Err(ValidationError::NoLessons.into());
        }

        let mut subscription = StudentSubscription {
            id: String::new(),
            student_id: student.id.clone(),
            plan_id: PlanId::from(plan_id),
            purchase_date: now,
            price_paid,
            lessons_total,
            lessons_attended: 0,
            assigned_group_id,
        };
        let row = step(
            "create subscription",
            to_row(&subscription)
                .and_then(|row| self.store.insert(Table::StudentSubscriptions, row)),
        )?;
        subscription.id = step(
            "create subscription",
            row_id(Table::StudentSubscriptions, &row),
        )?;

        let payment = self.record(
            "record payment",
            NewTransaction::new(
                student.id.as_str(),
                TransactionKind::Payment,
                price_paid,
                "Subscription payment",
            )
            .for_subscription(subscription.id.as_str()),
            now,
        )?;

        let debts: Vec<&Attendance> = snapshot
            .debt_lessons(&student.id)
            .take(lessons_total as usize)
            .collect();
        let cleared = debts.len() as u32;
        let mut correction_id = None;

        if cleared > 0 {
            let mut owed = Decimal::ZERO;
            for debt in debts.iter() {
                step(
                    "link debt lesson",
                    self.store.update(
                        Table::Attendance,
                        &attendance_filter(debt),
                        patch(vec![
                            ("student_subscription_id", json!(subscription.id)),
                            ("debt_transaction_id", Value::Null),
                        ]),
                    ),
                )?;
                owed += self.debit_amount(debt);
            }

            step(
                "count debt lessons",
                self.store.update(
                    Table::StudentSubscriptions,
                    &Filter::eq("id", subscription.id.as_str()),
                    patch(vec![("lessons_attended", json!(cleared))]),
                ),
            )?;
            subscription.lessons_attended = cleared;

            if owed > Decimal::ZERO {
                let correction = self.record_credit_change(
                    "record debt correction",
                    NewTransaction::new(
                        student.id.as_str(),
                        TransactionKind::Correction,
                        owed,
                        format!("Debt lessons covered by subscription ({})", cleared),
                    )
                    .for_subscription(subscription.id.as_str()),
                    now,
                )?;
                correction_id = Some(correction.id);
            }
            info!(
                "subscription {} covered {} debt lesson(s) of {}",
                subscription.id, cleared, student.id
            );
        }

        Ok(Some(Purchase {
            subscription,
            payment_id: payment.id,
            cleared_debt_lessons: cleared,
            correction_id,
        }))
    }

    /// Cancel a subscription and refund its unused lessons, pro rata.
    ///
    /// A refund to `Balance` becomes stored credit; a `Cash` refund is only booked. Returns
    /// `Ok(None)` when the subscription no longer exists.
    pub fn cancel_subscription(
        &mut self,
        subscription_id: &str,
        target: RefundTarget,
        now: NaiveDateTime,
    ) -> Result<Option<Refund>, SagaError> {
        let snapshot = self.snapshot;
        let subscription = match snapshot.subscription(subscription_id) {
            Some(subscription) => subscription,
            None => return Ok(None),
        };

        let amount = subscription.refund_amount();
        let mut transaction_id = None;

        if amount > Decimal::ZERO {
            let refund = self.record_credit_change(
                "record refund",
                NewTransaction::new(
                    subscription.student_id.as_str(),
                    TransactionKind::Refund,
                    amount,
                    target.describe(&subscription.id),
                )
                .for_subscription(subscription.id.as_str())
                .refunded_to(target),
                now,
            )?;
            transaction_id = Some(refund.id);
        }

        step(
            "delete subscription",
            self.store.delete(
                Table::StudentSubscriptions,
                &Filter::eq("id", subscription.id.as_str()),
            ),
        )?;
        info!(
            "cancelled subscription {} with {} refunded ({:?})",
            subscription.id, amount, target
        );

        Ok(Some(Refund {
            subscription_id: subscription.id.clone(),
            student_id: subscription.student_id.clone(),
            amount,
            target,
            transaction_id,
        }))
    }

    /// Delete every transaction, subscription and attendance mark, and zero every balance.
    /// Students, groups, plans, the schedule and expenses are kept.
    pub fn clear_all_financial_data(&mut self, _: Confirmation) -> Result<(), SagaError> {
        warn!("clearing all financial data");

        step(
            "delete transactions",
            self.store.delete(Table::FinancialTransactions, &Filter::all()),
        )?;
        step(
            "delete subscriptions",
            self.store.delete(Table::StudentSubscriptions, &Filter::all()),
        )?;
        step(
            "delete attendance",
            self.store.delete(Table::Attendance, &Filter::all()),
        )?;
        step(
            "reset balances",
            to_value(&Decimal::ZERO).and_then(|zero| {
                self.store
                    .update(Table::Students, &Filter::all(), patch(vec![("balance", zero)]))
            }),
        )?;

        Ok(())
    }

    /// Record a transaction entered by hand, moving the student's credit if its kind does.
    pub fn record_transaction(
        &mut self,
        transaction: NewTransaction,
        now: NaiveDateTime,
    ) -> Result<Option<FinancialTransaction>, SagaError> {
        if self.snapshot.student(&transaction.student_id).is_none() {
            return Ok(None);
        }
        self.record_credit_change("record transaction", transaction, now)
            .map(Some)
    }

    /// The subscription a new visit should consume: one assigned to the lesson's group first,
    /// then one valid for any group, oldest purchase first within each.
    fn usable_subscription(
        &self,
        student_id: &str,
        group_id: Option<&str>,
    ) -> Option<&'a StudentSubscription> {
        let snapshot = self.snapshot;
        let with_credit = move || {
            snapshot
                .subscriptions
                .iter()
                .filter(move |s| s.student_id == student_id && s.has_credit())
        };

        group_id
            .and_then(|group_id| {
                with_credit().find(|s| s.assigned_group_id.as_deref() == Some(group_id))
            })
            .or_else(|| with_credit().find(|s| s.assigned_group_id.is_none()))
    }

    fn charge_visit(
        &mut self,
        record: &mut Attendance,
        group_id: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<AttendanceEffect, SagaError> {
        if let Some(subscription) = self.usable_subscription(&record.student_id, group_id) {
            step(
                "consume lesson credit",
                self.store.update(
                    Table::StudentSubscriptions,
                    &Filter::eq("id", subscription.id.as_str()),
                    patch(vec![(
                        "lessons_attended",
                        json!(subscription.lessons_attended + 1),
                    )]),
                ),
            )?;
            record.subscription_id = Some(subscription.id.clone());

            return Ok(AttendanceEffect::Consumed {
                subscription_id: subscription.id.clone(),
            });
        }

        let price = self.config.default_lesson_price;
        if price <= Decimal::ZERO {
            return Ok(AttendanceEffect::Debt { debit_id: None });
        }

        let debit = self.record_credit_change(
            "record debit",
            NewTransaction::new(
                record.student_id.as_str(),
                TransactionKind::Debit,
                price,
                format!("Lesson on {} without a subscription", record.date),
            ),
            now,
        )?;
        record.debt_transaction_id = Some(debit.id.clone());

        Ok(AttendanceEffect::Debt {
            debit_id: Some(debit.id),
        })
    }

    /// Give back what a visit consumed.
    fn release(&mut self, visit: &Attendance, now: NaiveDateTime) -> Result<Release, SagaError> {
        let snapshot = self.snapshot;
        if let Some(ref subscription_id) = visit.subscription_id {
            let subscription = match snapshot.subscription(subscription_id) {
                Some(subscription) => subscription,
                None => {
                    warn!(
                        "visit of {} on {} used subscription {} which no longer exists",
                        visit.student_id, visit.date, subscription_id
                    );
                    return Ok(Release::Nothing);
                }
            };

            step(
                "release lesson credit",
                self.store.update(
                    Table::StudentSubscriptions,
                    &Filter::eq("id", subscription.id.as_str()),
                    patch(vec![(
                        "lessons_attended",
                        json!(subscription.lessons_attended.saturating_sub(1)),
                    )]),
                ),
            )?;

            return Ok(Release::Credit {
                subscription_id: subscription.id.clone(),
            });
        }

        let debit = match visit
            .debt_transaction_id
            .as_deref()
            .and_then(|id| snapshot.transaction(id))
        {
            Some(debit) => debit,
            None => return Ok(Release::Nothing),
        };

        let correction = self.record_credit_change(
            "record debt reversal",
            NewTransaction::new(
                visit.student_id.as_str(),
                TransactionKind::Correction,
                debit.amount,
                format!("Reversal of lesson debit on {}", visit.date),
            ),
            now,
        )?;

        Ok(Release::Debt {
            correction_id: correction.id,
        })
    }

    /// What was billed for a debt lesson. Lessons without a linked debit fall back to the
    /// default lesson price.
    fn debit_amount(&self, debt: &Attendance) -> Decimal {
        debt.debt_transaction_id
            .as_deref()
            .and_then(|id| self.snapshot.transaction(id))
            .map(|debit| debit.amount)
            .unwrap_or(self.config.default_lesson_price)
    }

    fn record(
        &mut self,
        name: &'static str,
        transaction: NewTransaction,
        now: NaiveDateTime,
    ) -> Result<FinancialTransaction, SagaError> {
        let mut transaction = transaction.build(now)?;
        let row = step(
            name,
            to_row(&transaction)
                .and_then(|row| self.store.insert(Table::FinancialTransactions, row)),
        )?;
        transaction.id = step(name, row_id(Table::FinancialTransactions, &row))?;

        Ok(transaction)
    }

    /// Record a transaction and, when it moves stored credit, the student's new balance.
    fn record_credit_change(
        &mut self,
        name: &'static str,
        transaction: NewTransaction,
        now: NaiveDateTime,
    ) -> Result<FinancialTransaction, SagaError> {
        let transaction = self.record(name, transaction, now)?;

        let delta = transaction.credit_effect();
        if delta != Decimal::ZERO {
            let snapshot = self.snapshot;
            match snapshot.student(&transaction.student_id) {
                Some(student) => {
                    let balance = student.balance + delta;
                    step(
                        "update balance",
                        to_value(&balance).and_then(|balance| {
                            self.store.update(
                                Table::Students,
                                &Filter::eq("id", student.id.as_str()),
                                patch(vec![("balance", balance)]),
                            )
                        }),
                    )?;
                }
                None => warn!(
                    "transaction {} moved credit of unknown student {}",
                    transaction.id, transaction.student_id
                ),
            }
        }

        Ok(transaction)
    }
}
