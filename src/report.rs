//! Read-only rollups over a [`Snapshot`].
//!
//! Nothing here writes to the store. Every function takes the instant it should treat as
//! "now" so results are reproducible.

use crate::{
    decode::Snapshot,
    model::{
        Attendance, Expense, FinancialTransaction, StudentId, StudentSubscription,
        SubscriptionId, TransactionKind,
    },
    recurrence::VisibleEvent,
    CURRENCY_PRECISION,
};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, trace};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;

/// The reporting window, anchored to the current instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Month,
    Year,
    AllTime,
}

/// Inclusive bounds of `period` around `now`.
///
/// A month runs from the first at midnight to the last nanosecond of its final day; a year
/// likewise from 1 January to 31 December. All time covers the whole calendar.
pub fn period_bounds(period: Period, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let today = now.date();

    let (first, next) = match period {
        Period::AllTime => return (NaiveDateTime::MIN, NaiveDateTime::MAX),
        Period::Month => {
            let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1);
            let next = if today.month() == 12 {
                NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
            };
            (first, next)
        }
        Period::Year => (
            NaiveDate::from_ymd_opt(today.year(), 1, 1),
            NaiveDate::from_ymd_opt(today.year() + 1, 1, 1),
        ),
    };

    let start = first
        .map(|d| d.and_time(NaiveTime::MIN))
        .unwrap_or(NaiveDateTime::MIN);
    let end = next
        .and_then(|d| d.and_time(NaiveTime::MIN).checked_sub_signed(Duration::nanoseconds(1)))
        .unwrap_or(NaiveDateTime::MAX);

    (start, end)
}

/// Cash flow over one period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodReport {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Every transaction dated inside the period, oldest first
    pub transactions: Vec<FinancialTransaction>,
    /// Every expense dated inside the period, oldest first
    pub expenses: Vec<Expense>,
    /// Payments received less refunds given
    pub income: Decimal,
    pub expense_total: Decimal,
    pub profit: Decimal,
}

pub fn period_report(snapshot: &Snapshot, period: Period, now: NaiveDateTime) -> PeriodReport {
    let (start, end) = period_bounds(period, now);
    let within = |at: NaiveDateTime| at >= start && at <= end;

    let transactions: Vec<FinancialTransaction> = snapshot
        .transactions
        .iter()
        .filter(|t| within(t.date))
        .cloned()
        .collect();
    let expenses: Vec<Expense> = snapshot
        .expenses
        .iter()
        .filter(|e| within(e.date))
        .cloned()
        .collect();

    let income: Decimal = transactions.iter().map(|t| t.income_effect()).sum();
    let expense_total: Decimal = expenses.iter().map(|e| e.amount).sum();

    debug!(
        "{:?} report {} - {}: income {}, expenses {}",
        period, start, end, income, expense_total
    );

    PeriodReport {
        start,
        end,
        transactions,
        expenses,
        income,
        expense_total,
        profit: income - expense_total,
    }
}

/// What happened at one point of a student's history
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryItem {
    Transaction(FinancialTransaction),
    /// A lesson taken from a subscription
    Lesson {
        subscription_id: SubscriptionId,
        plan_name: Option<String>,
        lesson_price: Decimal,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub at: NaiveDateTime,
    pub item: HistoryItem,
    /// Stored credit right after this entry
    pub credit_balance_after: Decimal,
    /// Credit plus the value of unused lessons right after this entry
    pub worth_after: Decimal,
}

enum Step<'a> {
    Transaction(&'a FinancialTransaction),
    Visit(&'a Attendance),
}

impl<'a> Step<'a> {
    fn at(&self) -> NaiveDateTime {
        match *self {
            Step::Transaction(t) => t.date,
            Step::Visit(a) => a.occurred_at(),
        }
    }

    // Transactions sort before visits sharing their instant.
    fn rank(&self) -> u8 {
        match *self {
            Step::Transaction(_) => 0,
            Step::Visit(_) => 1,
        }
    }
}

/// Replay a student's transactions and lessons in time order.
///
/// Only the current balance is stored, so the replay starts from that balance less the net
/// credit effect of every transaction. Visits that took no subscription credit are not listed;
/// the debit that billed them is. Returns an empty history for an unknown student.
pub fn balance_history(snapshot: &Snapshot, student_id: &str) -> Vec<HistoryEntry> {
    let student = match snapshot.student(student_id) {
        Some(student) => student,
        None => return Vec::new(),
    };

    let subscriptions: Vec<&StudentSubscription> = snapshot.subscriptions_of(student_id).collect();
    let transactions: Vec<&FinancialTransaction> = snapshot.transactions_of(student_id).collect();
    let visits: Vec<&Attendance> = snapshot
        .attendance
        .iter()
        .filter(|a| a.student_id == student_id && a.is_visit())
        .collect();

    let mut steps: Vec<Step> = transactions
        .iter()
        .map(|t| Step::Transaction(*t))
        .chain(visits.iter().map(|a| Step::Visit(*a)))
        .collect();
    steps.sort_by(|a, b| match a.at().cmp(&b.at()) {
        Ordering::Equal => a.rank().cmp(&b.rank()),
        other => other,
    });

    let net_effect: Decimal = transactions.iter().map(|t| t.credit_effect()).sum();
    let mut credit = student.balance - net_effect;
    let mut history = Vec::with_capacity(steps.len());

    for step in steps {
        let at = step.at();
        let item = match step {
            Step::Transaction(t) => {
                credit += t.credit_effect();
                HistoryItem::Transaction(t.clone())
            }
            Step::Visit(visit) => {
                let subscription = match visit
                    .subscription_id
                    .as_deref()
                    .and_then(|id| subscriptions.iter().find(|s| s.id == id))
                {
                    Some(subscription) => subscription,
                    None => {
                        trace!("no subscription behind the visit on {}", visit.date);
                        continue;
                    }
                };
                HistoryItem::Lesson {
                    subscription_id: subscription.id.clone(),
                    plan_name: snapshot.plan(&subscription.plan_id).map(|p| p.name.clone()),
                    lesson_price: subscription.lesson_price(),
                }
            }
        };

        let unused: Decimal = subscriptions
            .iter()
            .map(|s| unused_value_at(s, &transactions, &visits, at))
            .sum();

        history.push(HistoryEntry {
            at,
            item,
            credit_balance_after: credit,
            worth_after: (credit + unused).round_dp(CURRENCY_PRECISION),
        });
    }

    history
}

// The value of `subscription`'s unused lessons as things stood at `at`.
fn unused_value_at(
    subscription: &StudentSubscription,
    transactions: &[&FinancialTransaction],
    visits: &[&Attendance],
    at: NaiveDateTime,
) -> Decimal {
    if subscription.purchase_date > at {
        return Decimal::ZERO;
    }

    let refunded = transactions.iter().any(|t| {
        t.kind == TransactionKind::Refund
            && t.subscription_id.as_deref() == Some(subscription.id.as_str())
            && t.date <= at
    });
    if refunded {
        return Decimal::ZERO;
    }

    let used = visits
        .iter()
        .filter(|a| {
            a.subscription_id.as_deref() == Some(subscription.id.as_str()) && a.occurred_at() <= at
        })
        .count() as u32;

    subscription.lesson_price() * Decimal::from(subscription.lessons_total.saturating_sub(used))
}

/// A student's position as the journal shows it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentStanding {
    pub student_id: StudentId,
    /// Unused lessons less lessons owed. Negative when the student is in debt.
    pub lessons_left: i64,
    /// Value of the unused lessons plus stored credit
    pub worth: Decimal,
}

pub fn student_standing(snapshot: &Snapshot, student_id: &str) -> Option<StudentStanding> {
    let student = snapshot.student(student_id)?;

    let (lessons, value) = snapshot
        .subscriptions_of(student_id)
        .filter(|s| s.has_credit())
        .fold((0i64, Decimal::ZERO), |(lessons, value), s| {
            (
                lessons + i64::from(s.remaining_lessons()),
                value + s.remaining_value(),
            )
        });
    let owed = snapshot.debt_lessons(student_id).count() as i64;

    Some(StudentStanding {
        student_id: student.id.clone(),
        lessons_left: lessons - owed,
        worth: (value + student.balance).round_dp(CURRENCY_PRECISION),
    })
}

/// The landing page figures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub active_students: usize,
    pub groups: usize,
    /// The next events to start, soonest first
    pub upcoming: Vec<VisibleEvent>,
}

pub fn dashboard(
    snapshot: &Snapshot,
    visible: &[VisibleEvent],
    now: NaiveDateTime,
    limit: usize,
) -> DashboardSummary {
    let mut upcoming: Vec<VisibleEvent> =
        visible.iter().filter(|e| e.start > now).cloned().collect();
    upcoming.sort_by_key(|e| e.start);
    upcoming.truncate(limit);

    DashboardSummary {
        active_students: snapshot.active_students().count(),
        groups: snapshot.groups.len(),
        upcoming,
    }
}
