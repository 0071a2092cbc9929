//! Typed entities held by the entity store.
//!
//! Identifiers are opaque strings issued by the store. Amounts are always non-negative; the
//! direction of a monetary movement is carried by [`TransactionKind`].

mod attendance;
mod expense;
mod schedule;
mod student;
mod subscription;
mod transaction;

pub use attendance::{Attendance, AttendanceStatus, MAX_GRADE, MIN_GRADE};
pub(crate) use attendance::grade_for;
pub use expense::Expense;
pub use schedule::{OverrideTime, ScheduleEvent, ScheduleEventException};
pub use student::{Group, NewStudent, Student, StudentStatus};
pub use subscription::{StudentSubscription, SubscriptionPlan, REFUND_PRECISION};
pub use transaction::{FinancialTransaction, NewTransaction, RefundTarget, TransactionKind};

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use thiserror::Error;

pub type StudentId = String;
pub type GroupId = String;
pub type PlanId = String;
pub type SubscriptionId = String;
pub type TransactionId = String;
pub type EventId = String;
pub type ExpenseId = String;

/// Input that was rejected before anything was written.
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
    #[error("{0} cannot be negative (got {1})")]
    NegativeAmount(&'static str, Decimal),
    #[error("{0} must be greater than zero")]
    NonPositiveAmount(&'static str),
    #[error("the discount ({discount}) is larger than the price ({price})")]
    DiscountExceedsPrice { price: Decimal, discount: Decimal },
    #[error("an event must end after it starts ({start} - {end})")]
    EmptyEvent {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("a subscription must grant at least one lesson")]
    NoLessons,
    #[error("grade {0} is outside the {min}..={max} scale", min = MIN_GRADE, max = MAX_GRADE)]
    GradeOutOfRange(u8),
    #[error("student {0} is archived")]
    ArchivedStudent(StudentId),
    #[error("the system plan cannot be modified")]
    SystemPlan,
}

pub(crate) fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField(field));
    }
    Ok(())
}

pub(crate) fn require_non_negative(
    field: &'static str,
    value: Decimal,
) -> Result<(), ValidationError> {
    if value < Decimal::ZERO {
        return Err(ValidationError::NegativeAmount(field, value));
    }
    Ok(())
}
