use super::{StudentId, SubscriptionId, TransactionId, ValidationError};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

/// Lowest grade on the journal's scale
pub const MIN_GRADE: u8 = 2;
/// Highest grade on the journal's scale
pub const MAX_GRADE: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
}

impl AttendanceStatus {
    /// Present and absent marks both count as a visit, which is what consumes a lesson.
    pub fn is_visit(self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Absent)
    }

    /// The status a journal cell moves to when tapped: none, present, absent, excused and
    /// back to none.
    pub fn next_in_cycle(current: Option<Self>) -> Option<Self> {
        match current {
            None => Some(AttendanceStatus::Present),
            Some(AttendanceStatus::Present) => Some(AttendanceStatus::Absent),
            Some(AttendanceStatus::Absent) => Some(AttendanceStatus::Excused),
            Some(AttendanceStatus::Excused) => None,
        }
    }
}

/// One student's mark for one calendar date.
///
/// At most one record exists per `(student_id, date)`. A visit without a subscription link
/// is a debt lesson; `debt_transaction_id` then points at the debit that billed it, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attendance {
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub grade: Option<u8>,
    #[serde(rename = "student_subscription_id")]
    pub subscription_id: Option<SubscriptionId>,
    pub debt_transaction_id: Option<TransactionId>,
    /// The `date` column as storage holds it, when that is not plain `YYYY-MM-DD`.
    #[serde(skip)]
    pub(crate) stored_date: Option<String>,
}

impl Attendance {
    pub fn is_visit(&self) -> bool {
        self.status.is_visit()
    }

    pub fn is_debt(&self) -> bool {
        self.is_visit() && self.subscription_id.is_none()
    }

    /// The value that matches this record's `date` column in the store.
    pub(crate) fn date_key(&self) -> String {
        self.stored_date
            .clone()
            .unwrap_or_else(|| self.date.to_string())
    }

    /// Attendance has no time of day; it sorts at the start of its date.
    pub fn occurred_at(&self) -> NaiveDateTime {
        self.date.and_time(NaiveTime::MIN)
    }
}

/// Grades only mean something for students who were there.
pub(crate) fn grade_for(
    status: AttendanceStatus,
    grade: Option<u8>,
) -> Result<Option<u8>, ValidationError> {
    match grade {
        Some(g) if !(MIN_GRADE..=MAX_GRADE).contains(&g) => {
            Err(ValidationError::GradeOutOfRange(g))
        }
        Some(g) if status == AttendanceStatus::Present => Ok(Some(g)),
        _ => Ok(None),
    }
}
