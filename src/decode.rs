//! The boundary between loosely typed storage rows and the entity model.
//!
//! Rows are parsed into entities once, on load. Optional fields that are missing or unusable
//! take safe defaults; rows that lack their identity (or a value nothing sensible can stand in
//! for) are set aside as [`Rejection`]s and logged, never raised to the user.

use crate::{
    config::Config,
    model::{
        Attendance, AttendanceStatus, Expense, FinancialTransaction, Group, OverrideTime,
        RefundTarget, ScheduleEvent, ScheduleEventException, Student, StudentStatus,
        StudentSubscription, SubscriptionPlan, TransactionKind, MAX_GRADE, MIN_GRADE,
    },
    occurrence::{parse_wall_clock, OccurrenceKey},
    store::{EntityStore, Row, StoreError, Table},
};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde_json::Value;
use std::{collections::HashMap, str::FromStr};
use thiserror::Error;

const UNNAMED_STUDENT: &str = "Unnamed student";
const UNNAMED_PLAN: &str = "Unnamed plan";
const NOT_SPECIFIED: &str = "Not specified";
const NO_DESCRIPTION: &str = "No description";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("missing required column '{0}'")]
    Missing(&'static str),
    #[error("column '{column}' holds an unusable value: {value}")]
    Invalid { column: &'static str, value: String },
}

/// A stored row that was left out of the working set
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub table: Table,
    /// Position of the row in the listing it came from
    pub index: usize,
    pub reason: DecodeError,
}

/// Typed access to the columns of one row
struct RowReader<'a> {
    row: &'a Row,
    local: &'a FixedOffset,
}

impl<'a> RowReader<'a> {
    fn value(&self, column: &str) -> Option<&'a Value> {
        match self.row.get(column) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn invalid(column: &'static str, value: &Value) -> DecodeError {
        DecodeError::Invalid {
            column,
            value: value.to_string(),
        }
    }

    /// A non-blank string, or `None`.
    fn text(&self, column: &str) -> Option<String> {
        self.value(column)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    }

    fn required_text(&self, column: &'static str) -> Result<String, DecodeError> {
        self.text(column).ok_or(DecodeError::Missing(column))
    }

    /// Numbers may arrive as JSON numbers or as numeric strings.
    fn decimal(&self, column: &'static str) -> Result<Option<Decimal>, DecodeError> {
        let value = match self.value(column) {
            Some(value) => value,
            None => return Ok(None),
        };

        let raw = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_owned(),
            other => return Err(Self::invalid(column, other)),
        };

        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .map(Some)
            .map_err(|_| Self::invalid(column, value))
    }

    fn amount(&self, column: &'static str) -> Result<Option<Decimal>, DecodeError> {
        match self.decimal(column)? {
            Some(amount) if amount < Decimal::ZERO => Err(DecodeError::Invalid {
                column,
                value: amount.to_string(),
            }),
            other => Ok(other),
        }
    }

    fn required_amount(&self, column: &'static str) -> Result<Decimal, DecodeError> {
        self.amount(column)?.ok_or(DecodeError::Missing(column))
    }

    /// A non-negative whole number.
    fn count(&self, column: &'static str) -> Result<Option<u32>, DecodeError> {
        let value = match self.decimal(column)? {
            Some(value) => value,
            None => return Ok(None),
        };

        if value.fract() != Decimal::ZERO {
            return Err(DecodeError::Invalid {
                column,
                value: value.to_string(),
            });
        }

        value.to_u32().map(Some).ok_or(DecodeError::Invalid {
            column,
            value: value.to_string(),
        })
    }

    fn required_count(&self, column: &'static str) -> Result<u32, DecodeError> {
        self.count(column)?.ok_or(DecodeError::Missing(column))
    }

    /// Anything but `true` reads as false.
    fn flag(&self, column: &str) -> bool {
        self.value(column).and_then(Value::as_bool).unwrap_or(false)
    }

    fn wall_clock(&self, column: &'static str) -> Result<Option<NaiveDateTime>, DecodeError> {
        let value = match self.value(column) {
            Some(value) => value,
            None => return Ok(None),
        };

        value
            .as_str()
            .and_then(|raw| parse_wall_clock(raw, self.local))
            .map(Some)
            .ok_or_else(|| Self::invalid(column, value))
    }

    fn required_wall_clock(&self, column: &'static str) -> Result<NaiveDateTime, DecodeError> {
        self.wall_clock(column)?.ok_or(DecodeError::Missing(column))
    }

    fn date(&self, column: &'static str) -> Result<Option<NaiveDate>, DecodeError> {
        Ok(self.wall_clock(column)?.map(|at| at.date()))
    }

    fn string_list(&self, column: &str) -> Vec<String> {
        match self.value(column) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Keep a defaulted optional value, logging why the stored one was unusable.
    fn lenient<T>(&self, column: &str, result: Result<Option<T>, DecodeError>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!("ignoring {}: {}", column, e);
                None
            }
        }
    }
}

fn decode_student(r: &RowReader) -> Result<Student, DecodeError> {
    let status = match r.text("status").as_deref() {
        Some("archived") => StudentStatus::Archived,
        Some("active") | None => StudentStatus::Active,
        Some(other) => {
            warn!("unknown student status '{}', treating as active", other);
            StudentStatus::Active
        }
    };

    Ok(Student {
        id: r.required_text("id")?,
        name: r.text("name").unwrap_or_else(|| UNNAMED_STUDENT.to_owned()),
        parent_name: r.text("parent_name").unwrap_or_else(|| NOT_SPECIFIED.to_owned()),
        parent_phone: r
            .text("parent_phone1")
            .unwrap_or_else(|| NOT_SPECIFIED.to_owned()),
        parent_email: r.text("parent_email"),
        birth_date: r.lenient("birth_date", r.date("birth_date")),
        balance: r.lenient("balance", r.decimal("balance")).unwrap_or_default(),
        status,
        archived_date: r.lenient("archived_date", r.wall_clock("archived_date")),
        group_ids: r.string_list("group_ids"),
    })
}

fn decode_group(r: &RowReader) -> Result<Group, DecodeError> {
    Ok(Group {
        id: r.required_text("id")?,
        name: r.required_text("name")?,
    })
}

fn decode_plan(r: &RowReader) -> Result<SubscriptionPlan, DecodeError> {
    Ok(SubscriptionPlan {
        id: r.required_text("id")?,
        name: r.text("name").unwrap_or_else(|| UNNAMED_PLAN.to_owned()),
        price: r.amount("price")?.unwrap_or_default(),
        discount: r.amount("discount")?.unwrap_or_default(),
        lesson_count: r.lenient("lesson_count", r.count("lesson_count")).unwrap_or(0),
        is_default: r.flag("is_default"),
    })
}

fn decode_subscription(r: &RowReader) -> Result<StudentSubscription, DecodeError> {
    let id = r.required_text("id")?;
    let lessons_total = r.required_count("lessons_total")?;
    let mut lessons_attended = r
        .lenient("lessons_attended", r.count("lessons_attended"))
        .unwrap_or(0);

    if lessons_attended > lessons_total {
        warn!(
            "subscription {} has {} of {} lessons attended, clamping",
            id, lessons_attended, lessons_total
        );
        lessons_attended = lessons_total;
    }

    Ok(StudentSubscription {
        id,
        student_id: r.required_text("student_id")?,
        plan_id: r.required_text("subscription_plan_id")?,
        purchase_date: r.required_wall_clock("purchase_date")?,
        price_paid: r.required_amount("price_paid")?,
        lessons_total,
        lessons_attended,
        assigned_group_id: r.text("assigned_group_id"),
    })
}

fn decode_attendance(r: &RowReader) -> Result<Attendance, DecodeError> {
    let status = match r.required_text("status")?.as_str() {
        "present" => AttendanceStatus::Present,
        "absent" => AttendanceStatus::Absent,
        "excused" => AttendanceStatus::Excused,
        other => {
            return Err(DecodeError::Invalid {
                column: "status",
                value: other.to_owned(),
            })
        }
    };

    let grade = r
        .lenient("grade", r.count("grade"))
        .filter(|g| (MIN_GRADE as u32..=MAX_GRADE as u32).contains(g))
        .filter(|_| status == AttendanceStatus::Present)
        .map(|g| g as u8);

    let date = r.date("date")?.ok_or(DecodeError::Missing("date"))?;
    let canonical = date.to_string();
    let stored_date = r
        .value("date")
        .and_then(Value::as_str)
        .filter(|raw| *raw != canonical)
        .map(str::to_owned);
    if let Some(ref raw) = stored_date {
        debug!("attendance date '{}' read as {}", raw, canonical);
    }

    Ok(Attendance {
        student_id: r.required_text("student_id")?,
        date,
        status,
        grade,
        subscription_id: r.text("student_subscription_id"),
        debt_transaction_id: r.text("debt_transaction_id"),
        stored_date,
    })
}

fn decode_transaction(r: &RowReader) -> Result<FinancialTransaction, DecodeError> {
    let kind = match r.required_text("type")?.as_str() {
        "payment" => TransactionKind::Payment,
        "refund" => TransactionKind::Refund,
        "correction" => TransactionKind::Correction,
        "debit" => TransactionKind::Debit,
        other => {
            return Err(DecodeError::Invalid {
                column: "type",
                value: other.to_owned(),
            })
        }
    };
    let description = r.text("description").unwrap_or_default();

    let refund_target = match kind {
        TransactionKind::Refund => Some(match r.text("refund_target").as_deref() {
            Some("balance") => RefundTarget::Balance,
            Some("cash") => RefundTarget::Cash,
            _ => RefundTarget::from_description(&description),
        }),
        _ => None,
    };

    Ok(FinancialTransaction {
        id: r.required_text("id")?,
        student_id: r.required_text("student_id")?,
        date: r.required_wall_clock("date")?,
        kind,
        amount: r.required_amount("amount")?,
        description,
        subscription_id: r.text("student_subscription_id"),
        refund_target,
    })
}

fn decode_event(r: &RowReader) -> Result<ScheduleEvent, DecodeError> {
    Ok(ScheduleEvent {
        id: r.required_text("id")?,
        title: r.required_text("title")?,
        group_id: r.text("group_id"),
        start: r.required_wall_clock("start")?,
        end: r.required_wall_clock("end")?,
        is_recurring: r.flag("is_recurring"),
    })
}

fn decode_exception(r: &RowReader) -> Result<ScheduleEventException, DecodeError> {
    let raw_key = r.required_text("original_start_time")?;
    // Older rows may hold a full timestamp rather than a canonical key.
    let occurrence = OccurrenceKey::from_str(&raw_key)
        .ok()
        .or_else(|| parse_wall_clock(&raw_key, r.local).map(OccurrenceKey::from_local))
        .ok_or(DecodeError::Invalid {
            column: "original_start_time",
            value: raw_key.clone(),
        })?;

    // A present-but-null group is an explicit "no group".
    let new_group_id = match r.row.get("new_group_id") {
        None => None,
        Some(Value::String(g)) if !g.is_empty() => Some(Some(g.clone())),
        Some(_) => Some(None),
    };

    let override_time = |column: &str| {
        r.value(column).map(|value| {
            let raw = value.as_str().unwrap_or_default();
            match parse_wall_clock(raw, r.local) {
                Some(at) => OverrideTime::Valid(at),
                None => OverrideTime::Malformed(
                    value
                        .as_str()
                        .map(str::to_owned)
                        .unwrap_or_else(|| value.to_string()),
                ),
            }
        })
    };

    Ok(ScheduleEventException {
        event_id: r.required_text("original_event_id")?,
        occurrence,
        new_title: r.text("new_title"),
        new_group_id,
        new_start: override_time("new_start_time"),
        new_end: override_time("new_end_time"),
        is_deleted: r.flag("is_deleted"),
    })
}

fn decode_expense(r: &RowReader) -> Result<Expense, DecodeError> {
    Ok(Expense {
        id: r.required_text("id")?,
        date: r.required_wall_clock("date")?,
        description: r
            .text("description")
            .unwrap_or_else(|| NO_DESCRIPTION.to_owned()),
        amount: r.required_amount("amount")?,
    })
}

/// A consistent, typed view of everything in the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Sorted by name
    pub students: Vec<Student>,
    /// Sorted by name
    pub groups: Vec<Group>,
    pub(crate) plans: Vec<SubscriptionPlan>,
    /// Oldest purchase first
    pub subscriptions: Vec<StudentSubscription>,
    /// Oldest first
    pub attendance: Vec<Attendance>,
    /// Oldest first
    pub transactions: Vec<FinancialTransaction>,
    pub events: Vec<ScheduleEvent>,
    pub exceptions: Vec<ScheduleEventException>,
    /// Oldest first
    pub expenses: Vec<Expense>,
    /// Rows left out of the collections above
    pub rejections: Vec<Rejection>,
}

fn decode_table<T, F>(
    table: Table,
    rows: &[Row],
    local: &FixedOffset,
    rejections: &mut Vec<Rejection>,
    decode: F,
) -> Vec<T>
where
    F: Fn(&RowReader) -> Result<T, DecodeError>,
{
    let mut decoded = Vec::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        match decode(&RowReader { row, local }) {
            Ok(entity) => decoded.push(entity),
            Err(reason) => {
                warn!("dropping {} row {}: {}", table, index, reason);
                rejections.push(Rejection {
                    table,
                    index,
                    reason,
                });
            }
        }
    }

    decoded
}

impl Snapshot {
    /// List every table and decode it.
    pub fn load<S: EntityStore>(store: &S, config: &Config) -> Result<Self, StoreError> {
        let mut raw = HashMap::new();
        for table in Table::ALL.iter() {
            raw.insert(*table, store.list(*table)?);
        }

        Ok(Self::decode(&raw, config))
    }

    /// Decode raw table listings. Missing tables count as empty.
    pub fn decode(raw: &HashMap<Table, Vec<Row>>, config: &Config) -> Self {
        let local = config.local_offset();
        let mut rejections = Vec::new();
        let rows = |table: Table| raw.get(&table).map(Vec::as_slice).unwrap_or(&[]);

        let mut students = decode_table(
            Table::Students,
            rows(Table::Students),
            &local,
            &mut rejections,
            decode_student,
        );
        let mut groups = decode_table(
            Table::Groups,
            rows(Table::Groups),
            &local,
            &mut rejections,
            decode_group,
        );
        let plans = decode_table(
            Table::SubscriptionPlans,
            rows(Table::SubscriptionPlans),
            &local,
            &mut rejections,
            decode_plan,
        );
        let mut subscriptions = decode_table(
            Table::StudentSubscriptions,
            rows(Table::StudentSubscriptions),
            &local,
            &mut rejections,
            decode_subscription,
        );
        let mut attendance = decode_table(
            Table::Attendance,
            rows(Table::Attendance),
            &local,
            &mut rejections,
            decode_attendance,
        );
        let mut transactions = decode_table(
            Table::FinancialTransactions,
            rows(Table::FinancialTransactions),
            &local,
            &mut rejections,
            decode_transaction,
        );
        let events = decode_table(
            Table::ScheduleEvents,
            rows(Table::ScheduleEvents),
            &local,
            &mut rejections,
            decode_event,
        );
        let exceptions = decode_table(
            Table::EventExceptions,
            rows(Table::EventExceptions),
            &local,
            &mut rejections,
            decode_exception,
        );
        let mut expenses = decode_table(
            Table::Expenses,
            rows(Table::Expenses),
            &local,
            &mut rejections,
            decode_expense,
        );

        // Stable sorts, so storage order breaks ties.
        students.sort_by(|a, b| a.name.cmp(&b.name));
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        subscriptions.sort_by_key(|s| s.purchase_date);
        attendance.sort_by_key(|a| a.date);
        transactions.sort_by_key(|t| t.date);
        expenses.sort_by_key(|e| e.date);

        debug!(
            "decoded {} students, {} subscriptions, {} transactions, {} events ({} rows rejected)",
            students.len(),
            subscriptions.len(),
            transactions.len(),
            events.len(),
            rejections.len()
        );

        Snapshot {
            students,
            groups,
            plans,
            subscriptions,
            attendance,
            transactions,
            events,
            exceptions,
            expenses,
            rejections,
        }
    }

    /// Plans on offer. The system plan is never listed.
    pub fn plans(&self) -> impl Iterator<Item = &SubscriptionPlan> {
        self.plans.iter().filter(|p| !p.is_system())
    }

    /// Any plan by id, the system plan included.
    pub fn plan(&self, id: &str) -> Option<&SubscriptionPlan> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn default_plan(&self) -> Option<&SubscriptionPlan> {
        self.plans().find(|p| p.is_default)
    }

    pub fn student(&self, id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == id)
    }

    pub fn active_students(&self) -> impl Iterator<Item = &Student> {
        self.students.iter().filter(|s| s.is_active())
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn subscription(&self, id: &str) -> Option<&StudentSubscription> {
        self.subscriptions.iter().find(|s| s.id == id)
    }

    /// A student's subscriptions, oldest purchase first.
    pub fn subscriptions_of<'a>(
        &'a self,
        student_id: &'a str,
    ) -> impl Iterator<Item = &'a StudentSubscription> + 'a {
        self.subscriptions
            .iter()
            .filter(move |s| s.student_id == student_id)
    }

    pub fn attendance_on(&self, student_id: &str, date: NaiveDate) -> Option<&Attendance> {
        self.attendance
            .iter()
            .find(|a| a.student_id == student_id && a.date == date)
    }

    /// A student's visits not covered by any subscription, oldest first.
    pub fn debt_lessons<'a>(&'a self, student_id: &'a str) -> impl Iterator<Item = &'a Attendance> + 'a {
        self.attendance
            .iter()
            .filter(move |a| a.student_id == student_id && a.is_debt())
    }

    pub fn transaction(&self, id: &str) -> Option<&FinancialTransaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    /// A student's transactions, oldest first.
    pub fn transactions_of<'a>(
        &'a self,
        student_id: &'a str,
    ) -> impl Iterator<Item = &'a FinancialTransaction> + 'a {
        self.transactions
            .iter()
            .filter(move |t| t.student_id == student_id)
    }

    pub fn event(&self, id: &str) -> Option<&ScheduleEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn expense(&self, id: &str) -> Option<&Expense> {
        self.expenses.iter().find(|e| e.id == id)
    }
}
