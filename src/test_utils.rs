use crate::{
    model::{NewStudent, Student, StudentId, StudentSubscription, SubscriptionPlan},
    notify::{Mailer, PaymentReminder, ScheduleChange},
    store::{to_row, EntityStore, Filter, MemoryStore, Row, StoreError, Table},
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use std::cell::RefCell;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    date(y, m, d).and_hms_opt(h, mi, 0).unwrap()
}

/// Send log output to the test harness. Run with `RUST_LOG=debug` to see it.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn student(id: &str, balance: Decimal) -> Student {
    let mut student = NewStudent::new(format!("Student {}", id)).build().unwrap();
    student.id = id.to_owned();
    student.balance = balance;
    student
}

pub fn plan(id: &str, price: Decimal, lessons: u32) -> SubscriptionPlan {
    let mut plan = SubscriptionPlan::new(format!("Plan {}", id), price, Decimal::ZERO, lessons)
        .unwrap();
    plan.id = id.to_owned();
    plan
}

pub fn subscription(
    id: &str,
    student_id: &str,
    price: Decimal,
    total: u32,
    attended: u32,
) -> StudentSubscription {
    StudentSubscription {
        id: id.to_owned(),
        student_id: student_id.to_owned(),
        plan_id: "p1".to_owned(),
        purchase_date: at(2024, 1, 10, 12, 0),
        price_paid: price,
        lessons_total: total,
        lessons_attended: attended,
        assigned_group_id: None,
    }
}

/// Add typed entities to a store as rows.
pub fn seed<T: Serialize>(store: MemoryStore, table: Table, items: &[T]) -> MemoryStore {
    let rows = items.iter().map(|item| to_row(item).unwrap()).collect();
    store.with_rows(table, rows)
}

/// A store that fails its n-th write (counting from 1) and passes everything else through.
pub struct FailingStore {
    pub inner: MemoryStore,
    writes: usize,
    fail_on: usize,
}

impl FailingStore {
    pub fn new(inner: MemoryStore, fail_on: usize) -> Self {
        FailingStore {
            inner,
            writes: 0,
            fail_on,
        }
    }

    fn write(&mut self, table: Table) -> Result<(), StoreError> {
        self.writes += 1;
        if self.writes == self.fail_on {
            return Err(StoreError::Backend {
                table,
                message: "connection reset".to_owned(),
            });
        }
        Ok(())
    }
}

impl EntityStore for FailingStore {
    fn list(&self, table: Table) -> Result<Vec<Row>, StoreError> {
        self.inner.list(table)
    }

    fn insert(&mut self, table: Table, row: Row) -> Result<Row, StoreError> {
        self.write(table)?;
        self.inner.insert(table, row)
    }

    fn update(&mut self, table: Table, filter: &Filter, patch: Row) -> Result<usize, StoreError> {
        self.write(table)?;
        self.inner.update(table, filter, patch)
    }

    fn upsert(&mut self, table: Table, row: Row, conflict: &[&str]) -> Result<Row, StoreError> {
        self.write(table)?;
        self.inner.upsert(table, row, conflict)
    }

    fn delete(&mut self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        self.write(table)?;
        self.inner.delete(table, filter)
    }
}

/// A mailer that remembers which messages it was asked to send, and to whom.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: RefCell<Vec<(&'static str, StudentId)>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<(&'static str, StudentId)> {
        self.sent.borrow().clone()
    }

    fn record(&self, kind: &'static str, student: &Student) {
        self.sent.borrow_mut().push((kind, student.id.clone()));
    }
}

impl Mailer for RecordingMailer {
    fn welcome(&self, student: &Student) {
        self.record("welcome", student);
    }

    fn payment_reminder(&self, student: &Student, _: &PaymentReminder) {
        self.record("payment_reminder", student);
    }

    fn schedule_change(&self, student: &Student, _: &ScheduleChange) {
        self.record("schedule_change", student);
    }
}
