//! Messages for people: short notices for whoever is at the screen, and e-mails to parents.

use crate::model::Student;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
}

/// A transient message reporting how a user action went
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub message: String,
    pub severity: Severity,
}

impl Notice {
    pub fn success<S: Into<String>>(message: S) -> Self {
        Notice {
            message: message.into(),
            severity: Severity::Success,
        }
    }

    /// A failure notice, with the underlying cause appended.
    pub fn error<S: Into<String>, E: fmt::Display>(message: S, cause: E) -> Self {
        Notice {
            message: format!("{}: {}", message.into(), cause),
            severity: Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// A payment the parent should be reminded of
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReminder {
    pub amount: Decimal,
    pub due: NaiveDate,
}

/// One lesson that moved
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleChange {
    pub title: String,
    /// Where the lesson was before, when known
    pub moved_from: Option<NaiveDateTime>,
    pub moved_to: NaiveDateTime,
}

/// A rendered e-mail
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

const SIGNATURE: &str = "Kind regards,\nYour tutor";

impl Email {
    fn to_parent(student: &Student, subject: String, text: String) -> Option<Self> {
        let to = match student.parent_email.as_deref().map(str::trim) {
            Some(to) if !to.is_empty() => to.to_owned(),
            _ => {
                debug!("no parent e-mail for {}, nothing sent", student.id);
                return None;
            }
        };

        Some(Email {
            to,
            subject,
            body: format!("Dear {},\n\n{}\n\n{}", student.parent_name, text, SIGNATURE),
        })
    }

    pub fn welcome(student: &Student) -> Option<Self> {
        Email::to_parent(
            student,
            format!("Welcome to lessons, {}!", student.name),
            format!(
                "We are very glad that {} has joined our lessons. A productive year lies ahead.",
                student.name
            ),
        )
    }

    pub fn payment_reminder(student: &Student, reminder: &PaymentReminder) -> Option<Self> {
        Email::to_parent(
            student,
            "Upcoming payment reminder".to_owned(),
            format!(
                "This is a reminder that a payment of {} is due by {}.",
                reminder.amount,
                reminder.due.format("%d.%m.%Y")
            ),
        )
    }

    pub fn schedule_change(student: &Student, change: &ScheduleChange) -> Option<Self> {
        let from = change
            .moved_from
            .map(|at| format!(" from {}", at.format("%d.%m.%Y at %H:%M")))
            .unwrap_or_default();

        Email::to_parent(
            student,
            "Schedule change".to_owned(),
            format!(
                "Please note a schedule change for {}. The lesson \"{}\" has been moved{} to {}.",
                student.name,
                change.title,
                from,
                change.moved_to.format("%d.%m.%Y at %H:%M")
            ),
        )
    }
}

/// Sends e-mail to parents.
///
/// Delivery is best effort: failures stay inside the mailer and never undo the change that
/// prompted the message.
pub trait Mailer {
    fn welcome(&self, student: &Student);
    fn payment_reminder(&self, student: &Student, reminder: &PaymentReminder);
    fn schedule_change(&self, student: &Student, change: &ScheduleChange);
}

/// A mailer that only writes what it would send to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl LogMailer {
    fn send(email: Option<Email>) {
        if let Some(email) = email {
            info!(
                "e-mail to {}, subject: {}\n{}",
                email.to, email.subject, email.body
            );
        }
    }
}

impl Mailer for LogMailer {
    fn welcome(&self, student: &Student) {
        LogMailer::send(Email::welcome(student));
    }

    fn payment_reminder(&self, student: &Student, reminder: &PaymentReminder) {
        LogMailer::send(Email::payment_reminder(student, reminder));
    }

    fn schedule_change(&self, student: &Student, change: &ScheduleChange) {
        LogMailer::send(Email::schedule_change(student, change));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::NewStudent,
        test_utils::{at, date},
    };
    use rust_decimal_macros::dec;

    fn student(email: Option<&str>) -> Student {
        let mut new = NewStudent::new("Anna");
        new.with_parent("Maria", "+7 900 000 00 00");
        if let Some(email) = email {
            new.with_email(email);
        }
        new.build().unwrap()
    }

    #[test]
    fn error_notices_carry_their_cause() {
        let notice = Notice::error("Could not save the student", "connection reset");
        assert!(notice.is_error());
        assert_eq!(
            notice.message,
            "Could not save the student: connection reset"
        );
        assert!(!Notice::success("Saved").is_error());
    }

    #[test]
    fn no_email_without_an_address() {
        assert_eq!(Email::welcome(&student(None)), None);
        assert_eq!(Email::welcome(&student(Some("  "))), None);
    }

    #[test]
    fn welcome_addresses_the_parent() {
        let email = Email::welcome(&student(Some("maria@example.com"))).unwrap();
        assert_eq!(email.to, "maria@example.com");
        assert_eq!(email.subject, "Welcome to lessons, Anna!");
        assert!(email.body.starts_with("Dear Maria,"));
    }

    #[test]
    fn reminders_and_changes_render_dates() {
        let anna = student(Some("maria@example.com"));

        let email = Email::payment_reminder(
            &anna,
            &PaymentReminder {
                amount: dec!(4000),
                due: date(2024, 4, 1),
            },
        )
        .unwrap();
        assert!(email.body.contains("a payment of 4000 is due by 01.04.2024"));

        let email = Email::schedule_change(
            &anna,
            &ScheduleChange {
                title: "Grammar".to_owned(),
                moved_from: Some(at(2024, 4, 2, 10, 0)),
                moved_to: at(2024, 4, 3, 11, 30),
            },
        )
        .unwrap();
        assert!(email
            .body
            .contains("\"Grammar\" has been moved from 02.04.2024 at 10:00 to 03.04.2024 at 11:30"));
    }
}
