//! Attendance-driven lesson ledger and recurring schedule core for a tutoring centre.
//!
//! The crate is consumed by a presentation layer. It expands weekly-recurring lessons into
//! concrete occurrences, keeps subscription credit in step with attendance marks, and rolls
//! the resulting cash flow up into reports. Storage is an external collaborator reached
//! through [`EntityStore`].

mod config;
mod decode;
mod ledger;
pub mod model;
mod notify;
mod occurrence;
mod records;
mod recurrence;
mod report;
mod saga;
mod state;
mod store;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use decode::{DecodeError, Rejection, Snapshot};
pub use ledger::{
    AttendanceEffect, AttendanceMark, Confirmation, Ledger, Purchase, Refund, Release,
};
pub use notify::{Email, LogMailer, Mailer, Notice, PaymentReminder, ScheduleChange, Severity};
pub use occurrence::{parse_wall_clock, OccurrenceKey, OccurrenceKeyError};
pub use records::Records;
pub use recurrence::{expand, Frequency, VisibleEvent, RECURRENCE_HORIZON_WEEKS};
pub use report::{
    balance_history, dashboard, period_bounds, period_report, student_standing,
    DashboardSummary, HistoryEntry, HistoryItem, Period, PeriodReport, StudentStanding,
};
pub use saga::SagaError;
pub use state::{AppState, StateChange, StateError};
pub use store::{EntityStore, Filter, MemoryStore, Row, StoreError, Table};

// This represents the number of decimal places that a currency can validly express.
// @todo Support the full range of currency precisions specified in ISO 4217.
pub const CURRENCY_PRECISION: u32 = 2;

/// Identifier of the built-in plan that stands for "no real plan".
///
/// It is never listed alongside ordinary plans and can be neither edited nor deleted.
pub const SYSTEM_PLAN_ID: &str = "00000000-0000-0000-0000-000000000000";
