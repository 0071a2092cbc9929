use super::{
    require_non_negative, require_text, StudentId, SubscriptionId, TransactionId,
    ValidationError,
};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;

/// The direction of a monetary movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Cash received. Recorded for cash flow; stored credit is untouched.
    Payment,
    /// Money returned for unused lessons, either to credit or in cash.
    Refund,
    /// Credit added to correct an earlier charge.
    Correction,
    /// Credit taken, e.g. for a lesson attended without a subscription.
    Debit,
}

/// Where a refund went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefundTarget {
    /// Added to the student's stored credit
    Balance,
    /// Handed back in cash; stored credit is untouched
    Cash,
}

// Rows written before refunds carried a target only say where the money went in their
// description. Both the current wording and the older localised one are recognised.
const BALANCE_REFUND_PREFIXES: [&str; 2] = ["Refund to balance", "Возврат на баланс"];

impl RefundTarget {
    /// Classify a refund row that has no explicit target.
    pub fn from_description(description: &str) -> Self {
        let description = description.trim_start();
        if BALANCE_REFUND_PREFIXES
            .iter()
            .any(|prefix| description.starts_with(prefix))
        {
            RefundTarget::Balance
        } else {
            RefundTarget::Cash
        }
    }

    /// The description written on a refund of `subscription_id`.
    pub fn describe(self, subscription_id: &str) -> String {
        let short: String = subscription_id.chars().take(4).collect();
        match self {
            RefundTarget::Balance => {
                format!("{} (subscription #{})", BALANCE_REFUND_PREFIXES[0], short)
            }
            RefundTarget::Cash => format!("Cash refund (subscription #{})", short),
        }
    }
}

/// An entry in the append-only ledger. Amounts are never negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialTransaction {
    pub id: TransactionId,
    pub student_id: StudentId,
    pub date: NaiveDateTime,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    #[serde(rename = "student_subscription_id")]
    pub subscription_id: Option<SubscriptionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_target: Option<RefundTarget>,
}

impl FinancialTransaction {
    /// How this entry moves the student's stored credit.
    pub fn credit_effect(&self) -> Decimal {
        match self.kind {
            TransactionKind::Correction => self.amount,
            TransactionKind::Refund if self.refund_target == Some(RefundTarget::Balance) => {
                self.amount
            }
            TransactionKind::Debit => -self.amount,
            TransactionKind::Payment | TransactionKind::Refund => Decimal::ZERO,
        }
    }

    /// How this entry moves the business's income.
    pub fn income_effect(&self) -> Decimal {
        match self.kind {
            TransactionKind::Payment => self.amount,
            TransactionKind::Refund => -self.amount,
            TransactionKind::Correction | TransactionKind::Debit => Decimal::ZERO,
        }
    }
}

/// A transaction that has not been recorded yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub student_id: StudentId,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub subscription_id: Option<SubscriptionId>,
    pub refund_target: Option<RefundTarget>,
}

impl NewTransaction {
    pub fn new<S: Into<StudentId>, D: Into<String>>(
        student_id: S,
        kind: TransactionKind,
        amount: Decimal,
        description: D,
    ) -> Self {
        NewTransaction {
            student_id: student_id.into(),
            kind,
            amount,
            description: description.into(),
            subscription_id: None,
            refund_target: None,
        }
    }

    pub fn for_subscription<S: Into<SubscriptionId>>(mut self, subscription_id: S) -> Self {
        self.subscription_id = Some(subscription_id.into());
        self
    }

    pub fn refunded_to(mut self, target: RefundTarget) -> Self {
        self.refund_target = Some(target);
        self
    }

    /// Check the input and stamp it with `date`.
    pub fn build(self, date: NaiveDateTime) -> Result<FinancialTransaction, ValidationError> {
        require_text("student", &self.student_id)?;
        require_non_negative("transaction amount", self.amount)?;

        // Refunds must say where the money went, everything else must not.
        let refund_target = match self.kind {
            TransactionKind::Refund => Some(self.refund_target.unwrap_or(RefundTarget::Cash)),
            _ => None,
        };

        Ok(FinancialTransaction {
            id: String::new(),
            student_id: self.student_id,
            date,
            kind: self.kind,
            amount: self.amount,
            description: self.description,
            subscription_id: self.subscription_id,
            refund_target,
        })
    }
}
