use super::{require_text, ExpenseId, ValidationError};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;

/// Money spent by the business (rent, materials, ...). Only used for profit reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub date: NaiveDateTime,
    pub description: String,
    pub amount: Decimal,
}

impl Expense {
    pub fn new<S: Into<String>>(
        date: NaiveDateTime,
        description: S,
        amount: Decimal,
    ) -> Result<Self, ValidationError> {
        let expense = Expense {
            id: String::new(),
            date,
            description: description.into(),
            amount,
        };
        expense.validate()?;
        Ok(expense)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("expense description", &self.description)?;
        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount("expense amount"));
        }
        Ok(())
    }
}
