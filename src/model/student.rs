use super::{require_text, GroupId, StudentId, ValidationError};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Active,
    Archived,
}

/// A student and the cached state of their credit.
///
/// `balance` is stored credit (negative means the family owes money). It is a rollup of the
/// student's credit-changing transactions and is only ever moved by the ledger alongside the
/// transaction that justifies the change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub parent_name: String,
    #[serde(rename = "parent_phone1")]
    pub parent_phone: String,
    pub parent_email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub balance: Decimal,
    pub status: StudentStatus,
    pub archived_date: Option<NaiveDateTime>,
    pub group_ids: Vec<GroupId>,
}

impl Student {
    pub fn is_active(&self) -> bool {
        self.status == StudentStatus::Active
    }

    pub fn in_group(&self, group_id: &str) -> bool {
        self.group_ids.iter().any(|g| g == group_id)
    }

    /// Archived students keep their history but take no part in scheduling or billing.
    pub fn ensure_active(&self) -> Result<(), ValidationError> {
        if !self.is_active() {
            return Err(ValidationError::ArchivedStudent(self.id.clone()));
        }
        Ok(())
    }
}

/// A student that has not been stored yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    name: String,
    parent_name: String,
    parent_phone: String,
    parent_email: Option<String>,
    birth_date: Option<NaiveDate>,
    group_ids: Vec<GroupId>,
}

impl NewStudent {
    pub fn new<S: Into<String>>(name: S) -> Self {
        NewStudent {
            name: name.into(),
            parent_name: String::new(),
            parent_phone: String::new(),
            parent_email: None,
            birth_date: None,
            group_ids: Vec::new(),
        }
    }

    pub fn with_parent<S: Into<String>>(&mut self, name: S, phone: S) -> &mut Self {
        self.parent_name = name.into();
        self.parent_phone = phone.into();
        self
    }

    pub fn with_email<S: Into<String>>(&mut self, email: S) -> &mut Self {
        self.parent_email = Some(email.into());
        self
    }

    pub fn with_birth_date(&mut self, date: NaiveDate) -> &mut Self {
        self.birth_date = Some(date);
        self
    }

    pub fn with_group<S: Into<GroupId>>(&mut self, group_id: S) -> &mut Self {
        let group_id = group_id.into();
        if !self.group_ids.contains(&group_id) {
            self.group_ids.push(group_id);
        }
        self
    }

    /// Check the input and turn it into an unsaved `Student` with an empty balance.
    pub fn build(&self) -> Result<Student, ValidationError> {
        require_text("student name", &self.name)?;

        Ok(Student {
            id: String::new(),
            name: self.name.trim().to_owned(),
            parent_name: self.parent_name.clone(),
            parent_phone: self.parent_phone.clone(),
            parent_email: self.parent_email.clone(),
            birth_date: self.birth_date,
            balance: Decimal::ZERO,
            status: StudentStatus::Active,
            archived_date: None,
            group_ids: self.group_ids.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}
