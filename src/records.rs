//! Plain record keeping: students, groups, plans, the schedule and expenses.
//!
//! Everything here is validated before the first write and, like the ledger, runs as a short
//! saga against the store. Nothing in this module moves credit.

use crate::{
    decode::Snapshot,
    model::{
        require_text, Expense, Group, GroupId, NewStudent, ScheduleEvent,
        ScheduleEventException, Student, StudentStatus, SubscriptionPlan, ValidationError,
    },
    notify::{Mailer, ScheduleChange},
    occurrence::OccurrenceKey,
    saga::{step, SagaError},
    store::{patch, row_id, to_row, to_value, EntityStore, Filter, Row, StoreError, Table},
};
use chrono::NaiveDateTime;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;

// Columns only the ledger may write.
const LEDGER_OWNED_STUDENT_COLUMNS: [&str; 3] = ["balance", "status", "archived_date"];

fn status_patch(
    status: StudentStatus,
    archived_date: Option<NaiveDateTime>,
) -> Result<Row, StoreError> {
    Ok(patch(vec![
        ("status", to_value(&status)?),
        ("archived_date", to_value(&archived_date)?),
    ]))
}

/// Record keeping operations over a store, reading current state from a snapshot of it.
pub struct Records<'a, S: EntityStore, M: Mailer> {
    store: &'a mut S,
    snapshot: &'a Snapshot,
    mailer: &'a M,
}

impl<'a, S: EntityStore, M: Mailer> Records<'a, S, M> {
    pub fn new(store: &'a mut S, snapshot: &'a Snapshot, mailer: &'a M) -> Self {
        Records {
            store,
            snapshot,
            mailer,
        }
    }

    /// Insert `entity` and return it with the id the store gave it.
    fn insert<T: Serialize>(
        &mut self,
        name: &'static str,
        table: Table,
        entity: &T,
    ) -> Result<String, SagaError> {
        let row = step(name, to_row(entity).and_then(|row| self.store.insert(table, row)))?;
        step(name, row_id(table, &row))
    }

    /// Overwrite the stored row with `entity`, leaving out `skip` columns.
    fn replace<T: Serialize>(
        &mut self,
        name: &'static str,
        table: Table,
        id: &str,
        entity: &T,
        skip: &[&str],
    ) -> Result<bool, SagaError> {
        let mut row: Row = step(name, to_row(entity))?;
        row.remove("id");
        for column in skip {
            row.remove(*column);
        }

        let changed = step(name, self.store.update(table, &Filter::eq("id", id), row))?;
        Ok(changed > 0)
    }

    fn delete_by_id(
        &mut self,
        name: &'static str,
        table: Table,
        id: &str,
    ) -> Result<bool, SagaError> {
        let deleted = step(name, self.store.delete(table, &Filter::eq("id", id)))?;
        Ok(deleted > 0)
    }

    fn set(
        &mut self,
        name: &'static str,
        table: Table,
        filter: &Filter,
        column: &str,
        value: Value,
    ) -> Result<usize, SagaError> {
        step(
            name,
            self.store
                .update(table, filter, patch(vec![(column, value)])),
        )
    }

    /// Store a new student and send the parents a welcome e-mail.
    pub fn add_student(&mut self, student: &NewStudent) -> Result<Student, SagaError> {
        let mut student = student.build()?;
        student.id = self.insert("insert student", Table::Students, &student)?;

        info!("added student {} ({})", student.name, student.id);
        self.mailer.welcome(&student);

        Ok(student)
    }

    /// Store several students. All of them are checked before any is written.
    pub fn add_students(&mut self, students: &[NewStudent]) -> Result<Vec<Student>, SagaError> {
        let mut built = students
            .iter()
            .map(NewStudent::build)
            .collect::<Result<Vec<_>, _>>()?;

        for student in built.iter_mut() {
            student.id = self.insert("insert student", Table::Students, student)?;
        }
        for student in &built {
            self.mailer.welcome(student);
        }

        info!("added {} students", built.len());
        Ok(built)
    }

    /// Save a student's details. Balance and archive state are not touched.
    pub fn update_student(&mut self, student: &Student) -> Result<bool, SagaError> {
        require_text("student name", &student.name)?;
        if self.snapshot.student(&student.id).is_none() {
            return Ok(false);
        }

        self.replace(
            "update student",
            Table::Students,
            &student.id,
            student,
            &LEDGER_OWNED_STUDENT_COLUMNS,
        )
    }

    fn set_status(
        &mut self,
        name: &'static str,
        id: &str,
        status: StudentStatus,
        archived_date: Option<NaiveDateTime>,
    ) -> Result<bool, SagaError> {
        if self.snapshot.student(id).is_none() {
            return Ok(false);
        }

        let changed = step(
            name,
            status_patch(status, archived_date)
                .and_then(|row| self.store.update(Table::Students, &Filter::eq("id", id), row)),
        )?;
        Ok(changed > 0)
    }

    /// Take a student off the active list, keeping their history.
    pub fn archive_student(&mut self, id: &str, now: NaiveDateTime) -> Result<bool, SagaError> {
        self.set_status("archive student", id, StudentStatus::Archived, Some(now))
    }

    pub fn restore_student(&mut self, id: &str) -> Result<bool, SagaError> {
        self.set_status("restore student", id, StudentStatus::Active, None)
    }

    /// Delete students together with their attendance, transactions and subscriptions.
    /// Returns how many students went.
    pub fn delete_students(&mut self, ids: &[&str]) -> Result<usize, SagaError> {
        let mut deleted = 0;

        for id in ids {
            if self.snapshot.student(id).is_none() {
                debug!("not deleting unknown student {}", id);
                continue;
            }

            let owned = Filter::eq("student_id", *id);
            step("delete attendance", self.store.delete(Table::Attendance, &owned))?;
            step(
                "delete transactions",
                self.store.delete(Table::FinancialTransactions, &owned),
            )?;
            step(
                "delete subscriptions",
                self.store.delete(Table::StudentSubscriptions, &owned),
            )?;
            if self.delete_by_id("delete student", Table::Students, id)? {
                deleted += 1;
            }
        }

        info!("deleted {} students", deleted);
        Ok(deleted)
    }

    pub fn add_group(&mut self, name: &str) -> Result<Group, SagaError> {
        require_text("group name", name)?;

        let mut group = Group {
            id: String::new(),
            name: name.trim().to_owned(),
        };
        group.id = self.insert("insert group", Table::Groups, &group)?;

        Ok(group)
    }

    pub fn rename_group(&mut self, id: &str, name: &str) -> Result<bool, SagaError> {
        require_text("group name", name)?;
        if self.snapshot.group(id).is_none() {
            return Ok(false);
        }

        let changed = self.set(
            "rename group",
            Table::Groups,
            &Filter::eq("id", id),
            "name",
            Value::from(name.trim()),
        )?;
        Ok(changed > 0)
    }

    /// Delete a group. Its students, subscriptions and events stay, detached from it.
    pub fn delete_group(&mut self, id: &str) -> Result<bool, SagaError> {
        let snapshot = self.snapshot;
        if snapshot.group(id).is_none() {
            return Ok(false);
        }

        for student in snapshot.students.iter().filter(|s| s.in_group(id)) {
            let remaining: Vec<&GroupId> = student.group_ids.iter().filter(|g| *g != id).collect();
            let remaining = step("detach students", to_value(&remaining))?;
            self.set(
                "detach students",
                Table::Students,
                &Filter::eq("id", student.id.as_str()),
                "group_ids",
                remaining,
            )?;
        }
        self.set(
            "detach subscriptions",
            Table::StudentSubscriptions,
            &Filter::eq("assigned_group_id", id),
            "assigned_group_id",
            Value::Null,
        )?;
        self.set(
            "detach events",
            Table::ScheduleEvents,
            &Filter::eq("group_id", id),
            "group_id",
            Value::Null,
        )?;

        self.delete_by_id("delete group", Table::Groups, id)
    }

    fn clear_default_plans(&mut self) -> Result<(), SagaError> {
        self.set(
            "clear default plan",
            Table::SubscriptionPlans,
            &Filter::eq("is_default", true),
            "is_default",
            Value::Bool(false),
        )?;
        Ok(())
    }

    /// Store a new plan. A default plan replaces the previous default.
    pub fn add_plan(&mut self, plan: &SubscriptionPlan) -> Result<SubscriptionPlan, SagaError> {
        let mut plan = SubscriptionPlan::new(
            plan.name.as_str(),
            plan.price,
            plan.discount,
            plan.lesson_count,
        )
        .map(|checked| SubscriptionPlan {
            is_default: plan.is_default,
            ..checked
        })?;

        if plan.is_default {
            self.clear_default_plans()?;
        }
        plan.id = self.insert("insert plan", Table::SubscriptionPlans, &plan)?;

        Ok(plan)
    }

    pub fn update_plan(&mut self, plan: &SubscriptionPlan) -> Result<bool, SagaError> {
        if plan.is_system() {
            return Err(ValidationError::SystemPlan.into());
        }
        SubscriptionPlan::new(
            plan.name.as_str(),
            plan.price,
            plan.discount,
            plan.lesson_count,
        )?;
        if self.snapshot.plan(&plan.id).is_none() {
            return Ok(false);
        }

        if plan.is_default {
            self.clear_default_plans()?;
        }
        self.replace("update plan", Table::SubscriptionPlans, &plan.id, plan, &[])
    }

    /// Delete a plan. Subscriptions already sold from it are kept.
    pub fn delete_plan(&mut self, id: &str) -> Result<bool, SagaError> {
        match self.snapshot.plan(id) {
            Some(plan) if plan.is_system() => Err(ValidationError::SystemPlan.into()),
            Some(_) => self.delete_by_id("delete plan", Table::SubscriptionPlans, id),
            None => Ok(false),
        }
    }

    /// Make `id` the one plan offered by default.
    pub fn set_default_plan(&mut self, id: &str) -> Result<bool, SagaError> {
        match self.snapshot.plan(id) {
            Some(plan) if plan.is_system() => return Err(ValidationError::SystemPlan.into()),
            Some(_) => (),
            None => return Ok(false),
        }

        self.clear_default_plans()?;
        let changed = self.set(
            "set default plan",
            Table::SubscriptionPlans,
            &Filter::eq("id", id),
            "is_default",
            Value::Bool(true),
        )?;
        Ok(changed > 0)
    }

    /// Move a subscription to another group, or make it valid for any group.
    pub fn update_subscription_group(
        &mut self,
        subscription_id: &str,
        group_id: Option<&str>,
    ) -> Result<bool, SagaError> {
        if self.snapshot.subscription(subscription_id).is_none() {
            return Ok(false);
        }

        let changed = self.set(
            "update subscription group",
            Table::StudentSubscriptions,
            &Filter::eq("id", subscription_id),
            "assigned_group_id",
            group_id.map_or(Value::Null, Value::from),
        )?;
        Ok(changed > 0)
    }

    pub fn add_event(&mut self, event: &ScheduleEvent) -> Result<ScheduleEvent, SagaError> {
        event.validate()?;

        let mut event = event.clone();
        event.id = self.insert("insert event", Table::ScheduleEvents, &event)?;
        debug!("added event {} at {}", event.id, event.start);

        Ok(event)
    }

    /// Change a whole event, every occurrence of a series included.
    pub fn update_event(&mut self, event: &ScheduleEvent) -> Result<bool, SagaError> {
        event.validate()?;
        if self.snapshot.event(&event.id).is_none() {
            return Ok(false);
        }

        self.replace("update event", Table::ScheduleEvents, &event.id, event, &[])
    }

    /// Delete an event and every exception recorded against it.
    pub fn delete_event(&mut self, id: &str) -> Result<bool, SagaError> {
        if self.snapshot.event(id).is_none() {
            return Ok(false);
        }

        step(
            "delete exceptions",
            self.store
                .delete(Table::EventExceptions, &Filter::eq("original_event_id", id)),
        )?;
        self.delete_by_id("delete event", Table::ScheduleEvents, id)
    }

    fn save_exception(&mut self, exception: &ScheduleEventException) -> Result<(), SagaError> {
        step(
            "write exception",
            to_row(exception).and_then(|row| {
                self.store.upsert(
                    Table::EventExceptions,
                    row,
                    &["original_event_id", "original_start_time"],
                )
            }),
        )?;
        Ok(())
    }

    /// Replace one occurrence's title, group and times, leaving the rest of the series alone.
    ///
    /// When the occurrence moves, the parents of every active student in its group are told.
    /// Returns `Ok(None)` when the event no longer exists.
    pub fn edit_occurrence(
        &mut self,
        event_id: &str,
        occurrence: &OccurrenceKey,
        title: &str,
        group_id: Option<GroupId>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<ScheduleEventException>, SagaError> {
        let exception = ScheduleEventException::overriding(
            event_id,
            occurrence.clone(),
            title,
            group_id,
            start,
            end,
        )?;
        if self.snapshot.event(event_id).is_none() {
            return Ok(None);
        }

        self.save_exception(&exception)?;
        debug!("occurrence {} of event {} overridden", occurrence, event_id);

        let moved_from = occurrence.local_start();
        if moved_from != Some(start) {
            self.announce_move(&exception, moved_from, start);
        }

        Ok(Some(exception))
    }

    fn announce_move(
        &self,
        exception: &ScheduleEventException,
        moved_from: Option<NaiveDateTime>,
        moved_to: NaiveDateTime,
    ) {
        let group_id = match exception.new_group_id {
            Some(Some(ref group_id)) => group_id,
            _ => return,
        };

        let change = ScheduleChange {
            title: exception.new_title.clone().unwrap_or_default(),
            moved_from,
            moved_to,
        };
        for student in self
            .snapshot
            .active_students()
            .filter(|s| s.in_group(group_id))
        {
            self.mailer.schedule_change(student, &change);
        }
    }

    /// Drop one occurrence from a series. Returns `Ok(false)` when the event no longer exists.
    pub fn delete_occurrence(
        &mut self,
        event_id: &str,
        occurrence: &OccurrenceKey,
    ) -> Result<bool, SagaError> {
        if self.snapshot.event(event_id).is_none() {
            return Ok(false);
        }

        self.save_exception(&ScheduleEventException::deletion(event_id, occurrence.clone()))?;
        debug!("occurrence {} of event {} deleted", occurrence, event_id);

        Ok(true)
    }

    pub fn add_expense(&mut self, expense: &Expense) -> Result<Expense, SagaError> {
        expense.validate()?;

        let mut expense = expense.clone();
        expense.id = self.insert("insert expense", Table::Expenses, &expense)?;

        Ok(expense)
    }

    pub fn update_expense(&mut self, expense: &Expense) -> Result<bool, SagaError> {
        expense.validate()?;
        if self.snapshot.expense(&expense.id).is_none() {
            return Ok(false);
        }

        self.replace("update expense", Table::Expenses, &expense.id, expense, &[])
    }

    pub fn delete_expense(&mut self, id: &str) -> Result<bool, SagaError> {
        if self.snapshot.expense(id).is_none() {
            return Ok(false);
        }

        self.delete_by_id("delete expense", Table::Expenses, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        recurrence::expand,
        store::MemoryStore,
        test_utils::{
            at, init_logger, plan, seed, student, subscription, FailingStore, RecordingMailer,
        },
        SYSTEM_PLAN_ID,
    };
    use rust_decimal_macros::dec;

    struct Office {
        store: MemoryStore,
        mailer: RecordingMailer,
        config: Config,
    }

    impl Office {
        fn new(store: MemoryStore) -> Self {
            init_logger();
            Office {
                store,
                mailer: RecordingMailer::default(),
                config: Config::default(),
            }
        }

        fn snapshot(&self) -> Snapshot {
            Snapshot::load(&self.store, &self.config).unwrap()
        }

        fn run<T, F>(&mut self, f: F) -> T
        where
            F: FnOnce(&mut Records<'_, MemoryStore, RecordingMailer>) -> T,
        {
            let snapshot = self.snapshot();
            let mut records = Records::new(&mut self.store, &snapshot, &self.mailer);
            f(&mut records)
        }
    }

    fn group(id: &str, name: &str) -> Group {
        Group {
            id: id.to_owned(),
            name: name.to_owned(),
        }
    }

    #[test]
    fn adding_a_student_welcomes_the_family() {
        let mut office = Office::new(MemoryStore::new());
        let mut new = NewStudent::new("  Anna ");
        new.with_parent("Maria", "+7 900").with_email("maria@example.com");

        let anna = office.run(|r| r.add_student(&new)).unwrap();
        assert!(!anna.id.is_empty());
        assert_eq!(anna.name, "Anna");

        let stored = office.snapshot();
        assert_eq!(stored.student(&anna.id).unwrap().parent_name, "Maria");
        assert_eq!(office.mailer.sent(), vec![("welcome", anna.id.clone())]);
    }

    #[test]
    fn add_students_checks_everyone_first() {
        let mut office = Office::new(MemoryStore::new());
        let students = vec![NewStudent::new("Anna"), NewStudent::new(" ")];

        let err = office.run(|r| r.add_students(&students)).unwrap_err();
        assert!(matches!(
            err,
            SagaError::Validation(ValidationError::EmptyField("student name"))
        ));
        assert!(office.snapshot().students.is_empty());
        assert!(office.mailer.sent().is_empty());

        let students = vec![NewStudent::new("Anna"), NewStudent::new("Boris")];
        let added = office.run(|r| r.add_students(&students)).unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(office.snapshot().students.len(), 2);
        assert_eq!(office.mailer.sent().len(), 2);
    }

    #[test]
    fn updating_a_student_leaves_the_balance_alone() {
        let store = seed(MemoryStore::new(), Table::Students, &[student("s1", dec!(700))]);
        let mut office = Office::new(store);

        let mut changed = student("s1", dec!(0));
        changed.name = "Renamed".to_owned();
        changed.group_ids = vec!["g1".to_owned()];
        assert!(office.run(|r| r.update_student(&changed)).unwrap());

        let stored = office.snapshot().student("s1").cloned().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.group_ids, vec!["g1".to_owned()]);
        assert_eq!(stored.balance, dec!(700));

        let ghost = student("ghost", dec!(0));
        assert!(!office.run(|r| r.update_student(&ghost)).unwrap());
    }

    #[test]
    fn archive_and_restore() {
        let store = seed(MemoryStore::new(), Table::Students, &[student("s1", dec!(0))]);
        let mut office = Office::new(store);
        let now = at(2024, 5, 1, 9, 30);

        assert!(office.run(|r| r.archive_student("s1", now)).unwrap());
        let archived = office.snapshot().student("s1").cloned().unwrap();
        assert_eq!(archived.status, StudentStatus::Archived);
        assert_eq!(archived.archived_date, Some(now));
        assert_eq!(office.snapshot().active_students().count(), 0);

        assert!(office.run(|r| r.restore_student("s1")).unwrap());
        let restored = office.snapshot().student("s1").cloned().unwrap();
        assert!(restored.is_active());
        assert_eq!(restored.archived_date, None);

        assert!(!office.run(|r| r.archive_student("ghost", now)).unwrap());
    }

    #[test]
    fn deleting_students_takes_their_records_along() {
        let store = seed(
            MemoryStore::new(),
            Table::Students,
            &[student("s1", dec!(0)), student("s2", dec!(0))],
        );
        let store = seed(
            store,
            Table::StudentSubscriptions,
            &[
                subscription("sub1", "s1", dec!(4000), 8, 0),
                subscription("sub2", "s2", dec!(4000), 8, 0),
            ],
        );
        let mut office = Office::new(store);

        assert_eq!(office.run(|r| r.delete_students(&["s1", "ghost"])).unwrap(), 1);

        let snapshot = office.snapshot();
        assert!(snapshot.student("s1").is_none());
        assert!(snapshot.subscription("sub1").is_none());
        assert!(snapshot.subscription("sub2").is_some());
    }

    #[test]
    fn deleting_a_group_detaches_everything() {
        let mut member = student("s1", dec!(0));
        member.group_ids = vec!["g1".to_owned(), "g2".to_owned()];
        let mut assigned = subscription("sub1", "s1", dec!(4000), 8, 0);
        assigned.assigned_group_id = Some("g1".to_owned());
        let event = ScheduleEvent {
            id: "e1".to_owned(),
            ..ScheduleEvent::new(
                "Grammar",
                Some("g1".to_owned()),
                at(2024, 1, 1, 10, 0),
                at(2024, 1, 1, 11, 0),
                true,
            )
            .unwrap()
        };

        let store = seed(MemoryStore::new(), Table::Students, &[member]);
        let store = seed(store, Table::Groups, &[group("g1", "Juniors"), group("g2", "Seniors")]);
        let store = seed(store, Table::StudentSubscriptions, &[assigned]);
        let store = seed(store, Table::ScheduleEvents, &[event]);
        let mut office = Office::new(store);

        assert!(office.run(|r| r.delete_group("g1")).unwrap());

        let snapshot = office.snapshot();
        assert!(snapshot.group("g1").is_none());
        assert_eq!(snapshot.student("s1").unwrap().group_ids, vec!["g2".to_owned()]);
        assert_eq!(snapshot.subscription("sub1").unwrap().assigned_group_id, None);
        assert_eq!(snapshot.event("e1").unwrap().group_id, None);

        assert!(!office.run(|r| r.delete_group("g1")).unwrap());
    }

    #[test]
    fn groups_need_a_name() {
        let mut office = Office::new(MemoryStore::new());
        assert!(office.run(|r| r.add_group("")).is_err());

        let group = office.run(|r| r.add_group("Juniors")).unwrap();
        assert!(office.run(|r| r.rename_group(&group.id, "Seniors")).unwrap());
        assert_eq!(office.snapshot().group(&group.id).unwrap().name, "Seniors");
    }

    #[test]
    fn only_one_plan_is_the_default() {
        let mut first = plan("p1", dec!(4000), 8);
        first.is_default = true;
        let store = seed(
            MemoryStore::new(),
            Table::SubscriptionPlans,
            &[first, plan("p2", dec!(2000), 4)],
        );
        let mut office = Office::new(store);

        assert!(office.run(|r| r.set_default_plan("p2")).unwrap());
        assert_eq!(office.snapshot().default_plan().unwrap().id, "p2");

        let mut third = plan("", dec!(1000), 2);
        third.is_default = true;
        let third = office.run(|r| r.add_plan(&third)).unwrap();

        let snapshot = office.snapshot();
        let defaults: Vec<&str> = snapshot
            .plans()
            .filter(|p| p.is_default)
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(defaults, vec![third.id.as_str()]);
    }

    #[test]
    fn the_system_plan_cannot_change() {
        let system = SubscriptionPlan {
            id: SYSTEM_PLAN_ID.to_owned(),
            ..plan("x", dec!(0), 1)
        };
        let store = seed(MemoryStore::new(), Table::SubscriptionPlans, &[system.clone()]);
        let mut office = Office::new(store);

        for result in vec![
            office.run(|r| r.update_plan(&system)),
            office.run(|r| r.delete_plan(SYSTEM_PLAN_ID)),
            office.run(|r| r.set_default_plan(SYSTEM_PLAN_ID)),
        ] {
            assert!(matches!(
                result,
                Err(SagaError::Validation(ValidationError::SystemPlan))
            ));
        }
        assert!(office.snapshot().plan(SYSTEM_PLAN_ID).is_some());
    }

    #[test]
    fn plan_checks() {
        let mut office = Office::new(MemoryStore::new());
        let mut bad = plan("", dec!(100), 1);
        bad.discount = dec!(200);
        assert!(matches!(
            office.run(|r| r.add_plan(&bad)),
            Err(SagaError::Validation(ValidationError::DiscountExceedsPrice { .. }))
        ));
        assert!(office.snapshot().plans().next().is_none());
    }

    #[test]
    fn reassigning_a_subscription_group() {
        let store = seed(
            MemoryStore::new(),
            Table::StudentSubscriptions,
            &[subscription("sub1", "s1", dec!(4000), 8, 0)],
        );
        let mut office = Office::new(store);

        assert!(office
            .run(|r| r.update_subscription_group("sub1", Some("g2")))
            .unwrap());
        assert_eq!(
            office.snapshot().subscription("sub1").unwrap().assigned_group_id,
            Some("g2".to_owned())
        );

        assert!(office.run(|r| r.update_subscription_group("sub1", None)).unwrap());
        assert_eq!(
            office.snapshot().subscription("sub1").unwrap().assigned_group_id,
            None
        );
    }

    fn weekly_grammar(office: &mut Office) -> ScheduleEvent {
        let event = ScheduleEvent::new(
            "Grammar",
            Some("g1".to_owned()),
            at(2024, 1, 1, 10, 0),
            at(2024, 1, 1, 11, 0),
            true,
        )
        .unwrap();
        office.run(|r| r.add_event(&event)).unwrap()
    }

    #[test]
    fn events_are_checked_before_saving() {
        let mut office = Office::new(MemoryStore::new());
        let mut event = weekly_grammar(&mut office);

        event.end = event.start;
        assert!(matches!(
            office.run(|r| r.update_event(&event)),
            Err(SagaError::Validation(ValidationError::EmptyEvent { .. }))
        ));

        event.end = at(2024, 1, 1, 12, 0);
        assert!(office.run(|r| r.update_event(&event)).unwrap());
        assert_eq!(office.snapshot().event(&event.id).unwrap().end, event.end);
    }

    #[test]
    fn editing_one_occurrence_twice_keeps_one_exception() {
        let mut member = student("s1", dec!(0));
        member.group_ids = vec!["g1".to_owned()];
        member.parent_email = Some("parent@example.com".to_owned());
        let mut office = Office::new(seed(MemoryStore::new(), Table::Students, &[member]));
        let event = weekly_grammar(&mut office);
        let key = OccurrenceKey::from_local(at(2024, 2, 5, 10, 0));

        for title in ["Speaking", "Reading"] {
            let saved = office
                .run(|r| {
                    r.edit_occurrence(
                        &event.id,
                        &key,
                        title,
                        Some("g1".to_owned()),
                        at(2024, 2, 6, 15, 0),
                        at(2024, 2, 6, 16, 0),
                    )
                })
                .unwrap();
            assert!(saved.is_some());
        }

        let snapshot = office.snapshot();
        assert_eq!(snapshot.exceptions.len(), 1);
        assert_eq!(snapshot.exceptions[0].new_title.as_deref(), Some("Reading"));

        let visible = expand(&snapshot.events, &snapshot.exceptions, 52);
        let moved: Vec<_> = visible
            .iter()
            .filter(|e| e.occurrence_key == key)
            .collect();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].title, "Reading");
        assert_eq!(moved[0].start, at(2024, 2, 6, 15, 0));

        assert_eq!(
            office.mailer.sent(),
            vec![
                ("schedule_change", "s1".to_owned()),
                ("schedule_change", "s1".to_owned())
            ]
        );
    }

    #[test]
    fn retitling_in_place_sends_nothing() {
        let mut member = student("s1", dec!(0));
        member.group_ids = vec!["g1".to_owned()];
        let mut office = Office::new(seed(MemoryStore::new(), Table::Students, &[member]));
        let event = weekly_grammar(&mut office);
        let key = OccurrenceKey::from_local(at(2024, 2, 5, 10, 0));

        office
            .run(|r| {
                r.edit_occurrence(
                    &event.id,
                    &key,
                    "Speaking",
                    Some("g1".to_owned()),
                    at(2024, 2, 5, 10, 0),
                    at(2024, 2, 5, 11, 0),
                )
            })
            .unwrap();
        assert!(office.mailer.sent().is_empty());
    }

    #[test]
    fn deleting_occurrences_and_series() {
        let mut office = Office::new(MemoryStore::new());
        let event = weekly_grammar(&mut office);
        let key = OccurrenceKey::from_local(at(2024, 1, 8, 10, 0));

        assert!(office.run(|r| r.delete_occurrence(&event.id, &key)).unwrap());
        let snapshot = office.snapshot();
        assert_eq!(expand(&snapshot.events, &snapshot.exceptions, 52).len(), 52);

        assert!(office.run(|r| r.delete_event(&event.id)).unwrap());
        let snapshot = office.snapshot();
        assert!(snapshot.events.is_empty());
        assert!(snapshot.exceptions.is_empty());

        assert!(!office.run(|r| r.delete_occurrence(&event.id, &key)).unwrap());
        assert_eq!(
            office
                .run(|r| {
                    r.edit_occurrence(
                        &event.id,
                        &key,
                        "Gone",
                        None,
                        at(2024, 1, 8, 10, 0),
                        at(2024, 1, 8, 11, 0),
                    )
                })
                .unwrap(),
            None
        );
    }

    #[test]
    fn expenses() {
        let mut office = Office::new(MemoryStore::new());
        assert!(office
            .run(|r| r.add_expense(&Expense {
                id: String::new(),
                date: at(2024, 3, 1, 9, 0),
                description: "Rent".to_owned(),
                amount: dec!(0),
            }))
            .is_err());

        let rent = Expense::new(at(2024, 3, 1, 9, 0), "Rent", dec!(15000)).unwrap();
        let mut rent = office.run(|r| r.add_expense(&rent)).unwrap();
        rent.amount = dec!(16000);
        assert!(office.run(|r| r.update_expense(&rent)).unwrap());
        assert_eq!(office.snapshot().expense(&rent.id).unwrap().amount, dec!(16000));

        assert!(office.run(|r| r.delete_expense(&rent.id)).unwrap());
        assert!(!office.run(|r| r.delete_expense(&rent.id)).unwrap());
    }

    #[test]
    fn failed_cascade_step_is_named() {
        let store = seed(MemoryStore::new(), Table::Students, &[student("s1", dec!(0))]);
        let mut store = FailingStore::new(store, 2);
        let snapshot = Snapshot::load(&store, &Config::default()).unwrap();
        let mailer = RecordingMailer::default();

        let err = Records::new(&mut store, &snapshot, &mailer)
            .delete_students(&["s1"])
            .unwrap_err();
        assert_eq!(err.failed_step(), Some("delete transactions"));
        assert!(store.inner.rows(Table::Students).len() == 1);
    }
}
