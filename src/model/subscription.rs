use super::{
    require_non_negative, require_text, GroupId, PlanId, StudentId, SubscriptionId,
    ValidationError,
};
use crate::SYSTEM_PLAN_ID;
use chrono::NaiveDateTime;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Pro-rated refunds are paid out in whole currency units.
pub const REFUND_PRECISION: u32 = 0;

/// A purchasable lesson package
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionPlan {
    pub id: PlanId,
    pub name: String,
    pub price: Decimal,
    pub discount: Decimal,
    pub lesson_count: u32,
    pub is_default: bool,
}

impl SubscriptionPlan {
    /// Check the input and turn it into an unsaved plan.
    pub fn new<S: Into<String>>(
        name: S,
        price: Decimal,
        discount: Decimal,
        lesson_count: u32,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        require_text("plan name", &name)?;
        require_non_negative("price", price)?;
        require_non_negative("discount", discount)?;
        if discount > price {
            return Err(ValidationError::DiscountExceedsPrice { price, discount });
        }
        if lesson_count == 0 {
            return Err(ValidationError::NoLessons);
        }

        Ok(SubscriptionPlan {
            id: String::new(),
            name,
            price,
            discount,
            lesson_count,
            is_default: false,
        })
    }

    pub fn is_system(&self) -> bool {
        self.id == SYSTEM_PLAN_ID
    }

    /// The price a student pays for this plan
    pub fn final_price(&self) -> Decimal {
        (self.price - self.discount).max(Decimal::ZERO)
    }

    pub fn lesson_price(&self) -> Decimal {
        per_lesson(self.final_price(), self.lesson_count)
    }
}

/// A plan purchased by a student, with its credit usage.
///
/// `lessons_attended` never exceeds `lessons_total` and is only moved by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentSubscription {
    pub id: SubscriptionId,
    pub student_id: StudentId,
    #[serde(rename = "subscription_plan_id")]
    pub plan_id: PlanId,
    pub purchase_date: NaiveDateTime,
    pub price_paid: Decimal,
    pub lessons_total: u32,
    pub lessons_attended: u32,
    /// When set, only attendance in this group may consume the credit.
    pub assigned_group_id: Option<GroupId>,
}

impl StudentSubscription {
    pub fn remaining_lessons(&self) -> u32 {
        self.lessons_total.saturating_sub(self.lessons_attended)
    }

    pub fn has_credit(&self) -> bool {
        self.lessons_attended < self.lessons_total
    }

    /// Whether attendance in `group_id` may consume this subscription's credit
    pub fn covers_group(&self, group_id: &str) -> bool {
        match self.assigned_group_id {
            Some(ref assigned) => assigned == group_id,
            None => true,
        }
    }

    /// Zero when the subscription grants no lessons.
    pub fn lesson_price(&self) -> Decimal {
        per_lesson(self.price_paid, self.lessons_total)
    }

    /// The value of lessons bought but not used yet, unrounded
    pub fn remaining_value(&self) -> Decimal {
        self.lesson_price() * Decimal::from(self.remaining_lessons())
    }

    /// The amount returned when this subscription is cancelled now.
    pub fn refund_amount(&self) -> Decimal {
        self.remaining_value()
            .round_dp_with_strategy(REFUND_PRECISION, RoundingStrategy::MidpointAwayFromZero)
    }
}

fn per_lesson(price: Decimal, lessons: u32) -> Decimal {
    if lessons == 0 {
        return Decimal::ZERO;
    }
    price / Decimal::from(lessons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::at;
    use rust_decimal_macros::dec;

    fn subscription(price: Decimal, total: u32, attended: u32) -> StudentSubscription {
        StudentSubscription {
            id: "sub".into(),
            student_id: "s1".into(),
            plan_id: "p1".into(),
            purchase_date: at(2024, 1, 10, 12, 0),
            price_paid: price,
            lessons_total: total,
            lessons_attended: attended,
            assigned_group_id: None,
        }
    }

    #[test]
    fn refund_amount_prorates_unused_lessons() {
        let sub = subscription(dec!(4000), 8, 3);
        assert_eq!(sub.lesson_price(), dec!(500));
        assert_eq!(sub.refund_amount(), dec!(2500));
    }

    #[test]
    fn refund_amount_rounds_half_away_from_zero() {
        // 1001 / 8 = 125.125 per lesson, 3 left -> 375.375
        assert_eq!(subscription(dec!(1001), 8, 5).refund_amount(), dec!(375));
        // 3 / 2 = 1.5 per lesson, one left -> 1.5 -> 2
        assert_eq!(subscription(dec!(3), 2, 1).refund_amount(), dec!(2));
    }

    #[test]
    fn refund_amount_repeating_fraction() {
        // 4000 / 3 * 2 = 2666.66...
        assert_eq!(subscription(dec!(4000), 3, 1).refund_amount(), dec!(2667));
    }

    #[test]
    fn zero_lesson_subscription_is_worth_nothing() {
        let sub = subscription(dec!(4000), 0, 0);
        assert_eq!(sub.lesson_price(), Decimal::ZERO);
        assert_eq!(sub.refund_amount(), Decimal::ZERO);
        assert!(!sub.has_credit());
    }

    #[test]
    fn fully_used_subscription_refunds_nothing() {
        let sub = subscription(dec!(4000), 8, 8);
        assert_eq!(sub.remaining_lessons(), 0);
        assert_eq!(sub.refund_amount(), Decimal::ZERO);
    }

    #[test]
    fn covers_group() {
        let mut sub = subscription(dec!(4000), 8, 0);
        assert!(sub.covers_group("g1"));

        sub.assigned_group_id = Some("g2".into());
        assert!(!sub.covers_group("g1"));
        assert!(sub.covers_group("g2"));
    }

    #[test]
    fn plan_final_price_and_lesson_price() {
        let plan = SubscriptionPlan::new("Monthly", dec!(5000), dec!(1000), 8).unwrap();
        assert_eq!(plan.final_price(), dec!(4000));
        assert_eq!(plan.lesson_price(), dec!(500));
        assert!(!plan.is_system());
    }

    #[test]
    fn plan_validation() {
        assert_eq!(
            SubscriptionPlan::new("", dec!(1), dec!(0), 1),
            Err(ValidationError::EmptyField("plan name"))
        );
        assert_eq!(
            SubscriptionPlan::new("A", dec!(-1), dec!(0), 1),
            Err(ValidationError::NegativeAmount("price", dec!(-1)))
        );
        assert_eq!(
            SubscriptionPlan::new("A", dec!(100), dec!(150), 1),
            Err(ValidationError::DiscountExceedsPrice {
                price: dec!(100),
                discount: dec!(150)
            })
        );
        assert_eq!(
            SubscriptionPlan::new("A", dec!(100), dec!(0), 0),
            Err(ValidationError::NoLessons)
        );
    }
}
