//! Property-based tests for step conditions.

use proptest::prelude::*;

use carehome_shared::types::Money;

use crate::workflow::condition::{Attributes, Operator, Predicate, StepCondition};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Range conditions agree with plain integer comparison.
    #[test]
    fn prop_amount_range_matches_integer_comparison(
        amount in -1_000_000i64..1_000_000_000,
        min in prop::option::of(0i64..500_000_000),
        max in prop::option::of(0i64..1_000_000_000),
    ) {
        let mut cond = StepCondition::always();
        if let Some(min) = min {
            cond = cond.min_amount(Money::new(min));
        }
        if let Some(max) = max {
            cond = cond.max_amount(Money::new(max));
        }

        let expected = min.is_none_or(|m| amount >= m) && max.is_none_or(|m| amount <= m);
        prop_assert_eq!(cond.applies_to(&Attributes::with_amount(Money::new(amount))), expected);
    }

    /// `ne` is the negation of `eq`, `lt` of `gte`, `gt` of `lte`.
    #[test]
    fn prop_operator_complements(a in any::<i64>(), b in any::<i64>()) {
        let attrs = Attributes::new().with("x", Money::new(a));
        let holds = |op| Predicate::new("x", op, Money::new(b)).holds(&attrs);
        prop_assert_eq!(holds(Operator::Ne), !holds(Operator::Eq));
        prop_assert_eq!(holds(Operator::Lt), !holds(Operator::Gte));
        prop_assert_eq!(holds(Operator::Gt), !holds(Operator::Lte));
    }

    /// Conditions survive a JSON round trip through the stored format.
    #[test]
    fn prop_condition_json_round_trip(min in 0i64..1_000_000_000, max in 0i64..1_000_000_000) {
        let cond = StepCondition::always()
            .min_amount(Money::new(min))
            .max_amount(Money::new(max));
        let json = serde_json::to_value(&cond).unwrap();
        prop_assert_eq!(StepCondition::from_json(&json).unwrap(), cond);
    }
}
