//! Property-based test generators using proptest.
//!
//! Generated inputs always pass record validation: names are non-blank and
//! amounts are non-negative with at most two decimal places.

use proptest::prelude::*;
use walletsync_core::{Decimal, NewCategory, NewExpense, Timestamp, UserId};

/// Strategy for user ids.
pub fn user_id_strategy() -> impl Strategy<Value = UserId> {
    prop::string::string_regex("user-[a-z0-9]{1,8}")
        .expect("Invalid regex")
        .prop_map(UserId::new)
}

/// Strategy for merchant names.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,12}( [A-Z][a-z]{1,10})?").expect("Invalid regex")
}

/// Strategy for category names.
pub fn category_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][a-z]{2,14}").expect("Invalid regex")
}

/// Strategy for money amounts from 0.00 to 99 999.99.
pub fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for timestamps in 2020 through 2029, millisecond precision.
pub fn timestamp_strategy() -> impl Strategy<Value = Timestamp> {
    // 2020-01-01T00:00:00Z .. 2030-01-01T00:00:00Z in milliseconds.
    (1_577_836_800_000i64..1_893_456_000_000).prop_map(|millis| {
        let at = chrono::DateTime::from_timestamp_millis(millis).expect("in range");
        Timestamp::from_datetime(at)
    })
}

/// Strategy for expense inputs owned by `user`.
pub fn new_expense_strategy(user: UserId) -> impl Strategy<Value = NewExpense> {
    (
        store_name_strategy(),
        amount_strategy(),
        category_name_strategy(),
        timestamp_strategy(),
        prop::option::of("https://img\\.example\\.com/[a-z0-9]{6}\\.jpg"),
    )
        .prop_map(move |(shop, amount, category, date, image)| {
            let new = NewExpense::new(user.clone(), shop, amount, category).at(date);
            match image {
                Some(url) => new.with_image(url),
                None => new,
            }
        })
}

/// Strategy for category inputs owned by `user`.
pub fn new_category_strategy(user: UserId) -> impl Strategy<Value = NewCategory> {
    (category_name_strategy(), amount_strategy())
        .prop_map(move |(name, limit)| NewCategory::new(user.clone(), name, limit))
}

/// Strategy for up to `max` expense inputs with distinct natural keys.
pub fn distinct_expenses_strategy(
    user: UserId,
    max: usize,
) -> impl Strategy<Value = Vec<NewExpense>> {
    prop::collection::vec(new_expense_strategy(user), 0..=max).prop_map(|mut all| {
        let mut seen = std::collections::HashSet::new();
        all.retain(|e| {
            seen.insert((
                e.store_name.clone(),
                e.category.clone(),
                e.amount.normalize(),
                e.date,
            ))
        });
        all
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_user, with_memory_store};

    proptest! {
        #[test]
        fn generated_expenses_are_storable(new in new_expense_strategy(sample_user())) {
            with_memory_store(|store| {
                let stored = store.insert_expense(new.clone()).unwrap();
                prop_assert_eq!(stored.amount, new.amount);
                prop_assert!(stored.is_pending());
                Ok(())
            })?;
        }

        #[test]
        fn generated_categories_are_storable(new in new_category_strategy(sample_user())) {
            with_memory_store(|store| {
                let stored = store.insert_category(new.clone()).unwrap();
                prop_assert_eq!(stored.name, new.name);
                Ok(())
            })?;
        }

        #[test]
        fn distinct_expenses_keep_their_count(all in distinct_expenses_strategy(sample_user(), 12)) {
            with_memory_store(|store| {
                for new in &all {
                    store.insert_expense(new.clone()).unwrap();
                }
                prop_assert_eq!(store.expenses_for_user(&sample_user()).len(), all.len());
                Ok(())
            })?;
        }
    }
}
