//! Countersigning requirements derived from case flags.

use std::collections::BTreeSet;

use crate::domain::advice::{CountersignAdvice, CountersignOrder};
use crate::domain::case::Case;
use crate::errors::DomainError;

const FIRST_COUNTERSIGN_FLAGS: [&str; 4] =
    ["LU_COUNTER_REQUIRED", "LU_SENIOR_MANAGER_CHECK_REQUIRED", "MANPADS", "AP_LANDMINE"];
const SECOND_COUNTERSIGN_FLAGS: [&str; 2] = ["LU_SENIOR_MANAGER_CHECK_REQUIRED", "MANPADS"];

pub fn required_orders(case: &Case) -> BTreeSet<CountersignOrder> {
    let flags = case.all_flags();
    let mut orders = BTreeSet::new();
    if FIRST_COUNTERSIGN_FLAGS.iter().any(|flag| flags.contains(*flag)) {
        orders.insert(CountersignOrder::First);
    }
    if SECOND_COUNTERSIGN_FLAGS.iter().any(|flag| flags.contains(*flag)) {
        orders.insert(CountersignOrder::Second);
    }
    orders
}

/// Every required order needs a valid, accepted countersignature.
pub fn ensure_complete(case: &Case, countersignatures: &[CountersignAdvice]) -> Result<(), DomainError> {
    let missing_orders: Vec<u8> = required_orders(case)
        .into_iter()
        .filter(|order| {
            !countersignatures.iter().any(|signature| {
                signature.case_id == case.id
                    && signature.order == *order
                    && signature.valid
                    && signature.outcome_accepted
            })
        })
        .map(|order| order.as_u8())
        .collect();

    if missing_orders.is_empty() {
        Ok(())
    } else {
        Err(DomainError::CountersignIncomplete { missing_orders })
    }
}

/// After advice is edited following a rejection, every valid countersignature
/// up to the highest rejected order is invalidated. Returns the ids touched.
pub fn invalidate_rejected(countersignatures: &mut [CountersignAdvice]) -> Vec<String> {
    let Some(max_rejected) = countersignatures
        .iter()
        .filter(|signature| signature.valid && !signature.outcome_accepted)
        .map(|signature| signature.order)
        .max()
    else {
        return Vec::new();
    };

    countersignatures
        .iter_mut()
        .filter(|signature| signature.valid && signature.order <= max_rejected)
        .map(|signature| {
            signature.valid = false;
            signature.id.clone()
        })
        .collect()
}
