//! Pure payout computations over allocation lists.
//!
//! These mirror the adjudicator's on-chain effects exactly, so the wallet
//! can predict holdings and remaining allocations without a chain
//! round-trip. All arithmetic is `u128`; amounts in a channel never
//! approach that range.

use crate::state::{decode_guarantee_data, Allocation, AllocationType, StateError};

/// Result of applying holdings to an allocation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEffects {
    /// Allocations after payouts are deducted.
    pub new_allocations: Vec<Allocation>,
    /// True when every remaining allocation amount is zero.
    pub allocates_only_zeros: bool,
    /// Payouts, aligned with `indices` (or with the full list when
    /// `indices` is empty).
    pub exit_allocations: Vec<Allocation>,
    /// Sum of all payouts.
    pub total_payouts: u128,
}

/// Result of claiming a guarantee against a target allocation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimEffects {
    /// Source allocations with the guarantee amount reduced by payouts.
    pub new_source_allocations: Vec<Allocation>,
    /// Target allocations after payouts are deducted.
    pub new_target_allocations: Vec<Allocation>,
    /// Per-target-item payouts.
    pub exit_allocations: Vec<Allocation>,
    /// Sum of all payouts.
    pub total_payouts: u128,
}

/// Errors from outcome computations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutcomeError {
    /// Claiming requires the source item to be a guarantee.
    #[error("Source allocation {index} is not a guarantee")]
    NotAGuarantee {
        /// Offending source index.
        index: usize,
    },

    /// The source index exceeds the allocation list.
    #[error("Source allocation index {index} out of range ({len} items)")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Allocation list length.
        len: usize,
    },

    /// Guarantee metadata failed to decode.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Apply `initial_holdings` to `allocations` in declared order.
///
/// Each item affords `min(item.amount, remaining_surplus)`. Items named in
/// `indices` (ascending; empty means all) are paid out and deducted; items
/// not named still consume surplus, so later items see the same funding
/// picture either way.
pub fn compute_transfer_effects(
    initial_holdings: u128,
    allocations: &[Allocation],
    indices: &[usize],
) -> TransferEffects {
    let mut total_payouts: u128 = 0;
    let mut new_allocations = Vec::with_capacity(allocations.len());
    let mut exit_allocations: Vec<Allocation> = Vec::new();
    let mut allocates_only_zeros = true;
    let mut surplus = initial_holdings;
    let mut k = 0;

    for (i, item) in allocations.iter().enumerate() {
        let mut new_item = item.clone();
        let affords = item.amount.min(surplus);
        if indices.is_empty() || (k < indices.len() && indices[k] == i) {
            new_item.amount = item.amount - affords;
            let mut exit = item.clone();
            exit.amount = affords;
            exit_allocations.push(exit);
            total_payouts += affords;
            k += 1;
        }
        if new_item.amount != 0 {
            allocates_only_zeros = false;
        }
        surplus -= affords;
        new_allocations.push(new_item);
    }

    TransferEffects {
        new_allocations,
        allocates_only_zeros,
        exit_allocations,
        total_payouts,
    }
}

/// Claim the guarantee at `index_of_target_in_source` against
/// `target_allocations`.
///
/// Source items before the guarantee consume surplus first. The remaining
/// surplus, capped by the guarantee amount, is walked over the guarantee's
/// destination list in declared order; the first target item matching each
/// destination affords `min(item.amount, remaining)`. The afforded amount
/// reduces the remaining surplus whether or not the item's index appears
/// in `target_indices`, which is what makes the overlap tie-break
/// deterministic.
pub fn compute_claim_effects(
    initial_holdings: u128,
    source_allocations: &[Allocation],
    target_allocations: &[Allocation],
    index_of_target_in_source: usize,
    target_indices: &[usize],
) -> Result<ClaimEffects, OutcomeError> {
    let guarantee = source_allocations.get(index_of_target_in_source).ok_or(
        OutcomeError::IndexOutOfRange {
            index: index_of_target_in_source,
            len: source_allocations.len(),
        },
    )?;
    if guarantee.allocation_type != AllocationType::Guarantee {
        return Err(OutcomeError::NotAGuarantee {
            index: index_of_target_in_source,
        });
    }
    let guarantee_destinations = decode_guarantee_data(&guarantee.metadata)?;

    let mut new_source_allocations: Vec<Allocation> = source_allocations.to_vec();
    let mut new_target_allocations: Vec<Allocation> = target_allocations.to_vec();
    let mut exit_allocations: Vec<Allocation> = target_allocations
        .iter()
        .map(|item| {
            let mut exit = item.clone();
            exit.amount = 0;
            exit
        })
        .collect();

    // Source items ahead of the guarantee soak up holdings first.
    let mut source_surplus = initial_holdings;
    for item in source_allocations.iter().take(index_of_target_in_source) {
        if source_surplus == 0 {
            break;
        }
        source_surplus -= item.amount.min(source_surplus);
    }

    let mut target_surplus = source_surplus.min(guarantee.amount);
    let mut total_payouts: u128 = 0;
    let mut k = 0;

    for destination in &guarantee_destinations {
        if target_surplus == 0 {
            break;
        }
        for i in 0..new_target_allocations.len() {
            if target_surplus == 0 {
                break;
            }
            if destination != &new_target_allocations[i].destination {
                continue;
            }
            let affords = new_target_allocations[i].amount.min(target_surplus);
            // Surplus decreases even when the index is not selected for
            // payout.
            target_surplus -= affords;
            if target_indices.is_empty()
                || (k < target_indices.len() && target_indices[k] == i)
            {
                new_target_allocations[i].amount -= affords;
                new_source_allocations[index_of_target_in_source].amount -= affords;
                exit_allocations[i].amount += affords;
                total_payouts += affords;
                k += 1;
            }
            break;
        }
    }

    Ok(ClaimEffects {
        new_source_allocations,
        new_target_allocations,
        exit_allocations,
        total_payouts,
    })
}
