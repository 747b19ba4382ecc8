//! Per-backend semantic switches.
//!
//! Backends disagree on a handful of behaviors (whether `update` of a missing item fails,
//! what a negative `take` means, how a failing bulk write ends). Each backend states its
//! choices as a [`Capabilities`] value instead of leaving them implicit in its code, so the
//! shared pipeline and the tests can consult them.

/// How negative `take`/`skip` counts are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativePaging {
    /// Negative counts behave as zero.
    Clamp,
    /// Negative counts are handed to the native store, which decides (usually by rejecting).
    PassThrough,
}

/// What `update` does when no item shares the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMissing {
    /// Fail with [`StoreError::NotFound`](crate::error::StoreError::NotFound).
    Fail,
    /// The native replace is unconditional; the item is silently inserted.
    Upsert,
}

/// How a bulk write reacts to a failing element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkFailure {
    /// Stop at the first failure and return it. Elements written before it stay written
    /// unless the backend commits batches atomically.
    AbortBatch,
    /// Skip failing elements and return the number that succeeded.
    ContinueAndCount,
}

/// The semantic profile of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether a second `order_by` on an ordered query applies a new ordering (`true`) or is
    /// rejected with a hint to use `then_by` (`false`).
    pub multiple_order_by: bool,
    pub negative_paging: NegativePaging,
    pub update_missing: UpdateMissing,
    pub bulk_failure: BulkFailure,
    /// Whether `insert_or_update_many` counts items whose stored content did not change.
    pub upsert_counts_unchanged: bool,
    /// Whether `insert_or_update` is a single atomic native operation.
    pub atomic_upsert: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            multiple_order_by: true,
            negative_paging: NegativePaging::Clamp,
            update_missing: UpdateMissing::Fail,
            bulk_failure: BulkFailure::AbortBatch,
            upsert_counts_unchanged: true,
            atomic_upsert: false,
        }
    }
}
