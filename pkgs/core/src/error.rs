use crate::layout::Slot;

/// Errors surfaced at the heap's public boundary.
///
/// Every variant except `OrderViolation` reports a caller bug that was caught
/// before the heap was touched, so the heap is still consistent afterwards.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("heap is empty")]
    Empty,
    #[error("slot {slot} is not occupied (heap holds {len} items)")]
    InvalidSlot { slot: Slot, len: usize },
    #[error("heap is full ({0} items)")]
    Full(usize),
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(String),
    #[error("heap order violated: slot {child} is nearer the root than its parent {parent}")]
    OrderViolation { parent: Slot, child: Slot },
    #[error("timer already expired or was cancelled")]
    StaleTimer,
}

pub type Result<T> = std::result::Result<T, HeapError>;
