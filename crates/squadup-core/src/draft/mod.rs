// Draft: the solver's partition into groups and bench, plus manual swaps.

pub mod group;
pub mod swap;

pub use group::{Draft, Group, GroupSlot, PlayerRef, SlotRef};
pub use swap::{SwapError, SwapOutcome};
