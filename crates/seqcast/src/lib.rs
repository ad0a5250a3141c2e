//! Seqcast - sequenced in-process broadcast groups
//!
//! Architecture:
//! - A group owns a logical clock; every admitted send is stamped with the
//!   next sequence number by a single broadcast loop
//! - The loop dispatches each stamped message to every member concurrently,
//!   one short-lived dispatch task per member, and never waits for delivery
//! - Each member runs its own delivery task that reorders arrivals by
//!   sequence number, so every member reads the same global order
//! - A sender never receives its own message back, but the sequence slot
//!   still advances every member's cursor identically

pub mod group;
pub mod member;
pub mod types;

mod reorder;

pub use group::Group;
pub use member::Member;
pub use types::{GroupConfig, GroupError, GroupStats, MemberId};

#[cfg(test)]
mod tests;
