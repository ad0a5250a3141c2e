//! Core types for broadcast groups

use std::fmt;

use thiserror::Error;

/// Identity of a group member, unique within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(pub(crate) u64);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "member-{}", self.0)
    }
}

/// A payload together with its routing metadata
///
/// The sequence number is assigned exactly once, by the broadcast loop at
/// admission time, and is the sole ordering key downstream. The sender id
/// is used only to suppress echo back to the originator.
#[derive(Debug, Clone)]
pub(crate) struct Envelope<T> {
    pub sender: Option<MemberId>,
    pub payload: T,
    pub seq: u64,
}

/// Channel capacities for a broadcast group
///
/// The defaults keep every handoff as tight as a bounded channel allows,
/// which is what gives the group its backpressure: a slow reader stalls
/// only its own delivery, never the clock or the other members.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Capacity of the group's admission queue
    pub inbound_capacity: usize,
    /// Capacity of each member's inbound queue
    pub dispatch_capacity: usize,
    /// Capacity of each member's outward read queue
    pub read_capacity: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1,
            dispatch_capacity: 1,
            read_capacity: 1,
        }
    }
}

/// Stats about a broadcast group
#[derive(Debug, Clone, Default)]
pub struct GroupStats {
    pub messages_broadcast: u64,
    pub members_joined: u64,
    pub members_left: u64,
    pub current_members: usize,
}

/// Errors surfaced by group operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    /// The member is not currently in the group
    #[error("{0} is not in the group")]
    MemberNotFound(MemberId),

    /// The broadcast loop is already being driven by another caller
    #[error("broadcast loop is already running")]
    AlreadyRunning,
}
