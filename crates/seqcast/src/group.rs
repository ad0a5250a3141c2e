//! Group admission, sequencing and fan-out
//!
//! The broadcast loop is the single consumer of the admission queue, so
//! sequence assignment is strictly serialized. Delivery runs on independent
//! dispatch tasks, one per member per message, so a slow member never stalls
//! the clock, the loop, or the other members.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinSet;

use crate::member::{DeliveryTask, Member};
use crate::types::{Envelope, GroupConfig, GroupError, GroupStats, MemberId};

/// Group-side record of a live member
struct MemberSlot<T> {
    id: MemberId,
    inbound_tx: mpsc::Sender<Envelope<T>>,
    shutdown: oneshot::Sender<()>,
}

struct Shared<T> {
    /// Admission queue feeding the broadcast loop
    inbound_tx: mpsc::Sender<Envelope<T>>,
    /// Held here between `run` calls; taken by the active loop
    inbound_rx: Mutex<Option<mpsc::Receiver<Envelope<T>>>>,
    /// Membership set; mutations hold the write lock, the loop snapshots
    /// under the read lock
    members: RwLock<Vec<MemberSlot<T>>>,
    /// Logical clock, guarded independently of the membership set
    clock: Mutex<u64>,
    /// Close signal for the broadcast loop
    close: Notify,
    /// In-flight dispatch tasks; owned by the group, not the loop, so a
    /// dispatch blocked on a slow member survives a `run` return and the
    /// stamped message is never lost
    dispatches: Mutex<JoinSet<()>>,
    stats: RwLock<GroupStats>,
    next_member_id: AtomicU64,
    config: GroupConfig,
}

/// A broadcast domain: owns the logical clock and the membership set
///
/// Cheap to clone; all clones share the same group state. Drive the group
/// by calling [`Group::run`] from exactly one task.
pub struct Group<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Group<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Group<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Group<T> {
    /// Create a new group with default capacities, clock at 0
    pub fn new() -> Self {
        Self::with_config(GroupConfig::default())
    }

    /// Create a new group with explicit channel capacities
    pub fn with_config(config: GroupConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                members: RwLock::new(Vec::new()),
                clock: Mutex::new(0),
                close: Notify::new(),
                dispatches: Mutex::new(JoinSet::new()),
                stats: RwLock::new(GroupStats::default()),
                next_member_id: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// Signal the broadcast loop to terminate
    ///
    /// Members are not closed: they keep their delivery tasks but receive
    /// nothing further. Dispatch tasks already spawned keep running until
    /// their member accepts or leaves. The permit is stored, so a close
    /// issued before the loop starts waiting is not lost.
    pub fn close(&self) {
        self.shared.close.notify_one();
    }

    /// Number of dispatch tasks not yet reaped
    ///
    /// Grows by one per member per stamped message and shrinks as members
    /// accept; a persistently high value means a member is not reading.
    pub fn in_flight_dispatches(&self) -> usize {
        self.shared.dispatches.lock().len()
    }

    /// Number of members currently in the group
    pub fn member_count(&self) -> usize {
        self.shared.members.read().len()
    }

    /// Snapshot of the group's counters
    pub fn stats(&self) -> GroupStats {
        let mut stats = self.shared.stats.read().clone();
        stats.current_members = self.shared.members.read().len();
        stats
    }
}

impl<T: Clone + Send + 'static> Group<T> {
    /// Admit a payload for broadcast to every member
    ///
    /// Suspends only until the broadcast loop accepts the message from the
    /// admission queue, never until members consume it.
    pub async fn send(&self, payload: T) {
        self.send_from(None, payload).await;
    }

    pub(crate) async fn send_from(&self, sender: Option<MemberId>, payload: T) {
        // seq is a placeholder until the loop stamps it at admission
        let envelope = Envelope {
            sender,
            payload,
            seq: 0,
        };
        if self.shared.inbound_tx.send(envelope).await.is_err() {
            // unreachable while the group is alive: the receiver is owned
            // by the group itself
            tracing::warn!("admission queue closed, message dropped");
        }
    }

    /// Add a member to the group and start its delivery task
    ///
    /// The member's cursor starts at the current clock value, read while the
    /// membership write lock is held, so it sees exactly the messages
    /// sequenced from its join point onward and none of the history.
    ///
    /// Must be called within a tokio runtime: the delivery task is spawned
    /// here.
    pub fn join(&self) -> Member<T> {
        let mut members = self.shared.members.write();
        let cursor = *self.shared.clock.lock();

        let id = MemberId(self.shared.next_member_id.fetch_add(1, Ordering::Relaxed));
        let (inbound_tx, inbound_rx) = mpsc::channel(self.shared.config.dispatch_capacity.max(1));
        let (read_tx, read_rx) = mpsc::channel(self.shared.config.read_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(DeliveryTask::new(id, cursor, inbound_rx, read_tx, shutdown_rx).run());

        members.push(MemberSlot {
            id,
            inbound_tx,
            shutdown: shutdown_tx,
        });

        let mut stats = self.shared.stats.write();
        stats.members_joined += 1;
        stats.current_members = members.len();
        drop(stats);

        tracing::debug!("{} joined with cursor {}", id, cursor);

        Member::new(id, self.clone(), read_rx)
    }

    /// Remove a member from the group
    ///
    /// The member's delivery task stops and its read stream ends; anything
    /// still parked in its reorder buffer is discarded. Dispatch tasks still
    /// en route observe the closed inbound queue and drop their message.
    pub fn leave(&self, member: &Member<T>) -> Result<(), GroupError> {
        self.remove(member.id())
    }

    pub(crate) fn remove(&self, id: MemberId) -> Result<(), GroupError> {
        let mut members = self.shared.members.write();
        let index = members
            .iter()
            .position(|slot| slot.id == id)
            .ok_or(GroupError::MemberNotFound(id))?;
        let slot = members.remove(index);

        let mut stats = self.shared.stats.write();
        stats.members_left += 1;
        stats.current_members = members.len();
        drop(stats);
        drop(members);

        // the task may already be gone if the reader handle was dropped
        let _ = slot.shutdown.send(());

        tracing::debug!("{} left", id);
        Ok(())
    }

    /// The broadcast loop: stamp admitted messages and fan them out
    ///
    /// Single consumer of the admission queue. Returns when [`Group::close`]
    /// is signalled, or when `timeout` (non-zero) elapses with no message
    /// admitted; `Duration::ZERO` disables the timeout. The admission
    /// receiver is put back on return, so the loop can be driven again
    /// after a timeout. Dispatch tasks are owned by the group, not the
    /// loop: a dispatch still blocked on a slow member keeps running
    /// across a return and delivers once that member accepts, so no
    /// stamped message is ever skipped.
    pub async fn run(&self, timeout: Duration) -> Result<(), GroupError> {
        let mut inbound = self
            .shared
            .inbound_rx
            .lock()
            .take()
            .ok_or(GroupError::AlreadyRunning)?;

        tracing::debug!("broadcast loop started");

        let idle = tokio::time::sleep(timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                admitted = inbound.recv() => {
                    match admitted {
                        Some(envelope) => {
                            self.dispatch(envelope);
                            if !timeout.is_zero() {
                                idle.as_mut()
                                    .reset(tokio::time::Instant::now() + timeout);
                            }
                        }
                        // every sender handle is gone
                        None => break,
                    }
                }
                _ = self.shared.close.notified() => {
                    tracing::debug!("broadcast loop closed");
                    break;
                }
                _ = &mut idle, if !timeout.is_zero() => {
                    tracing::debug!("broadcast loop idle for {:?}, returning", timeout);
                    break;
                }
            }
        }

        *self.shared.inbound_rx.lock() = Some(inbound);
        Ok(())
    }

    /// Stamp one admitted message and hand it to every current member
    ///
    /// The membership snapshot is taken before the clock is touched, the
    /// same lock order as `join`, so a concurrent join either sees the new
    /// sequence number in its cursor or receives the message, never both
    /// and never neither.
    fn dispatch(&self, mut envelope: Envelope<T>) {
        let members = self.shared.members.read();

        {
            let mut clock = self.shared.clock.lock();
            envelope.seq = *clock;
            *clock += 1;
        }

        tracing::trace!("stamped seq {} for {} members", envelope.seq, members.len());

        let mut dispatches = self.shared.dispatches.lock();
        // reap whatever finished since the last stamp
        while dispatches.try_join_next().is_some() {}

        for slot in members.iter() {
            let inbound_tx = slot.inbound_tx.clone();
            let envelope = envelope.clone();
            dispatches.spawn(async move {
                // a member that left mid-flight has dropped its receiver;
                // the message is dropped with it
                let _ = inbound_tx.send(envelope).await;
            });
        }
        drop(dispatches);

        self.shared.stats.write().messages_broadcast += 1;
    }
}
