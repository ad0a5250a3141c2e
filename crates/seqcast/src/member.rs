//! Member handles and the per-member ordered delivery task
//!
//! Each member owns an inbound queue fed by the group's dispatch tasks and
//! an outward read queue consumed through [`Member::recv`]. The delivery
//! task in between reorders arrivals by sequence number against the
//! member's cursor.

use tokio::sync::{mpsc, oneshot};

use crate::group::Group;
use crate::reorder::ReorderBuffer;
use crate::types::{Envelope, GroupError, MemberId};

/// A participant in a broadcast group
///
/// Reading is `&mut self`: a member's stream has exactly one consumer.
/// Dropping the handle without leaving stops delivery to it, but the group
/// keeps its slot until [`Group::leave`] or [`Member::close`] is called.
pub struct Member<T> {
    id: MemberId,
    group: Group<T>,
    read_rx: mpsc::Receiver<T>,
}

impl<T: Clone + Send + 'static> Member<T> {
    pub(crate) fn new(id: MemberId, group: Group<T>, read_rx: mpsc::Receiver<T>) -> Self {
        Self { id, group, read_rx }
    }

    pub fn id(&self) -> MemberId {
        self.id
    }

    /// Broadcast a payload to every *other* member of the group
    pub async fn send(&self, payload: T) {
        self.group.send_from(Some(self.id), payload).await;
    }

    /// Next in-order payload, or `None` once the member has been removed
    ///
    /// Suspends while the group is live and nothing is pending. The reader
    /// must keep pace: an unread stream stalls this member's delivery task
    /// (and only this member's), by design.
    pub async fn recv(&mut self) -> Option<T> {
        self.read_rx.recv().await
    }

    /// Remove this member from its group
    pub fn close(&self) -> Result<(), GroupError> {
        self.group.remove(self.id)
    }
}

/// Delivery stopped: the member was removed or its reader went away
pub(crate) struct Stopped;

/// The per-member delivery engine
///
/// Runs for the member's lifetime, draining the inbound queue and releasing
/// payloads to the read queue in exact sequence order.
pub(crate) struct DeliveryTask<T> {
    member: MemberId,
    /// Next expected sequence number
    cursor: u64,
    pending: ReorderBuffer<T>,
    inbound: mpsc::Receiver<Envelope<T>>,
    read_tx: mpsc::Sender<T>,
    shutdown: oneshot::Receiver<()>,
}

impl<T> DeliveryTask<T> {
    pub(crate) fn new(
        member: MemberId,
        cursor: u64,
        inbound: mpsc::Receiver<Envelope<T>>,
        read_tx: mpsc::Sender<T>,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            member,
            cursor,
            pending: ReorderBuffer::new(),
            inbound,
            read_tx,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let envelope = tokio::select! {
                envelope = self.inbound.recv() => match envelope {
                    Some(envelope) => envelope,
                    // the group itself is gone
                    None => break,
                },
                _ = &mut self.shutdown => break,
            };
            if self.process(envelope).await.is_err() {
                break;
            }
        }

        if !self.pending.is_empty() {
            tracing::debug!(
                "{} stopped with {} undelivered messages discarded",
                self.member,
                self.pending.len()
            );
        }
        // dropping read_tx here is the terminal signal seen by recv()
    }

    /// Reorder one arrival against the cursor
    ///
    /// If the envelope was next in line, drain everything contiguous behind
    /// it out of the reorder buffer as well.
    async fn process(&mut self, envelope: Envelope<T>) -> Result<(), Stopped> {
        if !self.try_deliver(envelope).await? {
            return Ok(());
        }
        while self.pending.peek_seq() == Some(self.cursor) {
            if let Some(next) = self.pending.pop_min() {
                self.try_deliver(next).await?;
            }
        }
        Ok(())
    }

    /// Release the envelope if its sequence matches the cursor, otherwise
    /// park it. Returns whether the cursor advanced.
    ///
    /// The member's own messages are suppressed, but their slot still
    /// advances the cursor so every member counts sequence numbers
    /// identically.
    async fn try_deliver(&mut self, envelope: Envelope<T>) -> Result<bool, Stopped> {
        if envelope.seq != self.cursor {
            debug_assert!(
                envelope.seq > self.cursor,
                "seq {} arrived behind cursor {}",
                envelope.seq,
                self.cursor
            );
            self.pending.insert(envelope);
            return Ok(false);
        }

        if envelope.sender != Some(self.member) {
            tokio::select! {
                sent = self.read_tx.send(envelope.payload) => {
                    if sent.is_err() {
                        // reader handle dropped
                        return Err(Stopped);
                    }
                }
                // removal preempts a push blocked on a slow reader
                _ = &mut self.shutdown => return Err(Stopped),
            }
        }

        self.cursor += 1;
        Ok(true)
    }
}
