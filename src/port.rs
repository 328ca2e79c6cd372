// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Publisher and subscriber ports: the application-facing pub/sub API
// built on top of the mempool, delivery queue, and wait-set primitives
// (SPEC_FULL.md §4.6). Generalizes the connect/send/recv shape of
// cpp-ipc's channel API to the fan-out-with-refcounting delivery model
// this crate uses instead of a single shared ring buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{instrument, trace};

use crate::config::QueueFullPolicy;
use crate::delivery_queue::{DeliveryQueue, PushOutcome};
use crate::error::{IpcError, WaitSetError};
use crate::mempool::MempoolSet;
use crate::registry::RelativePointer;
use crate::trigger::HasTriggeredCallback;
use crate::wait_set::{TriggerHandle, WaitSet};

/// Publishing endpoint for one origin. Loans chunks from a [`MempoolSet`]
/// and fans them out to every connected [`SubscriberPort`].
pub struct PublisherPort<'r> {
    origin_id: u64,
    pools: &'r MempoolSet<'r>,
    subscribers: Mutex<Vec<Arc<SubscriberPort<'r>>>>,
    sequence: AtomicU64,
}

impl<'r> PublisherPort<'r> {
    pub fn new(origin_id: u64, pools: &'r MempoolSet<'r>) -> Self {
        Self {
            origin_id,
            pools,
            subscribers: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn origin_id(&self) -> u64 {
        self.origin_id
    }

    pub fn connect(&self, subscriber: Arc<SubscriberPort<'r>>) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    pub fn disconnect(&self, subscriber_id: u64) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|s| s.id() != subscriber_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Allocates a chunk sized to fit `payload_size` bytes of application
    /// data at `payload_align`, stamping this publisher's id and the next
    /// sequence number into the header. Returns `None` if no mempool
    /// class has room.
    #[instrument(level = "debug", skip(self))]
    pub fn loan(
        &self,
        payload_size: u32,
        custom_header_size: u32,
        payload_align: u32,
    ) -> Option<RelativePointer> {
        let rp = self
            .pools
            .allocate(payload_size, custom_header_size, payload_align)?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.pools
            .set_origin_and_sequence(rp, self.origin_id, seq)
            .expect("rp was just allocated from this pool set");
        Some(rp)
    }

    pub fn payload_ptr(&self, rp: RelativePointer) -> Result<*mut u8, IpcError> {
        self.pools.payload_ptr(rp)
    }

    /// Sends a loaned chunk to every connected subscriber
    /// (SPEC_FULL.md §4.6):
    /// 1. bulk-increments the chunk's reference count by the subscriber
    ///    count (the chunk starts with `reference_count = 1`, the
    ///    publisher's own loan);
    /// 2. pushes the chunk's relative pointer into each subscriber's
    ///    delivery queue, applying that subscriber's overflow policy;
    /// 3. releases one reference for every push that didn't end up
    ///    queued (rejected, or the chunk it displaced);
    /// 4. wakes any wait-set each subscriber is attached to;
    /// 5. releases the publisher's own initial reference.
    #[instrument(level = "debug", skip(self))]
    pub fn send(&self, rp: RelativePointer) {
        let subscribers = self.subscribers.lock().unwrap();
        let n = subscribers.len() as u32;
        if n > 0 {
            self.pools
                .increment_refcount(rp, n)
                .expect("rp was loaned from this pool set");
        }
        for sub in subscribers.iter() {
            match sub.deliver(rp) {
                PushOutcome::Accepted => {}
                PushOutcome::Rejected => {
                    trace!(subscriber = sub.id(), "delivery rejected, releasing reference");
                    let _ = self.pools.release(rp);
                }
                PushOutcome::DiscardedOldest(evicted) => {
                    let _ = self.pools.release(evicted);
                }
            }
        }
        drop(subscribers);
        let _ = self.pools.release(rp);
    }
}

/// Subscribing endpoint for one origin. Holds a bounded delivery queue
/// and, once attached, a [`TriggerHandle`] into a wait-set.
pub struct SubscriberPort<'r> {
    id: u64,
    queue: DeliveryQueue,
    trigger: Mutex<Option<TriggerHandle>>,
    pools: &'r MempoolSet<'r>,
}

impl<'r> SubscriberPort<'r> {
    pub fn new(
        id: u64,
        queue_capacity: u32,
        full_policy: QueueFullPolicy,
        pools: &'r MempoolSet<'r>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            queue: DeliveryQueue::new(queue_capacity, full_policy),
            trigger: Mutex::new(None),
            pools,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn queue_len(&self) -> u32 {
        self.queue.len()
    }

    /// Attaches this subscriber's "has data" event to `wait_set`. Replaces
    /// any existing attachment to a (possibly different) wait-set.
    pub fn attach_to(
        self: &Arc<Self>,
        wait_set: &Arc<WaitSet>,
        event_id: u64,
    ) -> Result<(), WaitSetError> {
        let origin = Arc::clone(self);
        let has_data: HasTriggeredCallback = Arc::new(move || !origin.queue.is_empty());
        let handle = wait_set.attach_event(self.id, event_id, has_data)?;
        *self.trigger.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn detach(&self) {
        *self.trigger.lock().unwrap() = None;
    }

    /// Pushes into this subscriber's queue and, if it was attached,
    /// notifies the wait-set. Called by [`PublisherPort::send`].
    pub(crate) fn deliver(&self, rp: RelativePointer) -> PushOutcome {
        let outcome = self.queue.try_push(rp);
        if let Some(handle) = self.trigger.lock().unwrap().as_ref() {
            handle.trigger();
        }
        outcome
    }

    /// Pops the oldest queued chunk, or `None` if nothing is waiting.
    pub fn take(&self) -> Option<RelativePointer> {
        self.queue.pop()
    }

    pub fn payload_ptr(&self, rp: RelativePointer) -> Result<*mut u8, IpcError> {
        self.pools.payload_ptr(rp)
    }

    /// Releases the subscriber's reference on a chunk once the
    /// application is done reading it.
    pub fn release(&self, rp: RelativePointer) -> Result<(), IpcError> {
        self.pools.release(rp)
    }
}

impl Drop for SubscriberPort<'_> {
    /// Drains any chunks still sitting in the delivery queue and releases
    /// the subscriber's reference on each, so ordinary teardown (not just
    /// an explicit `take`/`release` by the application) never leaks a
    /// chunk's refcount.
    fn drop(&mut self) {
        while let Some(rp) = self.queue.pop() {
            if let Err(err) = self.pools.release(rp) {
                tracing::error!(subscriber = self.id, ?err, "failed to release queued chunk on drop");
            }
        }
    }
}
