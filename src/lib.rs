// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Zero-copy shared-memory IPC core: size-segregated mempools, a
// reference-counted chunk lifecycle, bounded publish/subscribe delivery
// queues, and process-local wait-sets over them. Built on the same
// named shared-memory segments, named mutexes, and condition variables
// as the synchronization layer below it.
//
// This crate never installs a global `tracing` subscriber — binaries
// that embed it do that themselves (see `src/bin/demo_pubsub.rs`).

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

mod condition;
pub use condition::IpcCondition;

mod scoped_access;
pub use scoped_access::ScopedAccess;

mod spin_lock;
pub use spin_lock::SpinLock;

pub mod rt_prio;

pub mod error;
pub use error::{IpcError, WaitSetError};

pub mod config;
pub use config::{Config, MempoolClassConfig, QueueFullPolicy};

pub mod registry;
pub use registry::{RelativePointer, RelativePointerRegistry};

pub mod index_queue;
pub use index_queue::IndexQueue;

pub mod chunk;
pub use chunk::ChunkHeader;

pub mod mempool;
pub use mempool::{Mempool, MempoolSet};

pub mod delivery_queue;
pub use delivery_queue::{DeliveryQueue, PushOutcome};

pub mod trigger;
pub use trigger::{EventInfo, Trigger};

pub mod wait_set;
pub use wait_set::{TriggerHandle, WaitSet};

pub mod port;
pub use port::{PublisherPort, SubscriberPort};

pub mod timer;
pub use timer::{PeriodicTimer, TimerCatchupPolicy, TimerState, WaitResult as TimerWaitResult};
