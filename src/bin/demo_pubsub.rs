// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Minimal in-process publisher/subscriber walkthrough: loan a chunk,
// write a payload, send it to two subscribers, have each take and
// release it, and wake a wait-set attached to one of them. Everything
// here runs in a single process over `Mempool::new_in_memory`; a real
// deployment would open a named `ShmHandle` instead and hand the same
// `Config` to every process sharing the segment.

use std::time::Duration;

use ipc_core::config::Config;
use ipc_core::mempool::{Mempool, MempoolSet};
use ipc_core::port::{PublisherPort, SubscriberPort};
use ipc_core::registry::RelativePointerRegistry;
use ipc_core::wait_set::WaitSet;

const CONFIG_TOML: &str = r#"
    mempool_config = [ { chunk_size = 256, count = 16 } ]
    subscriber_queue_capacity = 4
    subscriber_queue_full_policy = "DISCARD_OLDEST"
    wait_set_capacity = 4
    max_shm_size = 1048576
"#;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_toml_str(CONFIG_TOML).expect("valid demo config");
    let registry = RelativePointerRegistry::new();
    let pools: Vec<_> = config
        .mempool_config
        .iter()
        .map(|c| Mempool::new_in_memory(&registry, c.chunk_size, c.count))
        .collect();
    let pool_set = MempoolSet::new(&registry, pools);

    let publisher = PublisherPort::new(1, &pool_set);
    let notified_subscriber = SubscriberPort::new(
        1,
        config.subscriber_queue_capacity,
        config.subscriber_queue_full_policy,
        &pool_set,
    );
    let quiet_subscriber = SubscriberPort::new(
        2,
        config.subscriber_queue_capacity,
        config.subscriber_queue_full_policy,
        &pool_set,
    );
    publisher.connect(notified_subscriber.clone());
    publisher.connect(quiet_subscriber.clone());

    let wait_set = WaitSet::new(config.wait_set_capacity);
    notified_subscriber
        .attach_to(&wait_set, 1)
        .expect("wait-set has room");

    let message = b"hello from the publisher";
    let rp = publisher
        .loan(message.len() as u32, 0, 8)
        .expect("mempool has a free chunk");
    unsafe {
        let dst = publisher.payload_ptr(rp).unwrap();
        std::ptr::copy_nonoverlapping(message.as_ptr(), dst, message.len());
    }
    publisher.send(rp);

    let fired = wait_set.timed_wait(Duration::from_millis(500));
    for event in &fired {
        println!(
            "wait-set woke for subscriber {} event {}",
            event.event_origin_id, event.event_id
        );
    }

    for (label, sub) in [("notified", &notified_subscriber), ("quiet", &quiet_subscriber)] {
        if let Some(received) = sub.take() {
            let ptr = sub.payload_ptr(received).unwrap();
            let text = unsafe { std::slice::from_raw_parts(ptr, message.len()) };
            println!("{label} subscriber received: {:?}", String::from_utf8_lossy(text));
            sub.release(received).unwrap();
        }
    }

    println!(
        "free chunks after teardown: {}",
        pool_set.pools()[0].free_count()
    );
}
