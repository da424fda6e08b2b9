// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use highway_core::{Highway, HighwayConfig, HighwaysManager, HighwaysManagerConfig};
use pretty_assertions::assert_eq;

#[test]
fn single_thread_ordering() {
    let highway = Highway::new(HighwayConfig::named("ordering")).unwrap();
    let collected = Arc::new(Mutex::new(Vec::new()));
    for payload in [1, 2, 3, 4, 5] {
        let collected = Arc::clone(&collected);
        highway.execute(
            move |_cancel| collected.lock().unwrap().push(payload),
            file!(),
            line!(),
        );
    }
    // blocking send guarantees the five tasks above are already queued; one more
    // blocking round trip through the same mailbox guarantees they have all drained.
    let (tx, rx) = std::sync::mpsc::channel();
    highway.execute(move |_cancel| tx.send(()).unwrap(), file!(), line!());
    rx.recv_timeout(Duration::from_secs(1)).unwrap();

    assert_eq!(*collected.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    highway.destroy();
}

#[test]
fn load_balanced_lease() {
    let manager = HighwaysManager::new(HighwaysManagerConfig {
        local_workers_count: 1,
        min_highways: 1,
        max_highways: 3,
        auto_regulation: true,
        highway_settings: HighwayConfig::named("leased"),
    })
    .unwrap();

    let first = manager.get_highway(40).unwrap();
    let second = manager.get_highway(40).unwrap();
    assert!(
        Arc::ptr_eq(first.highway(), second.highway()),
        "40% + 40% = 80%, still under 100%, so the same highway should absorb both"
    );

    let third = manager.get_highway(40).unwrap();
    assert!(
        !Arc::ptr_eq(first.highway(), third.highway()),
        "80% + 40% exceeds 100% on the first highway, so the third lease must spill to a new one"
    );

    let shared_highway = Arc::clone(first.highway());
    drop(first);
    drop(second);
    // The shared highway is now back to zero load and the pool is above min_highways, so
    // dropping both leases should have destroyed it without a separate shrink_idle call;
    // the third highway, still leased, must stay usable.
    assert!(!shared_highway.is_running());

    let (tx, rx) = std::sync::mpsc::channel();
    third.execute(move |_cancel| tx.send(()).unwrap(), file!(), line!());
    rx.recv_timeout(Duration::from_secs(1)).unwrap();

    manager.destroy();
}
