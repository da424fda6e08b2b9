// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

use std::sync::{Arc, Mutex};

use highway_core::{Highway, HighwayConfig, HighwayError};
use highway_flow::{
    AggregatingNode, Channel, ChannelConfig, Future, IfElseNode, Publisher, SubscriptionOptions,
};
use pretty_assertions::assert_eq;

#[test]
fn replay_sticky() {
    let channel: Channel<i32> = Channel::new(ChannelConfig {
        many_producers: false,
        sticky: true,
    });
    channel.publish(10);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    let _sub = channel.subscribe(
        SubscriptionOptions {
            dedup: true,
            ..Default::default()
        },
        move |value| {
            seen_clone.lock().unwrap().push(value);
            true
        },
    );

    channel.publish(10);
    channel.publish(20);
    channel.publish(20);
    channel.publish(30);

    assert_eq!(*seen.lock().unwrap(), vec![10, 20, 30]);
}

#[test]
fn aggregator_fan_in() {
    let highway = Highway::new(HighwayConfig::named("scenario-aggregator")).unwrap();
    let node: Arc<AggregatingNode<i32, i32>> = AggregatingNode::new(1, Arc::clone(&highway), 3, |operand, value, bundle, total, out| {
        bundle[operand] = Some(value);
        if bundle.iter().filter(|slot| slot.is_some()).count() == total {
            let sum: i32 = bundle.iter().flatten().sum();
            out.publish(sum);
            bundle.iter_mut().for_each(|slot| *slot = None);
        }
    });

    let operand_0: Publisher<i32> = Publisher::new(0, ChannelConfig::default());
    let operand_1: Publisher<i32> = Publisher::new(0, ChannelConfig::default());
    let operand_2: Publisher<i32> = Publisher::new(0, ChannelConfig::default());
    node.connect_operand("operand-0", 0, &operand_0, None);
    node.connect_operand("operand-1", 1, &operand_1, None);
    node.connect_operand("operand-2", 2, &operand_2, None);

    let results = Arc::new(Mutex::new(Vec::new()));
    let results_clone = Arc::clone(&results);
    let _out_sub = node.output().subscribe(SubscriptionOptions::default(), move |publication| {
        results_clone.lock().unwrap().push(publication.value);
        true
    });

    operand_0.publish(1);
    operand_1.publish(2);
    operand_2.publish(3);
    operand_0.publish(10);
    operand_1.publish(20);
    operand_2.publish(30);

    assert_eq!(*results.lock().unwrap(), vec![6, 60]);
    highway.destroy();
}

#[test]
fn if_else_split() {
    let highway = Highway::new(HighwayConfig::named("scenario-if-else")).unwrap();
    let node = IfElseNode::new(1, Arc::clone(&highway), |value: &i32| *value >= 0);
    let upstream: Publisher<i32> = Publisher::new(0, ChannelConfig::default());
    node.connect_input("upstream", &upstream, None);

    let if_branch = Arc::new(Mutex::new(Vec::new()));
    let if_branch_clone = Arc::clone(&if_branch);
    let _if_sub = node.if_branch().subscribe(SubscriptionOptions::default(), move |p| {
        if_branch_clone.lock().unwrap().push(p.value);
        true
    });

    let else_branch = Arc::new(Mutex::new(Vec::new()));
    let else_branch_clone = Arc::clone(&else_branch);
    let _else_sub = node.else_branch().subscribe(SubscriptionOptions::default(), move |p| {
        else_branch_clone.lock().unwrap().push(p.value);
        true
    });

    for value in [-1, 2, -3, 4] {
        upstream.publish(value);
    }

    assert_eq!(*if_branch.lock().unwrap(), vec![2, 4]);
    assert_eq!(*else_branch.lock().unwrap(), vec![-1, -3]);
    highway.destroy();
}

#[test]
fn future_chain_error_short_circuits() {
    let highway = Highway::new(HighwayConfig::named("scenario-future")).unwrap();
    let invoked = Arc::new(Mutex::new(false));
    let invoked_clone = Arc::clone(&invoked);

    let first = Future::create(Arc::clone(&highway), || Ok(1));
    let second = first.next(None, |_v: i32| -> Result<i32, Arc<HighwayError>> {
        Err(Arc::new(HighwayError::TaskPanicked {
            highway: "scenario-future".into(),
            file: file!(),
            line: line!(),
            message: "stage failed".into(),
        }))
    });
    let third = second.next(None, move |v| {
        *invoked_clone.lock().unwrap() = true;
        Ok(v + 1)
    });

    let handle = third.execute();
    assert!(handle.join().is_err());
    assert!(!*invoked.lock().unwrap(), "third stage must not run once the chain has failed");
    highway.destroy();
}
