// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! Dataflow primitives built on top of `highway-core`: typed publish/subscribe channels,
//! execution-tree nodes, and linked future chains.

pub mod channel;
pub mod future_chain;
pub mod node;

pub use channel::{Channel, ChannelConfig, Subscription, SubscriptionOptions};
pub use future_chain::{Future, FutureHandle, StageResult};
pub use node::{
    AggregatingBundle, AggregatingNode, DefaultNode, IfElseNode, LabeledPublication, NodeBase, NodeLogic, Publisher, ResultNode, TwoOperandNode, VoidEntryNode,
};
