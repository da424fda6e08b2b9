// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! Execution-tree nodes: stateful vertices that sit between a [`Channel`] subscription
//! and a [`Channel`] publisher.
//!
//! A node's user logic is one of a small closed set of shapes ([`NodeLogic`]) selected
//! explicitly by which constructor the caller calls, rather than inferred from an
//! arbitrary callable's signature — the same closed trait/closure-family choice
//! `highway_core::task::Runnable` makes for task bodies.
//!
//! Every node type embeds a [`NodeBase`]: an id, a non-owning [`HighwayProxy`] to the
//! highway that subscription-management calls dispatch onto, a weak reference back to the
//! node itself (so a subscription's callback can outlive every external `Arc<Node>` without
//! keeping the node alive on its own), and an optional progress publisher. A node's own
//! upstream wiring is tracked behind a label so it can be torn down piecemeal later.

use std::any::Any;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use highway_core::{CancellationToken, Highway, HighwayProxy};

use crate::channel::{Channel, ChannelConfig, Subscription, SubscriptionOptions};

/// A value tagged with the id of the node (or operand) that produced it, used for fan-in
/// and fan-out routing.
#[derive(Clone)]
pub struct LabeledPublication<T> {
    pub label: i32,
    pub value: T,
}

impl<T: PartialEq> PartialEq for LabeledPublication<T> {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.value == other.value
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for LabeledPublication<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabeledPublication").field("label", &self.label).field("value", &self.value).finish()
    }
}

/// The output half of a node: a labeled channel that downstream nodes connect to.
pub struct Publisher<T: Clone + Send + PartialEq + 'static> {
    node_id: i32,
    channel: Channel<LabeledPublication<T>>,
}

impl<T: Clone + Send + PartialEq + 'static> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("node_id", &self.node_id)
            .field("subscriber_count", &self.channel.subscriber_count())
            .finish()
    }
}

impl<T: Clone + Send + PartialEq + 'static> Publisher<T> {
    #[must_use]
    pub fn new(node_id: i32, config: ChannelConfig) -> Self {
        Self {
            node_id,
            channel: Channel::new(config),
        }
    }

    pub fn publish(&self, value: T) {
        self.channel.publish(LabeledPublication {
            label: self.node_id,
            value,
        });
    }

    pub fn subscribe(
        &self,
        options: SubscriptionOptions,
        callback: impl FnMut(LabeledPublication<T>) -> bool + Send + 'static,
    ) -> Subscription<LabeledPublication<T>> {
        self.channel.subscribe(options, callback)
    }

    /// Forcibly severs every subscriber tagged with `label`, from this publisher's own
    /// side. Used by a node's `delete_out_channels_by_label`.
    pub fn remove_subscribers_by_label(&self, label: &str) {
        self.channel.remove_subscribers_by_label(label);
    }

    /// Forcibly severs every subscriber of this publisher. Used by a node's
    /// `delete_all_out_channels`.
    pub fn remove_all_subscribers(&self) {
        self.channel.remove_all_subscribers();
    }
}

/// Wires a node's accept function up to an upstream publisher, choosing inline or
/// highway-rescheduled dispatch at connect time.
fn connect_input<In, F>(
    upstream: &Channel<LabeledPublication<In>>,
    highway: Option<Arc<Highway>>,
    mut accept: F,
) -> Subscription<LabeledPublication<In>>
where
    In: Clone + Send + PartialEq + 'static,
    F: FnMut(LabeledPublication<In>) + Send + 'static,
{
    upstream.subscribe(
        SubscriptionOptions {
            highway,
            ..Default::default()
        },
        move |publication| {
            accept(publication);
            true
        },
    )
}

/// One of a small closed set of user-logic shapes a [`DefaultNode`] can be bound to,
/// selected explicitly by which constructor the caller calls rather than inferred from an
/// arbitrary callable's signature.
pub enum NodeLogic<In, Out: Clone + Send + PartialEq + 'static> {
    Plain(Box<dyn FnMut(In) -> Out + Send>),
    Labeled(Box<dyn FnMut(i32, In) -> Out + Send>),
    Published(Box<dyn FnMut(In, &Publisher<Out>) + Send>),
    Full(Box<dyn FnMut(i32, In, &Publisher<Out>) + Send>),
}

impl<In, Out: Clone + Send + PartialEq + 'static> std::fmt::Debug for NodeLogic<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            NodeLogic::Plain(_) => "Plain",
            NodeLogic::Labeled(_) => "Labeled",
            NodeLogic::Published(_) => "Published",
            NodeLogic::Full(_) => "Full",
        };
        f.debug_tuple(variant).field(&"<fn>").finish()
    }
}

impl<In, Out> NodeLogic<In, Out>
where
    Out: Clone + Send + PartialEq + 'static,
{
    fn invoke(&mut self, label: i32, value: In, publisher: &Publisher<Out>) {
        match self {
            NodeLogic::Plain(f) => publisher.publish(f(value)),
            NodeLogic::Labeled(f) => publisher.publish(f(label, value)),
            NodeLogic::Published(f) => f(value, publisher),
            NodeLogic::Full(f) => f(label, value, publisher),
        }
    }
}

/// One of this node's own input subscriptions, kept alive under a label so it can be torn
/// down later without affecting the node's other inputs. The boxed value is never
/// downcast — it exists only so dropping it (on removal) runs the wrapped
/// [`Subscription`]'s own `Drop`.
struct LabeledHandle {
    label: &'static str,
    _handle: Box<dyn Any + Send>,
}

impl std::fmt::Debug for LabeledHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabeledHandle").field("label", &self.label).finish()
    }
}

/// The state every execution-tree node type embeds: an id, a non-owning handle to its
/// owning highway, a weak reference back to the node itself, an optional progress
/// publisher, and this node's own labeled input-subscription bookkeeping.
///
/// `N` is the concrete node type; it only appears in the weak self-reference; every other
/// field is independent of it.
pub struct NodeBase<N: ?Sized> {
    node_id: i32,
    highway: HighwayProxy,
    self_ref: Mutex<Weak<N>>,
    progress: Mutex<Option<Arc<Publisher<i32>>>>,
    in_channels: Arc<Mutex<Vec<LabeledHandle>>>,
}

impl<N> std::fmt::Debug for NodeBase<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBase")
            .field("node_id", &self.node_id)
            .field("highway", &self.highway)
            .field("has_progress_publisher", &self.progress.lock().map(|p| p.is_some()).unwrap_or(false))
            .field(
                "in_channel_count",
                &self.in_channels.lock().map(|channels| channels.len()).unwrap_or(0),
            )
            .finish()
    }
}

impl<N> NodeBase<N> {
    #[must_use]
    pub fn new(node_id: i32, highway: &Arc<Highway>) -> Self {
        Self {
            node_id,
            highway: HighwayProxy::new(highway),
            self_ref: Mutex::new(Weak::new()),
            progress: Mutex::new(None),
            in_channels: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Records the weak self-reference. Every node constructor calls this exactly once,
    /// right after `Arc::new`, before returning the node to its caller.
    pub(crate) fn bind_self(&self, node: &Arc<N>) {
        *self.self_ref.lock().expect("self_ref mutex poisoned") = Arc::downgrade(node);
    }

    /// A weak reference to the owning node, for capture by a subscription callback that
    /// must not keep the node alive on its own.
    #[must_use]
    pub fn weak_self(&self) -> Weak<N> {
        self.self_ref.lock().expect("self_ref mutex poisoned").clone()
    }

    #[must_use]
    pub fn node_id(&self) -> i32 {
        self.node_id
    }

    #[must_use]
    pub fn highway(&self) -> &HighwayProxy {
        &self.highway
    }

    /// Attaches a publisher this node reports execution progress on. Optional; a node with
    /// no progress publisher set just never reports.
    pub fn set_progress_publisher(&self, publisher: Arc<Publisher<i32>>) {
        *self.progress.lock().expect("progress mutex poisoned") = Some(publisher);
    }

    /// Publishes `value` on this node's progress publisher, if one is set.
    pub fn report_progress(&self, value: i32) {
        if let Some(publisher) = self.progress.lock().expect("progress mutex poisoned").as_ref() {
            publisher.publish(value);
        }
    }

    fn register_in_channel(&self, label: &'static str, handle: impl Any + Send) {
        self.in_channels
            .lock()
            .expect("in_channels mutex poisoned")
            .push(LabeledHandle {
                label,
                _handle: Box::new(handle),
            });
    }

    /// Drops every input subscription tagged with `label`, detaching this node from the
    /// matching upstream publisher(s). Dispatched on the owning highway so it cannot race a
    /// publication already in flight to the same node.
    pub fn delete_in_channels_by_label(&self, label: &'static str) {
        let in_channels = Arc::clone(&self.in_channels);
        let _ = self.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                in_channels.lock().expect("in_channels mutex poisoned").retain(|h| h.label != label);
            },
            file!(),
            line!(),
        );
    }

    /// Drops every input subscription this node holds, detaching it from every upstream.
    pub fn delete_all_in_channels(&self) {
        let in_channels = Arc::clone(&self.in_channels);
        let _ = self.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                in_channels.lock().expect("in_channels mutex poisoned").clear();
            },
            file!(),
            line!(),
        );
    }
}

/// A generic vertex: intake via `connect_input`, user logic, a labeled output publisher.
pub struct DefaultNode<In, Out>
where
    In: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + 'static,
{
    base: NodeBase<Self>,
    logic: Mutex<NodeLogic<In, Out>>,
    output: Publisher<Out>,
}

impl<In, Out> std::fmt::Debug for DefaultNode<In, Out>
where
    In: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultNode").field("base", &self.base).field("output", &self.output).finish()
    }
}

impl<In, Out> DefaultNode<In, Out>
where
    In: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + 'static,
{
    pub fn new(node_id: i32, highway: Arc<Highway>, logic: NodeLogic<In, Out>) -> Arc<Self> {
        let node = Arc::new(Self {
            base: NodeBase::new(node_id, &highway),
            output: Publisher::new(node_id, ChannelConfig::default()),
            logic: Mutex::new(logic),
        });
        node.base.bind_self(&node);
        node
    }

    #[must_use]
    pub fn node_id(&self) -> i32 {
        self.base.node_id()
    }

    #[must_use]
    pub fn base(&self) -> &NodeBase<Self> {
        &self.base
    }

    #[must_use]
    pub fn output(&self) -> &Publisher<Out> {
        &self.output
    }

    /// Subscribes this node to an upstream publisher under `label`, so the wiring can later
    /// be torn down with `base().delete_in_channels_by_label(label)`. `reschedule = true`
    /// dispatches `accept` on this node's own highway instead of the upstream's publishing
    /// thread, which is what keeps this node's subscription-set mutations single-writer.
    ///
    /// The subscription itself only holds a weak reference to this node, so a dropped
    /// `Arc<DefaultNode<..>>` is freed even while an upstream publisher keeps delivering to
    /// a now-inert callback.
    pub fn connect_input(self: &Arc<Self>, label: &'static str, upstream: &Publisher<In>, reschedule: bool) {
        let weak = self.base.weak_self();
        let highway = reschedule.then(|| self.base.highway.upgrade()).flatten();
        let subscription = connect_input(&upstream.channel, highway, move |publication| {
            if let Some(node) = weak.upgrade() {
                node.accept(publication);
            }
        });
        self.base.register_in_channel(label, subscription);
    }

    fn accept(&self, publication: LabeledPublication<In>) {
        let mut logic = self.logic.lock().expect("node logic mutex poisoned");
        logic.invoke(publication.label, publication.value, &self.output);
        self.base.report_progress(self.base.node_id());
    }

    /// Forcibly severs every downstream subscriber of this node's output publisher tagged
    /// with `label`.
    pub fn delete_out_channels_by_label(self: &Arc<Self>, label: &'static str) {
        let weak = Arc::downgrade(self);
        let _ = self.base.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                if let Some(node) = weak.upgrade() {
                    node.output.remove_subscribers_by_label(label);
                }
            },
            file!(),
            line!(),
        );
    }

    /// Forcibly severs every downstream subscriber of this node's output publisher.
    pub fn delete_all_out_channels(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let _ = self.base.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                if let Some(node) = weak.upgrade() {
                    node.output.remove_all_subscribers();
                }
            },
            file!(),
            line!(),
        );
    }
}

/// A terminal node: stores the first (or every, depending on `store_only_latest`) labeled
/// result behind a condvar so a blocking caller can retrieve it with [`Self::get_result`].
pub struct ResultNode<T: Clone + Send + PartialEq + 'static> {
    base: NodeBase<Self>,
    logic: Mutex<Option<Box<dyn FnMut(i32, T) -> T + Send>>>,
    slot: Mutex<Option<LabeledPublication<T>>>,
    condvar: Condvar,
}

impl<T: Clone + Send + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for ResultNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultNode")
            .field("base", &self.base)
            .field("has_result", &self.slot.lock().map(|s| s.is_some()).unwrap_or(false))
            .finish()
    }
}

impl<T: Clone + Send + PartialEq + 'static> ResultNode<T> {
    #[must_use]
    pub fn new(node_id: i32, highway: Arc<Highway>, logic: Option<Box<dyn FnMut(i32, T) -> T + Send>>) -> Arc<Self> {
        let node = Arc::new(Self {
            base: NodeBase::new(node_id, &highway),
            logic: Mutex::new(logic),
            slot: Mutex::new(None),
            condvar: Condvar::new(),
        });
        node.base.bind_self(&node);
        node
    }

    #[must_use]
    pub fn base(&self) -> &NodeBase<Self> {
        &self.base
    }

    pub fn connect_input<In>(self: &Arc<Self>, label: &'static str, upstream: &Publisher<In>, highway: Option<Arc<Highway>>)
    where
        In: Clone + Send + PartialEq + 'static + Into<T>,
    {
        let weak = self.base.weak_self();
        let subscription = connect_input(&upstream.channel, highway, move |publication| {
            if let Some(node) = weak.upgrade() {
                node.accept(publication.label, publication.value.into());
            }
        });
        self.base.register_in_channel(label, subscription);
    }

    fn accept(&self, label: i32, mut value: T) {
        if let Some(logic) = self.logic.lock().expect("logic mutex poisoned").as_mut() {
            value = logic(label, value);
        }
        *self.slot.lock().expect("slot mutex poisoned") = Some(LabeledPublication {
            label: self.base.node_id(),
            value,
        });
        self.base.report_progress(self.base.node_id());
        self.condvar.notify_all();
    }

    /// Blocks until a result has arrived, then returns it.
    #[must_use]
    pub fn get_result(&self) -> LabeledPublication<T> {
        let mut slot = self.slot.lock().expect("slot mutex poisoned");
        loop {
            if let Some(result) = slot.clone() {
                return result;
            }
            slot = self.condvar.wait(slot).expect("slot mutex poisoned");
        }
    }
}

/// Per-operand-slot state an aggregating node's logic can read and mutate directly.
pub type AggregatingBundle<T> = Vec<Option<T>>;

/// Fan-in over a fixed number of operand channels. The user logic decides, on each
/// arrival, whether enough operands are present to emit (and is responsible for clearing
/// the bundle afterward).
pub struct AggregatingNode<T, Out>
where
    T: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + 'static,
{
    base: NodeBase<Self>,
    bundle: Mutex<AggregatingBundle<T>>,
    logic: Mutex<Box<dyn FnMut(usize, T, &mut AggregatingBundle<T>, usize, &Publisher<Out>) + Send>>,
    output: Publisher<Out>,
}

impl<T, Out> std::fmt::Debug for AggregatingNode<T, Out>
where
    T: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatingNode")
            .field("base", &self.base)
            .field("operand_count", &self.bundle.lock().map(|b| b.len()).unwrap_or(0))
            .field("output", &self.output)
            .finish()
    }
}

impl<T, Out> AggregatingNode<T, Out>
where
    T: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + 'static,
{
    pub fn new(
        node_id: i32,
        highway: Arc<Highway>,
        operand_count: usize,
        logic: impl FnMut(usize, T, &mut AggregatingBundle<T>, usize, &Publisher<Out>) + Send + 'static,
    ) -> Arc<Self> {
        let node = Arc::new(Self {
            base: NodeBase::new(node_id, &highway),
            bundle: Mutex::new(vec![None; operand_count]),
            logic: Mutex::new(Box::new(logic)),
            output: Publisher::new(node_id, ChannelConfig::default()),
        });
        node.base.bind_self(&node);
        node
    }

    #[must_use]
    pub fn base(&self) -> &NodeBase<Self> {
        &self.base
    }

    #[must_use]
    pub fn output(&self) -> &Publisher<Out> {
        &self.output
    }

    pub fn connect_operand(self: &Arc<Self>, label: &'static str, operand_id: usize, upstream: &Publisher<T>, highway: Option<Arc<Highway>>) {
        let weak = self.base.weak_self();
        let subscription = connect_input(&upstream.channel, highway, move |publication| {
            if let Some(node) = weak.upgrade() {
                node.accept_operand(operand_id, publication.value);
            }
        });
        self.base.register_in_channel(label, subscription);
    }

    fn accept_operand(&self, operand_id: usize, value: T) {
        let mut bundle = self.bundle.lock().expect("bundle mutex poisoned");
        let operand_count = bundle.len();
        let mut logic = self.logic.lock().expect("aggregating logic mutex poisoned");
        logic(operand_id, value, &mut bundle, operand_count, &self.output);
        drop(logic);
        drop(bundle);
        self.base.report_progress(self.base.node_id());
    }

    /// Forcibly severs every downstream subscriber of this node's output publisher tagged
    /// with `label`.
    pub fn delete_out_channels_by_label(self: &Arc<Self>, label: &'static str) {
        let weak = Arc::downgrade(self);
        let _ = self.base.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                if let Some(node) = weak.upgrade() {
                    node.output.remove_subscribers_by_label(label);
                }
            },
            file!(),
            line!(),
        );
    }

    /// Forcibly severs every downstream subscriber of this node's output publisher.
    pub fn delete_all_out_channels(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let _ = self.base.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                if let Some(node) = weak.upgrade() {
                    node.output.remove_all_subscribers();
                }
            },
            file!(),
            line!(),
        );
    }
}

/// Routes each input to one of two labeled output publishers based on user logic.
pub struct IfElseNode<T: Clone + Send + PartialEq + 'static> {
    base: NodeBase<Self>,
    predicate: Mutex<Box<dyn FnMut(&T) -> bool + Send>>,
    if_branch: Publisher<T>,
    else_branch: Publisher<T>,
}

impl<T: Clone + Send + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for IfElseNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IfElseNode")
            .field("base", &self.base)
            .field("if_branch", &self.if_branch)
            .field("else_branch", &self.else_branch)
            .finish()
    }
}

impl<T: Clone + Send + PartialEq + 'static> IfElseNode<T> {
    pub fn new(node_id: i32, highway: Arc<Highway>, predicate: impl FnMut(&T) -> bool + Send + 'static) -> Arc<Self> {
        let node = Arc::new(Self {
            base: NodeBase::new(node_id, &highway),
            predicate: Mutex::new(Box::new(predicate)),
            if_branch: Publisher::new(node_id, ChannelConfig::default()),
            else_branch: Publisher::new(node_id, ChannelConfig::default()),
        });
        node.base.bind_self(&node);
        node
    }

    #[must_use]
    pub fn base(&self) -> &NodeBase<Self> {
        &self.base
    }

    #[must_use]
    pub fn if_branch(&self) -> &Publisher<T> {
        &self.if_branch
    }

    #[must_use]
    pub fn else_branch(&self) -> &Publisher<T> {
        &self.else_branch
    }

    pub fn connect_input(self: &Arc<Self>, label: &'static str, upstream: &Publisher<T>, highway: Option<Arc<Highway>>) {
        let weak = self.base.weak_self();
        let subscription = connect_input(&upstream.channel, highway, move |publication| {
            if let Some(node) = weak.upgrade() {
                node.accept(publication.value);
            }
        });
        self.base.register_in_channel(label, subscription);
    }

    fn accept(&self, value: T) {
        let routes_to_if = (self.predicate.lock().expect("predicate mutex poisoned"))(&value);
        if routes_to_if {
            self.if_branch.publish(value);
        } else {
            self.else_branch.publish(value);
        }
        self.base.report_progress(self.base.node_id());
    }

    /// Forcibly severs every downstream subscriber of both branch publishers tagged with
    /// `label`.
    pub fn delete_out_channels_by_label(self: &Arc<Self>, label: &'static str) {
        let weak = Arc::downgrade(self);
        let _ = self.base.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                if let Some(node) = weak.upgrade() {
                    node.if_branch.remove_subscribers_by_label(label);
                    node.else_branch.remove_subscribers_by_label(label);
                }
            },
            file!(),
            line!(),
        );
    }

    /// Forcibly severs every downstream subscriber of both branch publishers.
    pub fn delete_all_out_channels(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let _ = self.base.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                if let Some(node) = weak.upgrade() {
                    node.if_branch.remove_all_subscribers();
                    node.else_branch.remove_all_subscribers();
                }
            },
            file!(),
            line!(),
        );
    }
}

/// Waits for exactly one value on each of two operand slots, then invokes user logic and
/// resets both slots.
pub struct TwoOperandNode<A, B, Out>
where
    A: Clone + Send + PartialEq + 'static,
    B: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + 'static,
{
    base: NodeBase<Self>,
    slots: Mutex<(Option<A>, Option<B>)>,
    logic: Mutex<Box<dyn FnMut(A, B) -> Out + Send>>,
    output: Publisher<Out>,
}

impl<A, B, Out> std::fmt::Debug for TwoOperandNode<A, B, Out>
where
    A: Clone + Send + PartialEq + 'static,
    B: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoOperandNode").field("base", &self.base).field("output", &self.output).finish()
    }
}

impl<A, B, Out> TwoOperandNode<A, B, Out>
where
    A: Clone + Send + PartialEq + 'static,
    B: Clone + Send + PartialEq + 'static,
    Out: Clone + Send + PartialEq + 'static,
{
    pub fn new(node_id: i32, highway: Arc<Highway>, logic: impl FnMut(A, B) -> Out + Send + 'static) -> Arc<Self> {
        let node = Arc::new(Self {
            base: NodeBase::new(node_id, &highway),
            slots: Mutex::new((None, None)),
            logic: Mutex::new(Box::new(logic)),
            output: Publisher::new(node_id, ChannelConfig::default()),
        });
        node.base.bind_self(&node);
        node
    }

    #[must_use]
    pub fn base(&self) -> &NodeBase<Self> {
        &self.base
    }

    #[must_use]
    pub fn output(&self) -> &Publisher<Out> {
        &self.output
    }

    pub fn accept_a(&self, value: A) {
        self.accept(Some(value), None);
    }

    pub fn accept_b(&self, value: B) {
        self.accept(None, Some(value));
    }

    fn accept(&self, a: Option<A>, b: Option<B>) {
        let mut slots = self.slots.lock().expect("slots mutex poisoned");
        if let Some(a) = a {
            slots.0 = Some(a);
        }
        if let Some(b) = b {
            slots.1 = Some(b);
        }
        if slots.0.is_some() && slots.1.is_some() {
            let a = slots.0.take().expect("just checked");
            let b = slots.1.take().expect("just checked");
            drop(slots);
            let result = (self.logic.lock().expect("two-operand logic mutex poisoned"))(a, b);
            self.output.publish(result);
            self.base.report_progress(self.base.node_id());
        }
    }

    /// Forcibly severs every downstream subscriber of this node's output publisher tagged
    /// with `label`.
    pub fn delete_out_channels_by_label(self: &Arc<Self>, label: &'static str) {
        let weak = Arc::downgrade(self);
        let _ = self.base.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                if let Some(node) = weak.upgrade() {
                    node.output.remove_subscribers_by_label(label);
                }
            },
            file!(),
            line!(),
        );
    }

    /// Forcibly severs every downstream subscriber of this node's output publisher.
    pub fn delete_all_out_channels(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let _ = self.base.highway.execute_checked(
            move |_cancel: &CancellationToken| {
                if let Some(node) = weak.upgrade() {
                    node.output.remove_all_subscribers();
                }
            },
            file!(),
            line!(),
        );
    }
}

/// A sink with no intake of its own: bound logic is triggered by publications of any type,
/// from any number of unrelated upstream channels.
pub struct VoidEntryNode {
    base: NodeBase<Self>,
    trigger_count: AtomicI32,
    logic: Mutex<Box<dyn FnMut(i32) + Send>>,
}

impl std::fmt::Debug for VoidEntryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoidEntryNode")
            .field("base", &self.base)
            .field("trigger_count", &self.trigger_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl VoidEntryNode {
    pub fn new(node_id: i32, highway: Arc<Highway>, logic: impl FnMut(i32) + Send + 'static) -> Arc<Self> {
        let node = Arc::new(Self {
            base: NodeBase::new(node_id, &highway),
            trigger_count: AtomicI32::new(0),
            logic: Mutex::new(Box::new(logic)),
        });
        node.base.bind_self(&node);
        node
    }

    #[must_use]
    pub fn base(&self) -> &NodeBase<Self> {
        &self.base
    }

    /// Subscribes this node to `upstream` under `label`, ignoring the published value's
    /// content.
    pub fn connect<P: Clone + Send + PartialEq + 'static>(self: &Arc<Self>, label: &'static str, upstream: &Channel<P>, highway: Option<Arc<Highway>>) {
        let weak = self.base.weak_self();
        let subscription = upstream.subscribe(
            SubscriptionOptions {
                highway,
                ..Default::default()
            },
            move |_value| {
                if let Some(node) = weak.upgrade() {
                    node.trigger();
                }
                true
            },
        );
        self.base.register_in_channel(label, subscription);
    }

    fn trigger(&self) {
        let count = self.trigger_count.fetch_add(1, Ordering::Relaxed) + 1;
        (self.logic.lock().expect("void-entry logic mutex poisoned"))(count);
        self.base.report_progress(self.base.node_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn test_highway(name: &str) -> Arc<Highway> {
        Highway::new(highway_core::HighwayConfig::named(name)).unwrap()
    }

    #[test]
    fn default_node_doubles_values_inline() {
        let highway = test_highway("node-plain");
        let upstream: Publisher<i32> = Publisher::new(0, ChannelConfig::default());
        let node = DefaultNode::new(1, Arc::clone(&highway), NodeLogic::Plain(Box::new(|v: i32| v * 2)));
        node.connect_input("upstream", &upstream, false);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _out_sub = node.output().subscribe(SubscriptionOptions::default(), move |publication| {
            seen_clone.lock().unwrap().push(publication.value);
            true
        });

        upstream.publish(1);
        upstream.publish(2);
        assert_eq!(*seen.lock().unwrap(), vec![2, 4]);
        highway.destroy();
    }

    #[test]
    fn default_node_survives_after_upstream_keeps_only_a_weak_path_to_it() {
        let highway = test_highway("node-weak");
        let upstream: Publisher<i32> = Publisher::new(0, ChannelConfig::default());
        let node = DefaultNode::new(1, Arc::clone(&highway), NodeLogic::Plain(Box::new(|v: i32| v * 2)));
        node.connect_input("upstream", &upstream, false);
        let weak = Arc::downgrade(&node);
        drop(node);
        assert!(weak.upgrade().is_none(), "dropping every Arc<DefaultNode> must free it even while upstream is still wired");
        highway.destroy();
    }

    #[test]
    fn delete_in_channels_by_label_detaches_only_the_matching_upstream() {
        let highway = test_highway("node-delete-in");
        let upstream_a: Publisher<i32> = Publisher::new(0, ChannelConfig::default());
        let upstream_b: Publisher<i32> = Publisher::new(0, ChannelConfig::default());
        let node = DefaultNode::new(1, Arc::clone(&highway), NodeLogic::Plain(Box::new(|v: i32| v)));
        node.connect_input("a", &upstream_a, false);
        node.connect_input("b", &upstream_b, false);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _out_sub = node.output().subscribe(SubscriptionOptions::default(), move |publication| {
            seen_clone.lock().unwrap().push(publication.value);
            true
        });

        node.base().delete_in_channels_by_label("a");
        std::thread::sleep(Duration::from_millis(20));

        upstream_a.publish(1);
        upstream_b.publish(2);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(*seen.lock().unwrap(), vec![2], "only the \"b\" upstream should still be wired");
        highway.destroy();
    }

    #[test]
    fn delete_all_out_channels_severs_every_downstream_subscriber() {
        let highway = test_highway("node-delete-out");
        let node = DefaultNode::new(1, Arc::clone(&highway), NodeLogic::Plain(Box::new(|v: i32| v)));

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _out_sub = node.output().subscribe(SubscriptionOptions::default(), move |publication| {
            seen_clone.lock().unwrap().push(publication.value);
            true
        });

        node.output().publish(1);
        node.delete_all_out_channels();
        std::thread::sleep(Duration::from_millis(20));
        node.output().publish(2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        highway.destroy();
    }

    #[test]
    fn aggregating_node_emits_sum_and_resets() {
        let highway = test_highway("node-aggregating");
        let node: Arc<AggregatingNode<i32, i32>> = AggregatingNode::new(1, Arc::clone(&highway), 3, |operand, value, bundle, total, out| {
            bundle[operand] = Some(value);
            if bundle.iter().filter(|slot| slot.is_some()).count() == total {
                let sum: i32 = bundle.iter().flatten().sum();
                out.publish(sum);
                bundle.iter_mut().for_each(|slot| *slot = None);
            }
        });

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = node.output().subscribe(SubscriptionOptions::default(), move |publication| {
            seen_clone.lock().unwrap().push(publication.value);
            true
        });

        node.accept_operand(0, 1);
        node.accept_operand(1, 2);
        node.accept_operand(2, 3);
        node.accept_operand(0, 10);
        node.accept_operand(1, 20);
        node.accept_operand(2, 30);

        assert_eq!(*seen.lock().unwrap(), vec![6, 60]);
        highway.destroy();
    }

    #[test]
    fn if_else_node_routes_by_predicate() {
        let highway = test_highway("node-if-else");
        let node = IfElseNode::new(1, Arc::clone(&highway), |value: &i32| *value >= 0);

        let if_seen = Arc::new(StdMutex::new(Vec::new()));
        let if_seen_clone = Arc::clone(&if_seen);
        let _if_sub = node.if_branch().subscribe(SubscriptionOptions::default(), move |p| {
            if_seen_clone.lock().unwrap().push(p.value);
            true
        });

        let else_seen = Arc::new(StdMutex::new(Vec::new()));
        let else_seen_clone = Arc::clone(&else_seen);
        let _else_sub = node.else_branch().subscribe(SubscriptionOptions::default(), move |p| {
            else_seen_clone.lock().unwrap().push(p.value);
            true
        });

        for value in [-1, 2, -3, 4] {
            node.accept(value);
        }

        assert_eq!(*if_seen.lock().unwrap(), vec![2, 4]);
        assert_eq!(*else_seen.lock().unwrap(), vec![-1, -3]);
        highway.destroy();
    }

    #[test]
    fn two_operand_node_fires_once_both_slots_are_full() {
        let highway = test_highway("node-two-operand");
        let node: Arc<TwoOperandNode<i32, i32, i32>> = TwoOperandNode::new(1, Arc::clone(&highway), |a, b| a + b);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = node.output().subscribe(SubscriptionOptions::default(), move |p| {
            seen_clone.lock().unwrap().push(p.value);
            true
        });

        node.accept_a(1);
        assert!(seen.lock().unwrap().is_empty());
        node.accept_b(2);
        assert_eq!(*seen.lock().unwrap(), vec![3]);
        highway.destroy();
    }

    #[test]
    fn result_node_blocks_until_value_arrives() {
        let highway = test_highway("node-result");
        let node: Arc<ResultNode<i32>> = ResultNode::new(1, Arc::clone(&highway), None);
        let node_clone = Arc::clone(&node);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            node_clone.accept(0, 7);
        });
        assert_eq!(node.get_result().value, 7);
        highway.destroy();
    }

    #[test]
    fn void_entry_node_triggers_on_unrelated_publications() {
        let highway = test_highway("node-void-entry");
        let channel: Channel<&'static str> = Channel::new(ChannelConfig::default());
        let count = Arc::new(StdMutex::new(0));
        let count_clone = Arc::clone(&count);
        let node = VoidEntryNode::new(1, Arc::clone(&highway), move |n| *count_clone.lock().unwrap() = n);
        node.connect("source", &channel, None);
        channel.publish("anything");
        channel.publish("anything else");
        assert_eq!(*count.lock().unwrap(), 2);
        highway.destroy();
    }

    #[test]
    fn delete_all_in_channels_detaches_every_upstream() {
        let highway = test_highway("node-delete-all-in");
        let channel_a: Channel<&'static str> = Channel::new(ChannelConfig::default());
        let channel_b: Channel<&'static str> = Channel::new(ChannelConfig::default());
        let count = Arc::new(StdMutex::new(0));
        let count_clone = Arc::clone(&count);
        let node = VoidEntryNode::new(1, Arc::clone(&highway), move |n| *count_clone.lock().unwrap() = n);
        node.connect("a", &channel_a, None);
        node.connect("b", &channel_b, None);

        node.base().delete_all_in_channels();
        std::thread::sleep(Duration::from_millis(20));

        channel_a.publish("x");
        channel_b.publish("y");
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(*count.lock().unwrap(), 0, "every input should have been detached");
        highway.destroy();
    }
}
