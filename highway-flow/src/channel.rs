// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! Typed publish/subscribe channels with four orthogonal policy axes: who may call
//! `publish`, whether delivery is inline or rescheduled onto a highway, whether the
//! channel replays its last value to new subscribers, and whether a subscriber dedups
//! consecutive equal values. Single-vs-many-producer and sticky/dedup are plain config
//! flags rather than separate generic types, since trait objects already erase the
//! callback shape and a flag is cheaper to read than a type parameter at this scale.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use highway_core::Highway;

/// Per-channel behavior: how producers are expected to call `publish`, and whether the
/// channel replays its last value to new subscribers.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelConfig {
    /// `false` (the default) means `publish` is only ever called from one thread; a debug
    /// build asserts this. `true` guards every publish behind the subscriber-set mutex
    /// (which this channel always takes anyway — see the module doc).
    pub many_producers: bool,
    /// Retain the last published value and replay it to each new subscriber before
    /// `subscribe` returns.
    pub sticky: bool,
}

/// Per-subscription behavior chosen at `subscribe` time.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionOptions {
    /// `None` delivers inline, on the publisher's thread. `Some(highway)` posts a task to
    /// that highway instead.
    pub highway: Option<Arc<Highway>>,
    /// Only meaningful when `highway` is `Some`: `true` drops the message if the
    /// highway's mailbox is full, `false` blocks the publisher until a holder frees.
    pub send_may_fail: bool,
    /// Suppress delivery when the new value equals the last one delivered to this
    /// specific subscriber.
    pub dedup: bool,
    /// An optional tag a publisher's own owner can use to sever this subscription later,
    /// from its own side, via [`Channel::remove_subscribers_by_label`] — independent of
    /// whether the subscriber is still holding its [`Subscription`] handle.
    pub label: Option<&'static str>,
}

struct SubscriptionEntry<T> {
    id: u64,
    callback: Mutex<Box<dyn FnMut(T) -> bool + Send>>,
    highway: Option<Arc<Highway>>,
    send_may_fail: bool,
    dedup: bool,
    label: Option<&'static str>,
    last_delivered: Mutex<Option<T>>,
    alive: Arc<AtomicBool>,
}

impl<T> std::fmt::Debug for SubscriptionEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("callback", &"<fn>")
            .field("highway", &self.highway)
            .field("send_may_fail", &self.send_may_fail)
            .field("dedup", &self.dedup)
            .field("label", &self.label)
            .field("alive", &self.alive.load(Ordering::Acquire))
            .finish()
    }
}

/// A handle returned by [`Channel::subscribe`]. Dropping it unsubscribes, unless
/// [`Self::detach`] is called first to leave the subscription owned by the channel for as
/// long as the channel itself lives.
pub struct Subscription<T> {
    _id: u64,
    alive: Arc<AtomicBool>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self._id)
            .field("alive", &self.alive.load(Ordering::Acquire))
            .finish()
    }
}

impl<T> Subscription<T> {
    /// Leaves the subscription active for as long as the channel lives, rather than
    /// unsubscribing when this handle is dropped.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}

/// A typed publish/subscribe channel.
///
/// `publish` and `subscribe` both take the single subscriber-set lock, which is what
/// makes the sticky-replay-ordering guarantee hold: a subscribe that arrives while a
/// publish is in flight waits for that publish to finish iterating before it can see (and
/// replay) the channel's current last value.
pub struct Channel<T: Clone + Send + PartialEq + 'static> {
    config: ChannelConfig,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Arc<SubscriptionEntry<T>>>>,
    last_value: Mutex<Option<T>>,
    publisher_thread: Mutex<Option<std::thread::ThreadId>>,
}

impl<T: Clone + Send + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("config", &self.config)
            .field("subscriber_count", &self.subscriber_count())
            .field("last_value", &self.last_value)
            .finish()
    }
}

impl<T: Clone + Send + PartialEq + 'static> Channel<T> {
    #[must_use]
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            last_value: Mutex::new(None),
            publisher_thread: Mutex::new(None),
        }
    }

    /// Adds a subscriber. If the channel is sticky and already has a last value, that
    /// value is delivered to `callback` before this call returns. `callback` returning
    /// `false` marks the subscription dead (pruned on the next publish it would have
    /// received, or immediately for inline delivery).
    pub fn subscribe(
        &self,
        options: SubscriptionOptions,
        callback: impl FnMut(T) -> bool + Send + 'static,
    ) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));
        let entry = Arc::new(SubscriptionEntry {
            id,
            callback: Mutex::new(Box::new(callback)),
            highway: options.highway,
            send_may_fail: options.send_may_fail,
            dedup: options.dedup,
            label: options.label,
            last_delivered: Mutex::new(None),
            alive: Arc::clone(&alive),
        });

        let mut subscribers = self.subscribers.lock().expect("subscribers mutex poisoned");
        if self.config.sticky {
            if let Some(value) = self.last_value.lock().expect("last_value mutex poisoned").clone() {
                deliver(&entry, value);
            }
        }
        subscribers.push(entry);

        Subscription {
            _id: id,
            alive,
            _marker: std::marker::PhantomData,
        }
    }

    /// Delivers `value` to every live subscriber, in ascending subscription-id order
    /// (which is also insertion order, since ids are assigned monotonically at
    /// `subscribe` time and never reordered).
    pub fn publish(&self, value: T) {
        if !self.config.many_producers {
            let this_thread = std::thread::current().id();
            let mut publisher_thread = self.publisher_thread.lock().expect("publisher_thread mutex poisoned");
            match *publisher_thread {
                Some(recorded) => debug_assert_eq!(
                    recorded, this_thread,
                    "publish-one channel published from more than one thread"
                ),
                None => *publisher_thread = Some(this_thread),
            }
        }

        let mut subscribers = self.subscribers.lock().expect("subscribers mutex poisoned");
        if self.config.sticky {
            *self.last_value.lock().expect("last_value mutex poisoned") = Some(value.clone());
        }
        subscribers.retain(|entry| entry.alive.load(Ordering::Acquire) && deliver(entry, value.clone()));
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscribers mutex poisoned").len()
    }

    /// Forcibly severs every live subscriber tagged with `label` at `subscribe` time, from
    /// this channel's own side — the subscriber's [`Subscription`] handle, if it still
    /// holds one, simply becomes inert rather than panicking on a later drop.
    pub fn remove_subscribers_by_label(&self, label: &str) {
        let subscribers = self.subscribers.lock().expect("subscribers mutex poisoned");
        for entry in subscribers.iter().filter(|entry| entry.label == Some(label)) {
            entry.alive.store(false, Ordering::Release);
        }
    }

    /// Forcibly severs every live subscriber, regardless of label.
    pub fn remove_all_subscribers(&self) {
        let subscribers = self.subscribers.lock().expect("subscribers mutex poisoned");
        for entry in subscribers.iter() {
            entry.alive.store(false, Ordering::Release);
        }
    }
}

/// Delivers one value to one subscriber, applying dedup and the inline/rescheduled split.
/// Returns whether the subscription should remain in the channel's list.
fn deliver<T: Clone + Send + PartialEq + 'static>(entry: &Arc<SubscriptionEntry<T>>, value: T) -> bool {
    if entry.dedup {
        let mut last = entry.last_delivered.lock().expect("last_delivered mutex poisoned");
        if last.as_ref() == Some(&value) {
            return true;
        }
        *last = Some(value.clone());
    }

    match &entry.highway {
        None => {
            let mut callback = entry.callback.lock().expect("callback mutex poisoned");
            if (callback)(value) {
                true
            } else {
                drop(callback);
                entry.alive.store(false, Ordering::Release);
                false
            }
        }
        Some(highway) => {
            let send_may_fail = entry.send_may_fail;
            let entry = Arc::clone(entry);
            let body = move |_cancel: &highway_core::CancellationToken| {
                let mut callback = entry.callback.lock().expect("callback mutex poisoned");
                if !(callback)(value.clone()) {
                    entry.alive.store(false, Ordering::Release);
                }
            };
            if send_may_fail {
                highway.try_execute(body, file!(), line!());
            } else {
                highway.execute(body, file!(), line!());
            }
            true
        }
    }
}
