// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! A linked chain of `Future<T>` stages, each dispatched on its own highway, terminating
//! in a blocking handle.
//!
//! This is a thread-based (not async) runtime, so there is no `std::future<T>` to await;
//! the terminal operations return a [`FutureHandle<T>`] backed by `std::sync::mpsc`
//! instead.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use highway_core::{Highway, HighwayError};

/// A stage's outcome: either its computed value, or an error inherited from (or raised
/// by) an earlier stage. Errors propagate down the chain untouched — later stages never
/// run once a stage has failed.
pub type StageResult<T> = Result<T, Arc<HighwayError>>;

type Successor<T> = Box<dyn FnOnce(StageResult<T>) + Send>;

struct Inner<T> {
    result: Mutex<Option<StageResult<T>>>,
    successor: Mutex<Option<Successor<T>>>,
}

impl<T> std::fmt::Debug for Inner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("done", &self.result.lock().map(|r| r.is_some()).unwrap_or(false))
            .field("successor", &"<fn>")
            .finish()
    }
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(None),
            successor: Mutex::new(None),
        })
    }

    /// Records `result` as this stage's outcome and, if a successor is already waiting
    /// (via [`Self::on_done`]), invokes it immediately. Otherwise the result just sits in
    /// `result` for a later `on_done` call to pick up.
    fn complete(self: &Arc<Self>, result: StageResult<T>) {
        *self.result.lock().expect("result mutex poisoned") = Some(result.clone());
        if let Some(successor) = self.successor.lock().expect("successor mutex poisoned").take() {
            successor(result);
        }
    }

    /// Runs `successor` now if this stage already completed, otherwise stores it to run
    /// from the next [`Self::complete`] call. Only the first registered successor ever
    /// runs — a future chain's stages form a single linked list, not a broadcast tree.
    fn on_done(self: &Arc<Self>, successor: Successor<T>) {
        let existing = self.result.lock().expect("result mutex poisoned").clone();
        match existing {
            Some(result) => successor(result),
            None => *self.successor.lock().expect("successor mutex poisoned") = Some(successor),
        }
    }
}

/// One stage in a future chain. `T` is this stage's own output type; a chain typically
/// mixes several `Future<T>` instantiations connected through [`Self::next`].
pub struct Future<T: Clone + Send + 'static> {
    highway: Arc<Highway>,
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("highway", &self.highway)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Schedules `logic` on `highway` and returns a handle to the eventual result.
    pub fn create(highway: Arc<Highway>, mut logic: impl FnMut() -> StageResult<T> + Send + 'static) -> Arc<Self> {
        let inner = Inner::new();
        let future = Arc::new(Self {
            highway: Arc::clone(&highway),
            inner: Arc::clone(&inner),
        });

        highway.execute(move |_cancel| inner.complete(logic()), file!(), line!());

        future
    }

    /// Chains `next_logic` after this stage: runs on `highway` (defaulting to this
    /// stage's own highway) once this stage's value is ready, skipping `next_logic`
    /// entirely if this stage failed.
    pub fn next<U: Clone + Send + 'static>(
        self: &Arc<Self>,
        highway: Option<Arc<Highway>>,
        mut next_logic: impl FnMut(T) -> StageResult<U> + Send + 'static,
    ) -> Arc<Future<U>> {
        let next_highway = highway.unwrap_or_else(|| Arc::clone(&self.highway));
        let next_inner = Inner::<U>::new();
        let next_future = Arc::new(Future {
            highway: Arc::clone(&next_highway),
            inner: Arc::clone(&next_inner),
        });

        let dispatch_highway = Arc::clone(&next_highway);
        self.inner.on_done(Box::new(move |result: StageResult<T>| {
            dispatch_highway.execute(
                move |_cancel| {
                    let forwarded = match &result {
                        Ok(value) => next_logic(value.clone()),
                        Err(err) => Err(Arc::clone(err)),
                    };
                    next_inner.complete(forwarded);
                },
                file!(),
                line!(),
            );
        }));

        next_future
    }

    /// Returns a blocking handle for this stage's eventual value. The caller must keep
    /// the chain (this `Arc` and every predecessor) alive until the handle resolves.
    #[must_use]
    pub fn execute(self: &Arc<Self>) -> FutureHandle<T> {
        let (tx, rx) = mpsc::channel();
        self.inner.on_done(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        FutureHandle { rx }
    }

    /// Like [`Self::execute`], except the chain is allowed to drop itself once the final
    /// value is set — this `Arc` (and therefore every predecessor it keeps alive) is kept
    /// alive independently until then.
    #[must_use]
    pub fn execute_and_detach(self: &Arc<Self>) -> FutureHandle<T> {
        let (tx, rx) = mpsc::channel();
        let keep_alive = Arc::clone(self);
        self.inner.on_done(Box::new(move |result| {
            let _ = tx.send(result);
            drop(keep_alive);
        }));
        FutureHandle { rx }
    }

    /// Fire-and-forget: the chain runs to completion and any error reaches the final
    /// stage's highway's exception handler instead of any caller.
    pub fn detach(self: &Arc<Self>) {
        let highway = Arc::clone(&self.highway);
        let keep_alive = Arc::clone(self);
        self.inner.on_done(Box::new(move |result| {
            if let Err(err) = result {
                highway.execute(move |_cancel| panic!("{err}"), file!(), line!());
            }
            drop(keep_alive);
        }));
    }
}

/// A blocking handle to a future chain's terminal value, analogous to `std::future<T>`
/// but backed by `std::sync::mpsc` since this is a thread-based runtime.
pub struct FutureHandle<T> {
    rx: mpsc::Receiver<StageResult<T>>,
}

impl<T> std::fmt::Debug for FutureHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureHandle").finish_non_exhaustive()
    }
}

impl<T> FutureHandle<T> {
    /// Blocks until the chain's terminal value or error arrives.
    pub fn join(self) -> StageResult<T> {
        self.rx.recv().expect("future chain dropped without producing a result")
    }

    /// Blocks up to `timeout`. `Err(())` means the timeout elapsed; `Ok(result)` carries
    /// the chain's own success/error outcome.
    pub fn join_timeout(self, timeout: std::time::Duration) -> Result<StageResult<T>, ()> {
        self.rx.recv_timeout(timeout).map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use highway_core::HighwayConfig;

    #[test]
    fn chain_computes_composed_value_when_nothing_fails() {
        let highway = Highway::new(HighwayConfig::named("future-ok")).unwrap();
        let first = Future::create(Arc::clone(&highway), || Ok(1));
        let second = first.next(None, |v| Ok(v + 1));
        let handle = second.execute();
        assert_eq!(handle.join().unwrap(), 2);
        highway.destroy();
    }

    #[test]
    fn error_short_circuits_later_stages() {
        let highway = Highway::new(HighwayConfig::named("future-err")).unwrap();
        let invoked = Arc::new(Mutex::new(false));
        let invoked_clone = Arc::clone(&invoked);

        let first = Future::create(Arc::clone(&highway), || Ok(1));
        let second = first.next(None, |_v: i32| -> StageResult<i32> {
            Err(Arc::new(HighwayError::TaskPanicked {
                highway: "future-err".into(),
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
        assert!(!*invoked.lock().unwrap(), "third stage must not run after an error");
        highway.destroy();
    }

    #[test]
    fn execute_and_detach_resolves_without_caller_holding_the_chain() {
        let highway = Highway::new(HighwayConfig::named("future-detach")).unwrap();
        let handle = {
            let first = Future::create(Arc::clone(&highway), || Ok(5));
            let second = first.next(None, |v| Ok(v * 2));
            second.execute_and_detach()
        };
        assert_eq!(handle.join().unwrap(), 10);
        highway.destroy();
    }
}
