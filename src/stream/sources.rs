//! Source constructors: `from_value`, `from_array`, `from_future` (the Rust
//! analogue of `fromPromise`), `empty`, `make`, `make_subject` and
//! `from_subscription`.

use std::cell::Cell;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use indexmap::IndexMap;

use super::core::Sink;
use super::core::Source;
use super::core::Subscription;
use crate::error::ExchangeError;

pub fn from_value<T: Clone + 'static>(value: T) -> Source<T> {
    Source::new(move |sink| {
        sink.next(value.clone());
        sink.complete();
        Subscription::empty()
    })
}

pub fn from_array<T: Clone + 'static>(values: Vec<T>) -> Source<T> {
    Source::new(move |sink| {
        for value in &values {
            sink.next(value.clone());
        }
        sink.complete();
        Subscription::empty()
    })
}

pub fn empty<T: 'static>() -> Source<T> {
    Source::new(|sink| {
        sink.complete();
        Subscription::empty()
    })
}

/// The analogue of `fromPromise`: emits the future's output then completes.
/// The future is driven via `tokio::task::spawn_local`, so it must be
/// subscribed from within a `LocalSet` (or any task spawned by one) —
/// everything in this crate runs on a single logical event loop.
pub fn from_future<T, F>(future: F) -> Source<T>
where
    T: 'static,
    F: Future<Output = T> + 'static,
{
    let future = Rc::new(RefCell::new(Some(future)));
    Source::new(move |sink| {
        let cancelled = Rc::new(Cell::new(false));
        let handle = {
            let sink = sink.clone();
            let cancelled = cancelled.clone();
            let future = future.borrow_mut().take();
            tokio::task::spawn_local(async move {
                if let Some(future) = future {
                    let value = future.await;
                    if !cancelled.get() {
                        sink.next(value);
                        sink.complete();
                    }
                }
            })
        };
        Subscription::new(move || {
            cancelled.set(true);
            handle.abort();
        })
    })
}

/// An observer handle passed to a `make` producer.
pub struct Observer<T> {
    sink: Sink<T>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Observer {
            sink: self.sink.clone(),
        }
    }
}

impl<T: 'static> Observer<T> {
    pub fn next(&self, value: T) {
        self.sink.next(value);
    }

    pub fn error(&self, err: ExchangeError) {
        self.sink.error(err);
    }

    pub fn complete(&self) {
        self.sink.complete();
    }
}

/// `make((observer) => cleanup)`: the producer runs once per subscription
/// (sources are multi-subscribe by fresh execution) and must return a
/// cleanup closure run on unsubscribe.
pub fn make<T: 'static>(
    producer: impl Fn(Observer<T>) -> Box<dyn FnMut()> + 'static,
) -> Source<T> {
    Source::new(move |sink| {
        let cleanup = producer(Observer { sink });
        Subscription::new(cleanup)
    })
}

/// A multicast broadcaster: `next`/`complete` push to every sink currently
/// registered via `source()`. Used for the client's central operation
/// input stream and for teardown pairing.
pub struct Subject<T> {
    sinks: Rc<RefCell<IndexMap<u64, Sink<T>>>>,
    next_id: Rc<Cell<u64>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Subject {
            sinks: self.sinks.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<T: Clone + 'static> Subject<T> {
    pub fn new() -> Self {
        Subject {
            sinks: Rc::new(RefCell::new(IndexMap::new())),
            next_id: Rc::new(Cell::new(0)),
        }
    }

    pub fn next(&self, value: T) {
        let sinks: Vec<Sink<T>> = self.sinks.borrow().values().cloned().collect();
        for sink in sinks {
            sink.next(value.clone());
        }
    }

    pub fn complete(&self) {
        let sinks: Vec<Sink<T>> = self.sinks.borrow().values().cloned().collect();
        for sink in sinks {
            sink.complete();
        }
    }

    pub fn source(&self) -> Source<T> {
        let sinks = self.sinks.clone();
        let next_id = self.next_id.clone();
        Source::new(move |sink| {
            let id = next_id.get();
            next_id.set(id + 1);
            sinks.borrow_mut().insert(id, sink);
            let sinks = sinks.clone();
            Subscription::new(move || {
                sinks.borrow_mut().shift_remove(&id);
            })
        })
    }
}

impl<T: Clone + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `make_subject` as a free function, mirroring `Subject::new`.
pub fn make_subject<T: Clone + 'static>() -> Subject<T> {
    Subject::new()
}

/// `fromSubscription(peek, subscribe)`: emits `peek()` immediately, then
/// re-emits on every callback fired by `subscribe`. This is the primitive
/// the cache exchange builds its per-operation trigger stream on top of.
pub fn from_subscription<T: 'static>(
    peek: Rc<dyn Fn() -> T>,
    subscribe: Rc<dyn Fn(Rc<dyn Fn()>) -> Box<dyn FnMut()>>,
) -> Source<T> {
    Source::new(move |sink| {
        sink.next((peek)());
        let sink_for_notify = sink.clone();
        let peek_for_notify = peek.clone();
        let notify: Rc<dyn Fn()> = Rc::new(move || {
            sink_for_notify.next((peek_for_notify)());
        });
        let cleanup = (subscribe)(notify);
        Subscription::new(cleanup)
    })
}
