//! Stream operators. Exposed both as free functions and through
//! [`SourceExt`] for method-chaining.

use std::cell::Cell;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use indexmap::IndexMap;

use super::core::Sink;
use super::core::Source;
use super::core::Subscription;

pub fn map<T: 'static, U: 'static>(source: Source<T>, f: impl Fn(T) -> U + 'static) -> Source<U> {
    let f = Rc::new(f);
    Source::new(move |sink| {
        let f = f.clone();
        source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                move |v| sink.next(f(v))
            },
            {
                let sink = sink.clone();
                move |e| sink.error(e)
            },
            move || sink.complete(),
        ))
    })
}

pub fn filter<T: 'static>(source: Source<T>, pred: impl Fn(&T) -> bool + 'static) -> Source<T> {
    let pred = Rc::new(pred);
    Source::new(move |sink| {
        let pred = pred.clone();
        source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                move |v| {
                    if pred(&v) {
                        sink.next(v);
                    }
                }
            },
            {
                let sink = sink.clone();
                move |e| sink.error(e)
            },
            move || sink.complete(),
        ))
    })
}

pub fn tap<T: Clone + 'static>(source: Source<T>, f: impl Fn(&T) + 'static) -> Source<T> {
    let f = Rc::new(f);
    Source::new(move |sink| {
        let f = f.clone();
        source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                move |v| {
                    f(&v);
                    sink.next(v);
                }
            },
            {
                let sink = sink.clone();
                move |e| sink.error(e)
            },
            move || sink.complete(),
        ))
    })
}

/// Subscribes each inner source concurrently. Outer completion plus every
/// inner completion yields downstream completion; an error from any source
/// propagates and cancels the remaining peers.
pub fn merge_map<T: 'static, U: 'static>(
    source: Source<T>,
    f: impl Fn(T) -> Source<U> + 'static,
) -> Source<U> {
    let f = Rc::new(f);
    Source::new(move |sink| {
        let ended = Rc::new(Cell::new(false));
        let outer_done = Rc::new(Cell::new(false));
        let inner_subs: Rc<RefCell<IndexMap<u64, Subscription>>> =
            Rc::new(RefCell::new(IndexMap::new()));
        let next_id = Rc::new(Cell::new(0u64));

        let finish_if_done = {
            let ended = ended.clone();
            let outer_done = outer_done.clone();
            let inner_subs = inner_subs.clone();
            let sink = sink.clone();
            move || {
                if !ended.get() && outer_done.get() && inner_subs.borrow().is_empty() {
                    ended.set(true);
                    sink.complete();
                }
            }
        };

        let f = f.clone();
        let outer_sub = source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                let ended = ended.clone();
                let inner_subs = inner_subs.clone();
                let next_id = next_id.clone();
                let finish_if_done = finish_if_done.clone();
                move |v| {
                    if ended.get() {
                        return;
                    }
                    let id = next_id.get();
                    next_id.set(id + 1);
                    let inner_source = f(v);
                    let inner_subs_for_sub = inner_subs.clone();
                    let sink_inner = sink.clone();
                    let ended_inner = ended.clone();
                    let finish_inner = finish_if_done.clone();
                    let sub = inner_source.subscribe_raw(Sink::new(
                        {
                            let sink_inner = sink_inner.clone();
                            let ended_inner = ended_inner.clone();
                            move |v| {
                                if !ended_inner.get() {
                                    sink_inner.next(v);
                                }
                            }
                        },
                        {
                            let sink_inner = sink_inner.clone();
                            let ended_inner = ended_inner.clone();
                            let inner_subs_for_err = inner_subs_for_sub.clone();
                            move |e| {
                                if !ended_inner.get() {
                                    ended_inner.set(true);
                                    for (_, s) in inner_subs_for_err.borrow().iter() {
                                        s.unsubscribe();
                                    }
                                    sink_inner.error(e);
                                }
                            }
                        },
                        {
                            let inner_subs_for_complete = inner_subs_for_sub.clone();
                            move || {
                                inner_subs_for_complete.borrow_mut().shift_remove(&id);
                                finish_inner();
                            }
                        },
                    ));
                    inner_subs.borrow_mut().insert(id, sub);
                }
            },
            {
                let sink = sink.clone();
                let ended = ended.clone();
                move |e| {
                    if !ended.get() {
                        ended.set(true);
                        sink.error(e);
                    }
                }
            },
            {
                let outer_done = outer_done.clone();
                let finish_if_done = finish_if_done.clone();
                move || {
                    outer_done.set(true);
                    finish_if_done();
                }
            },
        ));

        Subscription::new(move || {
            outer_sub.unsubscribe();
            for (_, s) in inner_subs.borrow().iter() {
                s.unsubscribe();
            }
        })
    })
}

/// On each new outer value, unsubscribes the previous inner source (if
/// any) before subscribing to the new one.
pub fn switch_map<T: 'static, U: 'static>(
    source: Source<T>,
    f: impl Fn(T) -> Source<U> + 'static,
) -> Source<U> {
    let f = Rc::new(f);
    Source::new(move |sink| {
        let ended = Rc::new(Cell::new(false));
        let outer_done = Rc::new(Cell::new(false));
        let current: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let inner_active = Rc::new(Cell::new(false));

        let finish_if_done = {
            let ended = ended.clone();
            let outer_done = outer_done.clone();
            let inner_active = inner_active.clone();
            let sink = sink.clone();
            move || {
                if !ended.get() && outer_done.get() && !inner_active.get() {
                    ended.set(true);
                    sink.complete();
                }
            }
        };

        let f = f.clone();
        let outer_sub = source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                let ended = ended.clone();
                let current = current.clone();
                let inner_active = inner_active.clone();
                let finish_if_done = finish_if_done.clone();
                move |v| {
                    if ended.get() {
                        return;
                    }
                    if let Some(prev) = current.borrow_mut().take() {
                        prev.unsubscribe();
                    }
                    inner_active.set(true);
                    let inner_source = f(v);
                    let sink_inner = sink.clone();
                    let ended_inner = ended.clone();
                    let inner_active_inner = inner_active.clone();
                    let finish_inner = finish_if_done.clone();
                    let sub = inner_source.subscribe_raw(Sink::new(
                        {
                            let sink_inner = sink_inner.clone();
                            let ended_inner = ended_inner.clone();
                            move |v| {
                                if !ended_inner.get() {
                                    sink_inner.next(v);
                                }
                            }
                        },
                        {
                            let sink_inner = sink_inner.clone();
                            let ended_inner = ended_inner.clone();
                            move |e| {
                                if !ended_inner.get() {
                                    ended_inner.set(true);
                                    sink_inner.error(e);
                                }
                            }
                        },
                        move || {
                            inner_active_inner.set(false);
                            finish_inner();
                        },
                    ));
                    *current.borrow_mut() = Some(sub);
                }
            },
            {
                let sink = sink.clone();
                let ended = ended.clone();
                move |e| {
                    if !ended.get() {
                        ended.set(true);
                        sink.error(e);
                    }
                }
            },
            move || {
                outer_done.set(true);
                finish_if_done();
            },
        ));

        Subscription::new(move || {
            outer_sub.unsubscribe();
            if let Some(s) = current.borrow_mut().take() {
                s.unsubscribe();
            }
        })
    })
}

/// Emits from every source concurrently; completes once all have
/// completed. Synchronous emissions made while later sources are still
/// being subscribed are forwarded directly (no reentrancy issue: each
/// source's subscribe call runs to completion before the next begins, and
/// the shared sink is already wired before any of them start).
pub fn merge<T: 'static>(sources: Vec<Source<T>>) -> Source<T> {
    Source::new(move |sink| {
        let total = sources.len();
        if total == 0 {
            sink.complete();
            return Subscription::empty();
        }
        let completed = Rc::new(Cell::new(0usize));
        let ended = Rc::new(Cell::new(false));
        let subs: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::with_capacity(total)));

        for src in sources.clone() {
            let sink = sink.clone();
            let completed = completed.clone();
            let ended = ended.clone();
            let subs_for_error = subs.clone();
            let sub = src.subscribe_raw(Sink::new(
                {
                    let sink = sink.clone();
                    let ended = ended.clone();
                    move |v| {
                        if !ended.get() {
                            sink.next(v);
                        }
                    }
                },
                {
                    let sink = sink.clone();
                    let ended = ended.clone();
                    move |e| {
                        if !ended.get() {
                            ended.set(true);
                            for s in subs_for_error.borrow().iter() {
                                s.unsubscribe();
                            }
                            sink.error(e);
                        }
                    }
                },
                {
                    let sink = sink.clone();
                    let ended = ended.clone();
                    let completed = completed.clone();
                    move || {
                        completed.set(completed.get() + 1);
                        if completed.get() == total && !ended.get() {
                            ended.set(true);
                            sink.complete();
                        }
                    }
                },
            ));
            subs.borrow_mut().push(sub);
        }

        let subs_cleanup = subs.clone();
        Subscription::new(move || {
            for s in subs_cleanup.borrow().iter() {
                s.unsubscribe();
            }
        })
    })
}

/// Completes (and tears down `source`) as soon as `notifier` emits any
/// value.
pub fn take_until<T: 'static, N: 'static>(source: Source<T>, notifier: Source<N>) -> Source<T> {
    Source::new(move |sink| {
        let ended = Rc::new(Cell::new(false));
        let main_sub: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let notifier_sub: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let sub = source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                let ended = ended.clone();
                move |v| {
                    if !ended.get() {
                        sink.next(v);
                    }
                }
            },
            {
                let sink = sink.clone();
                let ended = ended.clone();
                move |e| {
                    if !ended.get() {
                        ended.set(true);
                        sink.error(e);
                    }
                }
            },
            {
                let sink = sink.clone();
                let ended = ended.clone();
                move || {
                    if !ended.get() {
                        ended.set(true);
                        sink.complete();
                    }
                }
            },
        ));
        *main_sub.borrow_mut() = Some(sub);

        let n_sub = notifier.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                let ended = ended.clone();
                let main_sub = main_sub.clone();
                move |_| {
                    if !ended.get() {
                        ended.set(true);
                        if let Some(s) = main_sub.borrow_mut().take() {
                            s.unsubscribe();
                        }
                        sink.complete();
                    }
                }
            },
            |_e| {},
            || {},
        ));
        *notifier_sub.borrow_mut() = Some(n_sub);

        Subscription::new(move || {
            if let Some(s) = main_sub.borrow_mut().take() {
                s.unsubscribe();
            }
            if let Some(s) = notifier_sub.borrow_mut().take() {
                s.unsubscribe();
            }
        })
    })
}

/// Forwards the first `n` values then completes and tears down upstream.
pub fn take<T: 'static>(source: Source<T>, n: usize) -> Source<T> {
    Source::new(move |sink| {
        if n == 0 {
            sink.complete();
            return Subscription::empty();
        }
        let remaining = Rc::new(Cell::new(n));
        let ended = Rc::new(Cell::new(false));
        let sub: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let inner = source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                let remaining = remaining.clone();
                let ended = ended.clone();
                let sub = sub.clone();
                move |v| {
                    if ended.get() {
                        return;
                    }
                    let left = remaining.get();
                    if left == 0 {
                        return;
                    }
                    sink.next(v);
                    remaining.set(left - 1);
                    if left - 1 == 0 {
                        ended.set(true);
                        if let Some(s) = sub.borrow_mut().take() {
                            s.unsubscribe();
                        }
                        sink.complete();
                    }
                }
            },
            {
                let sink = sink.clone();
                let ended = ended.clone();
                move |e| {
                    if !ended.get() {
                        ended.set(true);
                        sink.error(e);
                    }
                }
            },
            {
                let ended = ended.clone();
                move || {
                    if !ended.get() {
                        ended.set(true);
                        sink.complete();
                    }
                }
            },
        ));
        *sub.borrow_mut() = Some(inner);

        let sub_cleanup = sub.clone();
        Subscription::new(move || {
            if let Some(s) = sub_cleanup.borrow_mut().take() {
                s.unsubscribe();
            }
        })
    })
}

/// Delays every emission by `duration`, preserving order. Requires a
/// `tokio` `LocalSet` context, same as [`super::sources::from_future`].
pub fn delay<T: 'static>(source: Source<T>, duration: Duration) -> Source<T> {
    Source::new(move |sink| {
        let cancelled = Rc::new(Cell::new(false));
        let pending: Rc<RefCell<Vec<tokio::task::JoinHandle<()>>>> = Rc::new(RefCell::new(Vec::new()));

        let inner = source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                let cancelled = cancelled.clone();
                let pending = pending.clone();
                move |v| {
                    let sink = sink.clone();
                    let cancelled = cancelled.clone();
                    let handle = tokio::task::spawn_local(async move {
                        tokio::time::sleep(duration).await;
                        if !cancelled.get() {
                            sink.next(v);
                        }
                    });
                    pending.borrow_mut().push(handle);
                }
            },
            {
                let sink = sink.clone();
                move |e| sink.error(e)
            },
            {
                let sink = sink.clone();
                move || sink.complete()
            },
        ));

        Subscription::new(move || {
            cancelled.set(true);
            inner.unsubscribe();
            for h in pending.borrow_mut().drain(..) {
                h.abort();
            }
        })
    })
}

/// Multicasts one upstream subscription to every downstream sink;
/// reference-counts subscribers and tears upstream down when the count
/// reaches zero.
pub fn share<T: Clone + 'static>(source: Source<T>) -> Source<T> {
    let sinks: Rc<RefCell<IndexMap<u64, Sink<T>>>> = Rc::new(RefCell::new(IndexMap::new()));
    let next_id = Rc::new(Cell::new(0u64));
    let upstream: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

    Source::new(move |sink| {
        let id = next_id.get();
        next_id.set(id + 1);
        sinks.borrow_mut().insert(id, sink);

        if upstream.borrow().is_none() {
            let sinks_for_upstream = sinks.clone();
            let sub = source.subscribe_raw(Sink::new(
                {
                    let sinks_for_upstream = sinks_for_upstream.clone();
                    move |v: T| {
                        let targets: Vec<Sink<T>> =
                            sinks_for_upstream.borrow().values().cloned().collect();
                        for target in targets {
                            target.next(v.clone());
                        }
                    }
                },
                {
                    let sinks_for_upstream = sinks_for_upstream.clone();
                    move |e| {
                        let targets: Vec<Sink<T>> =
                            sinks_for_upstream.borrow().values().cloned().collect();
                        for target in targets {
                            target.error(e.shallow_clone());
                        }
                    }
                },
                {
                    let sinks_for_upstream = sinks_for_upstream.clone();
                    move || {
                        let targets: Vec<Sink<T>> =
                            sinks_for_upstream.borrow().values().cloned().collect();
                        for target in targets {
                            target.complete();
                        }
                    }
                },
            ));
            *upstream.borrow_mut() = Some(sub);
        }

        let sinks_for_teardown = sinks.clone();
        let upstream_for_teardown = upstream.clone();
        Subscription::new(move || {
            sinks_for_teardown.borrow_mut().shift_remove(&id);
            if sinks_for_teardown.borrow().is_empty() {
                if let Some(sub) = upstream_for_teardown.borrow_mut().take() {
                    sub.unsubscribe();
                }
            }
        })
    })
}

/// Intercepts an error from `source`, converting it into an ordinary value
/// via `handler` instead of letting it terminate the stream. Used at
/// exchange boundaries where a single operation's failure must not tear
/// down a pipeline shared with other, unrelated operations.
pub fn catch_error<T: 'static>(source: Source<T>, handler: impl Fn(crate::error::ExchangeError) -> T + 'static) -> Source<T> {
    let handler = Rc::new(handler);
    Source::new(move |sink| {
        let handler = handler.clone();
        source.subscribe_raw(Sink::new(
            {
                let sink = sink.clone();
                move |v| sink.next(v)
            },
            {
                let sink = sink.clone();
                move |e| {
                    sink.next(handler(e));
                    sink.complete();
                }
            },
            {
                let sink = sink.clone();
                move || sink.complete()
            },
        ))
    })
}

pub trait SourceExt<T: 'static>: Sized {
    fn map<U: 'static>(self, f: impl Fn(T) -> U + 'static) -> Source<U>;
    fn filter(self, pred: impl Fn(&T) -> bool + 'static) -> Source<T>;
    fn tap(self, f: impl Fn(&T) + 'static) -> Source<T>
    where
        T: Clone;
    fn merge_map<U: 'static>(self, f: impl Fn(T) -> Source<U> + 'static) -> Source<U>;
    fn switch_map<U: 'static>(self, f: impl Fn(T) -> Source<U> + 'static) -> Source<U>;
    fn take_until<N: 'static>(self, notifier: Source<N>) -> Source<T>;
    fn take(self, n: usize) -> Source<T>;
    fn delay(self, duration: Duration) -> Source<T>;
    fn share(self) -> Source<T>
    where
        T: Clone;
    fn catch_error(self, handler: impl Fn(crate::error::ExchangeError) -> T + 'static) -> Source<T>;
}

impl<T: 'static> SourceExt<T> for Source<T> {
    fn map<U: 'static>(self, f: impl Fn(T) -> U + 'static) -> Source<U> {
        map(self, f)
    }
    fn filter(self, pred: impl Fn(&T) -> bool + 'static) -> Source<T> {
        filter(self, pred)
    }
    fn tap(self, f: impl Fn(&T) + 'static) -> Source<T>
    where
        T: Clone,
    {
        tap(self, f)
    }
    fn merge_map<U: 'static>(self, f: impl Fn(T) -> Source<U> + 'static) -> Source<U> {
        merge_map(self, f)
    }
    fn switch_map<U: 'static>(self, f: impl Fn(T) -> Source<U> + 'static) -> Source<U> {
        switch_map(self, f)
    }
    fn take_until<N: 'static>(self, notifier: Source<N>) -> Source<T> {
        take_until(self, notifier)
    }
    fn take(self, n: usize) -> Source<T> {
        take(self, n)
    }
    fn delay(self, duration: Duration) -> Source<T> {
        delay(self, duration)
    }
    fn share(self) -> Source<T>
    where
        T: Clone,
    {
        share(self)
    }
    fn catch_error(self, handler: impl Fn(crate::error::ExchangeError) -> T + 'static) -> Source<T> {
        catch_error(self, handler)
    }
}
