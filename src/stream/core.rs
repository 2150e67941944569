//! Pull-based source/sink primitives.
//!
//! `Source<T>` is lazy: nothing runs until `subscribe_raw` is called, and
//! calling it again re-executes the producer from scratch unless the
//! source was built with [`crate::stream::share`]. Everything here is
//! single-threaded: sinks are built on `Rc<RefCell<_>>`, matching the
//! cooperative single-event-loop scheduling model this crate runs on — no
//! operator may assume `Send`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ExchangeError;

type NextFn<T> = Box<dyn FnMut(T)>;
type ErrorFn = Box<dyn FnMut(ExchangeError)>;
type CompleteFn = Box<dyn FnMut()>;

/// An observer passed to a source's producer closure.
pub struct Sink<T> {
    next: Rc<RefCell<NextFn<T>>>,
    error: Rc<RefCell<ErrorFn>>,
    complete: Rc<RefCell<CompleteFn>>,
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Sink {
            next: self.next.clone(),
            error: self.error.clone(),
            complete: self.complete.clone(),
        }
    }
}

impl<T: 'static> Sink<T> {
    pub fn new(
        next: impl FnMut(T) + 'static,
        error: impl FnMut(ExchangeError) + 'static,
        complete: impl FnMut() + 'static,
    ) -> Self {
        Sink {
            next: Rc::new(RefCell::new(Box::new(next))),
            error: Rc::new(RefCell::new(Box::new(error))),
            complete: Rc::new(RefCell::new(Box::new(complete))),
        }
    }

    pub fn next(&self, value: T) {
        (self.next.borrow_mut())(value);
    }

    pub fn error(&self, err: ExchangeError) {
        (self.error.borrow_mut())(err);
    }

    pub fn complete(&self) {
        (self.complete.borrow_mut())();
    }
}

/// A handle to release every resource held by a single `subscribe` call.
/// Calling `unsubscribe` more than once is a no-op: the underlying closure
/// is taken out on first use.
#[derive(Clone)]
pub struct Subscription(Rc<RefCell<Option<Box<dyn FnMut()>>>>);

impl Subscription {
    pub fn new(teardown: impl FnMut() + 'static) -> Self {
        Subscription(Rc::new(RefCell::new(Some(Box::new(teardown)))))
    }

    pub fn empty() -> Self {
        Subscription(Rc::new(RefCell::new(None)))
    }

    pub fn unsubscribe(&self) {
        if let Some(mut teardown) = self.0.borrow_mut().take() {
            teardown();
        }
    }
}

/// `Source<T> = (sink) -> Subscription`, wrapped so it can be cloned and
/// invoked more than once (each invocation is an independent execution).
pub struct Source<T>(Rc<dyn Fn(Sink<T>) -> Subscription>);

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Source(self.0.clone())
    }
}

impl<T: 'static> Source<T> {
    pub fn new(producer: impl Fn(Sink<T>) -> Subscription + 'static) -> Self {
        Source(Rc::new(producer))
    }

    pub fn subscribe_raw(&self, sink: Sink<T>) -> Subscription {
        (self.0)(sink)
    }
}
