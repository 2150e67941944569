//! Sink-side helpers: `subscribe`, `collect`, `collect_all`, `peek`.

use std::cell::RefCell;
use std::rc::Rc;

use super::core::Sink;
use super::core::Source;
use super::core::Subscription;
use crate::error::ExchangeError;

/// Plain observer callbacks passed to [`subscribe`].
pub struct Observer<T> {
    pub next: Box<dyn FnMut(T)>,
    pub error: Box<dyn FnMut(ExchangeError)>,
    pub complete: Box<dyn FnMut()>,
}

impl<T> Observer<T> {
    pub fn new(
        next: impl FnMut(T) + 'static,
        error: impl FnMut(ExchangeError) + 'static,
        complete: impl FnMut() + 'static,
    ) -> Self {
        Observer {
            next: Box::new(next),
            error: Box::new(error),
            complete: Box::new(complete),
        }
    }
}

/// Subscribes `observer` to `source`, returning a `Subscription` the
/// caller tears down to unwind every per-key resource downstream.
pub fn subscribe<T: 'static>(source: &Source<T>, observer: Observer<T>) -> Subscription {
    let Observer {
        mut next,
        mut error,
        mut complete,
    } = observer;
    source.subscribe_raw(Sink::new(
        move |v| next(v),
        move |e| error(e),
        move || complete(),
    ))
}

/// Awaits completion, returning every value emitted in order. Errors
/// surface as `Err`.
pub async fn collect_all<T: 'static>(source: Source<T>) -> Result<Vec<T>, ExchangeError> {
    let values: Rc<RefCell<Vec<T>>> = Rc::new(RefCell::new(Vec::new()));
    let (tx, rx) = tokio::sync::oneshot::channel::<Result<(), ExchangeError>>();
    let tx = Rc::new(RefCell::new(Some(tx)));

    let values_for_next = values.clone();
    let tx_for_error = tx.clone();
    let tx_for_complete = tx.clone();
    let sub = source.subscribe_raw(Sink::new(
        move |v| values_for_next.borrow_mut().push(v),
        move |e| {
            if let Some(sender) = tx_for_error.borrow_mut().take() {
                let _ = sender.send(Err(e));
            }
        },
        move || {
            if let Some(sender) = tx_for_complete.borrow_mut().take() {
                let _ = sender.send(Ok(()));
            }
        },
    ));

    let result = rx.await.unwrap_or_else(|_| Ok(()));
    sub.unsubscribe();
    result.map(|()| values.borrow_mut().drain(..).collect())
}

/// Awaits completion, returning the last value emitted (or `None` if the
/// source completed without emitting).
pub async fn collect<T: Clone + 'static>(source: Source<T>) -> Result<Option<T>, ExchangeError> {
    let last: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let (tx, rx) = tokio::sync::oneshot::channel::<Result<(), ExchangeError>>();
    let tx = Rc::new(RefCell::new(Some(tx)));

    let last_for_next = last.clone();
    let tx_for_error = tx.clone();
    let tx_for_complete = tx.clone();
    let sub = source.subscribe_raw(Sink::new(
        move |v| *last_for_next.borrow_mut() = Some(v),
        move |e| {
            if let Some(sender) = tx_for_error.borrow_mut().take() {
                let _ = sender.send(Err(e));
            }
        },
        move || {
            if let Some(sender) = tx_for_complete.borrow_mut().take() {
                let _ = sender.send(Ok(()));
            }
        },
    ));

    let result = rx.await.unwrap_or_else(|_| Ok(()));
    sub.unsubscribe();
    result.map(|()| last.borrow_mut().take())
}

/// Synchronously extracts the first value a source emits on subscription.
/// Panics if the source does not emit synchronously — callers only use
/// this on sources documented to do so (cache reads, `from_value`, …).
pub fn peek<T: 'static>(source: &Source<T>) -> Option<T> {
    let value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
    let value_for_next = value.clone();
    let sub = source.subscribe_raw(Sink::new(
        move |v| *value_for_next.borrow_mut() = Some(v),
        |_e| {},
        || {},
    ));
    sub.unsubscribe();
    value.borrow_mut().take()
}

