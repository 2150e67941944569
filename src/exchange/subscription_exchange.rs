//! Wraps a caller-supplied subscription client and turns each subscription
//! operation into a long-lived [`Source`]. Everything else passes through
//! unchanged.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Map;
use serde_json::Value;

use crate::artifact::OperationKind;
use crate::error::ExchangeError;
use crate::operation::Operation;
use crate::operation::OperationKey;
use crate::operation::OperationResult;
use crate::stream;
use crate::stream::Source;

use super::Exchange;
use super::Forward;

/// The long-lived transport a subscription operation is handed off to.
/// `subscribe` must not be called until the returned source is actually
/// subscribed — the exchange additionally defers the call by one
/// microtask so a subscribe-then-immediately-teardown never reaches the
/// client at all.
pub trait SubscriptionTransport {
    fn subscribe(
        &self,
        query: &str,
        variables: &Map<String, Value>,
        on_next: Rc<dyn Fn(Value)>,
        on_error: Rc<dyn Fn(ExchangeError)>,
        on_complete: Rc<dyn Fn()>,
    ) -> Box<dyn FnMut()>;
}

pub struct SubscriptionExchange {
    transport: Rc<dyn SubscriptionTransport>,
}

impl SubscriptionExchange {
    pub fn new(transport: Rc<dyn SubscriptionTransport>) -> Self {
        SubscriptionExchange { transport }
    }
}

fn is_subscription(op: &Operation) -> bool {
    matches!(op, Operation::Request { artifact, .. } if artifact.kind == OperationKind::Subscription)
}

impl Exchange for SubscriptionExchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult> {
        let transport = self.transport.clone();

        let passthrough = stream::filter(operations.clone(), |op| match op {
            Operation::Request { artifact, .. } => artifact.kind != OperationKind::Subscription,
            Operation::Teardown { .. } => true,
        });
        let passthrough_results = forward(passthrough);

        let subscription_ops = stream::filter(operations, |op| is_subscription(op) || op.is_teardown());

        let unsubscribers: Rc<RefCell<HashMap<OperationKey, Box<dyn FnMut()>>>> =
            Rc::new(RefCell::new(HashMap::new()));

        let subscription_results = stream::merge_map(subscription_ops, move |op| {
            if let Operation::Teardown { key, .. } = &op {
                if let Some(mut unsubscribe) = unsubscribers.borrow_mut().remove(key) {
                    unsubscribe();
                }
                return stream::empty();
            }

            let Operation::Request {
                key,
                artifact,
                variables,
                ..
            } = op.clone()
            else {
                return stream::empty();
            };
            let operation = op.clone();
            let transport = transport.clone();
            let unsubscribers = unsubscribers.clone();

            stream::make(move |observer: stream::MakeObserver<OperationResult>| {
                let cancelled = Rc::new(Cell::new(false));
                let cancelled_for_task = cancelled.clone();
                let transport = transport.clone();
                let operation = operation.clone();
                let artifact = artifact.clone();
                let variables = variables.clone();
                let unsubscribers_for_task = unsubscribers.clone();
                tokio::task::spawn_local(async move {
                    // Yield once so a teardown issued in the same tick as
                    // the subscribe call lands before the client ever
                    // starts, matching a microtask-deferred subscribe.
                    tokio::task::yield_now().await;
                    if cancelled_for_task.get() {
                        return;
                    }

                    let on_next = {
                        let observer = observer.clone();
                        let operation = operation.clone();
                        Rc::new(move |data: Value| {
                            observer.next(OperationResult::new(operation.clone()).with_data(data));
                        })
                    };
                    let on_error = {
                        let observer = observer.clone();
                        Rc::new(move |err: ExchangeError| observer.error(err))
                    };
                    let on_complete = {
                        let observer = observer.clone();
                        Rc::new(move || observer.complete())
                    };

                    tracing::debug!(key, operation = %artifact.name, "subscription started");
                    let mut unsubscribe =
                        transport.subscribe(&artifact.body, &variables.0, on_next, on_error, on_complete);
                    if cancelled_for_task.get() {
                        unsubscribe();
                    } else {
                        unsubscribers_for_task.borrow_mut().insert(key, unsubscribe);
                    }
                });

                let unsubscribers_for_cleanup = unsubscribers.clone();
                Box::new(move || {
                    cancelled.set(true);
                    if let Some(mut unsubscribe) = unsubscribers_for_cleanup.borrow_mut().remove(&key) {
                        unsubscribe();
                    }
                })
            })
        });

        stream::merge(vec![passthrough_results, subscription_results])
    }
}
