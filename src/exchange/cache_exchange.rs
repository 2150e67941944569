//! Resolves requests against the normalized cache according to their
//! request policy, forwarding to the network only when the policy and the
//! current cache state require it, and keeps every live operation
//! subscribed so a later write (from a mutation, a subscription event, or
//! another query) re-emits a fresh read.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Map;
use serde_json::Value;

use crate::artifact::Artifact;
use crate::artifact::Selection;
use crate::cache::Cache;
use crate::cache::ListenerId;
use crate::operation::Operation;
use crate::operation::OperationKey;
use crate::operation::OperationMetadata;
use crate::operation::OperationResult;
use crate::operation::RequestPolicy;
use crate::operation::Variables;
use crate::stream;
use crate::stream::Source;
use crate::stream::Subject;

use super::Exchange;
use super::Forward;

pub struct CacheExchange {
    cache: Rc<Cache>,
}

impl CacheExchange {
    pub fn new(cache: Rc<Cache>) -> Self {
        CacheExchange { cache }
    }
}

fn effective_policy(metadata: &OperationMetadata) -> RequestPolicy {
    metadata.policy.unwrap_or_default()
}

impl Exchange for CacheExchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult> {
        let cache = self.cache.clone();
        let listeners: Rc<RefCell<HashMap<OperationKey, ListenerId>>> = Rc::new(RefCell::new(HashMap::new()));
        let network_subject: Subject<Operation> = stream::make_subject();

        let eager_ops = stream::filter(operations.clone(), |op| match op {
            Operation::Teardown { .. } => true,
            Operation::Request { metadata, .. } => {
                matches!(
                    effective_policy(metadata),
                    RequestPolicy::NetworkOnly | RequestPolicy::CacheAndNetwork
                )
            }
        });
        let fed_ops = stream::merge(vec![eager_ops, network_subject.source()]);
        let network_results = stream::share(forward(fed_ops));

        stream::merge_map(operations, move |op| match op {
            Operation::Teardown { key, .. } => {
                if let Some(id) = listeners.borrow_mut().remove(&key) {
                    cache.unsubscribe(id);
                }
                stream::empty()
            }
            Operation::Request {
                key,
                artifact,
                variables,
                metadata,
            } => handle_request(
                cache.clone(),
                listeners.clone(),
                network_subject.clone(),
                network_results.clone(),
                key,
                artifact,
                variables,
                metadata,
            ),
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_request(
    cache: Rc<Cache>,
    listeners: Rc<RefCell<HashMap<OperationKey, ListenerId>>>,
    network_subject: Subject<Operation>,
    network_results: Source<OperationResult>,
    key: OperationKey,
    artifact: Rc<Artifact>,
    variables: Variables,
    metadata: OperationMetadata,
) -> Source<OperationResult> {
    let policy = effective_policy(&metadata);
    let network_for_op = stream::filter(network_results, move |r| r.operation.key() == key);

    if policy == RequestPolicy::NetworkOnly {
        let cache_for_write = cache.clone();
        let selections = artifact.selections.clone();
        let vars = variables.0.clone();
        return stream::tap(network_for_op, move |result| {
            write_through(&cache_for_write, &selections, &vars, result);
        });
    }

    let live = live_cache_source(
        cache.clone(),
        listeners,
        network_subject,
        key,
        artifact.clone(),
        variables.clone(),
        metadata,
        policy,
    );

    if policy == RequestPolicy::CacheOnly {
        return live;
    }

    let selections = artifact.selections.clone();
    let vars = variables.0.clone();
    let network_errors = stream::filter(
        stream::tap(network_for_op, move |result| {
            write_through(&cache, &selections, &vars, result);
        }),
        |result| result.has_errors(),
    );

    // `network_errors` must subscribe before `live`: `live`'s first
    // synchronous read can dispatch a network fetch by pushing onto
    // `network_subject`, and that push only reaches anyone if the shared
    // `network_results` pipeline already has a subscriber pulling it
    // through `network_subject`'s own source. Subscribing `live` first
    // would let that initial dispatch race ahead of the subscription that
    // wires it up, and `Subject::next` buffers nothing — the push would
    // simply vanish.
    stream::merge(vec![network_errors, live])
}

fn write_through(cache: &Cache, selections: &[Selection], variables: &Map<String, Value>, result: &OperationResult) {
    if result.has_errors() {
        return;
    }
    if let Some(data) = &result.data {
        cache.write_query(selections, data, variables);
    }
}

#[allow(clippy::too_many_arguments)]
fn live_cache_source(
    cache: Rc<Cache>,
    listeners: Rc<RefCell<HashMap<OperationKey, ListenerId>>>,
    network_subject: Subject<Operation>,
    key: OperationKey,
    artifact: Rc<Artifact>,
    variables: Variables,
    metadata: OperationMetadata,
    policy: RequestPolicy,
) -> Source<OperationResult> {
    stream::make(move |observer: stream::MakeObserver<OperationResult>| {
        let network_in_flight = Rc::new(Cell::new(false));
        // Deferred self-reference: the cache listener callback looks the
        // current handler up through this cell rather than closing over
        // itself directly.
        let handler_cell: Rc<RefCell<Option<Rc<dyn Fn()>>>> = Rc::new(RefCell::new(None));

        let handler: Rc<dyn Fn()> = {
            let cache = cache.clone();
            let observer = observer.clone();
            let artifact = artifact.clone();
            let variables = variables.clone();
            let metadata = metadata.clone();
            let listeners = listeners.clone();
            let network_subject = network_subject.clone();
            let network_in_flight = network_in_flight.clone();
            let handler_cell = handler_cell.clone();
            Rc::new(move || {
                let outcome = cache.read_query(&artifact.selections, &variables.0);

                if let Some(old) = listeners.borrow_mut().remove(&key) {
                    cache.unsubscribe(old);
                }
                let handler_cell_for_cb = handler_cell.clone();
                let callback: Rc<dyn Fn()> = Rc::new(move || {
                    let handler = handler_cell_for_cb.borrow().clone();
                    if let Some(handler) = handler {
                        handler();
                    }
                });
                let listener_id = cache.subscribe(&outcome.touched, callback);
                listeners.borrow_mut().insert(key, listener_id);

                let is_hit = outcome.data.is_some() && !outcome.stale;
                tracing::trace!(key, is_hit, stale = outcome.stale, "cache read");
                if policy == RequestPolicy::CacheFirst {
                    if !is_hit && !network_in_flight.get() {
                        network_in_flight.set(true);
                        network_subject.next(Operation::Request {
                            key,
                            artifact: artifact.clone(),
                            variables: variables.clone(),
                            metadata: metadata.clone(),
                        });
                    } else if is_hit {
                        network_in_flight.set(false);
                    }
                }

                let has_data = outcome.data.is_some();
                let operation = Operation::Request {
                    key,
                    artifact: artifact.clone(),
                    variables: variables.clone(),
                    metadata: metadata.clone(),
                };
                let mut result = OperationResult::new(operation);
                if let Some(data) = outcome.data {
                    result = result.with_data(data);
                }
                result.metadata.cache_stale = Some(outcome.stale);
                // A cold miss under a policy that just dispatched a network
                // fetch has nothing worth handing the caller yet — emitting
                // it here would resolve a `take(1)` collector with `null`
                // before the real network result ever arrives. `CacheOnly`
                // has no such fetch coming, so its miss is the final answer.
                if has_data || policy == RequestPolicy::CacheOnly {
                    observer.next(result);
                }
            })
        };
        *handler_cell.borrow_mut() = Some(handler.clone());
        handler();

        let listeners_for_cleanup = listeners.clone();
        let cache_for_cleanup = cache.clone();
        Box::new(move || {
            if let Some(id) = listeners_for_cleanup.borrow_mut().remove(&key) {
                cache_for_cleanup.unsubscribe(id);
            }
        })
    })
}
