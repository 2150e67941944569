//! Resolves fragment reads and writes directly against the cache, never
//! reaching the network. A fragment operation carries its target — a
//! single entity, a list of entities, or a literal record — encoded as
//! `metadata.extra["fragmentRef"]`; everything else passes straight
//! through to the rest of the chain.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::Value;

use crate::artifact::Artifact;
use crate::artifact::OperationKind;
use crate::cache::Cache;
use crate::cache::FragmentRef;
use crate::cache::ListenerId;
use crate::cache::StorageKey;
use crate::operation::Operation;
use crate::operation::OperationKey;
use crate::operation::OperationMetadata;
use crate::operation::OperationResult;
use crate::operation::Variables;
use crate::stream;
use crate::stream::SinkObserver;
use crate::stream::Source;

use super::Exchange;
use super::Forward;

pub struct FragmentExchange {
    cache: Rc<Cache>,
}

impl FragmentExchange {
    pub fn new(cache: Rc<Cache>) -> Self {
        FragmentExchange { cache }
    }
}

fn decode_fragment_ref(value: &Value) -> Option<FragmentRef> {
    let obj = value.as_object()?;
    match obj.get("kind").and_then(Value::as_str)? {
        "entity" => {
            let raw = obj.get("storageKey")?.as_str()?;
            Some(FragmentRef::Entity(StorageKey::from_raw(raw.to_string())))
        }
        "list" => {
            let raws = obj.get("storageKeys")?.as_array()?;
            let list = raws
                .iter()
                .map(|v| v.as_str().map(|s| StorageKey::from_raw(s.to_string())))
                .collect();
            Some(FragmentRef::List(list))
        }
        "literal" => Some(FragmentRef::Literal(obj.get("value").cloned().unwrap_or(Value::Null))),
        _ => None,
    }
}

impl Exchange for FragmentExchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult> {
        let cache = self.cache.clone();
        let listeners: Rc<RefCell<HashMap<OperationKey, ListenerId>>> = Rc::new(RefCell::new(HashMap::new()));
        let fragment_keys: Rc<RefCell<HashSet<OperationKey>>> = Rc::new(RefCell::new(HashSet::new()));

        let passthrough_subject = stream::make_subject::<Operation>();
        let passthrough_results = stream::share(forward(passthrough_subject.source()));

        stream::merge_map(operations, move |op| {
            let is_fragment_request = matches!(&op,
                Operation::Request { artifact, .. } if artifact.kind == OperationKind::Fragment);

            if is_fragment_request {
                let Operation::Request {
                    key,
                    artifact,
                    variables,
                    metadata,
                } = op
                else {
                    unreachable!()
                };
                fragment_keys.borrow_mut().insert(key);
                return fragment_live_source(cache.clone(), listeners.clone(), key, artifact, variables, metadata);
            }

            if let Operation::Teardown { key, .. } = &op {
                if fragment_keys.borrow_mut().remove(key) {
                    if let Some(id) = listeners.borrow_mut().remove(key) {
                        cache.unsubscribe(id);
                    }
                    return stream::empty();
                }
            }

            let key = op.key();
            let passthrough_results = passthrough_results.clone();
            let passthrough_subject = passthrough_subject.clone();
            stream::make(move |observer: stream::MakeObserver<OperationResult>| {
                let sub = stream::subscribe(
                    &passthrough_results,
                    SinkObserver::new(
                        {
                            let observer = observer.clone();
                            move |r: OperationResult| {
                                if r.operation.key() == key {
                                    observer.next(r);
                                }
                            }
                        },
                        {
                            let observer = observer.clone();
                            move |e| observer.error(e)
                        },
                        || {},
                    ),
                );
                passthrough_subject.next(op.clone());
                Box::new(move || sub.unsubscribe())
            })
        })
    }
}

fn fragment_live_source(
    cache: Rc<Cache>,
    listeners: Rc<RefCell<HashMap<OperationKey, ListenerId>>>,
    key: OperationKey,
    artifact: Rc<Artifact>,
    variables: Variables,
    metadata: OperationMetadata,
) -> Source<OperationResult> {
    let Some(fragment_ref) = metadata
        .extra
        .get("fragmentRef")
        .and_then(decode_fragment_ref)
    else {
        return stream::empty();
    };

    stream::make(move |observer: stream::MakeObserver<OperationResult>| {
        let handler_cell: Rc<RefCell<Option<Rc<dyn Fn()>>>> = Rc::new(RefCell::new(None));
        let handler: Rc<dyn Fn()> = {
            let cache = cache.clone();
            let observer = observer.clone();
            let artifact = artifact.clone();
            let variables = variables.clone();
            let metadata = metadata.clone();
            let fragment_ref = fragment_ref.clone();
            let listeners = listeners.clone();
            let handler_cell = handler_cell.clone();
            Rc::new(move || {
                let outcome = cache.read_fragment(&fragment_ref, &artifact.selections, &variables.0);
                tracing::trace!(key, stale = outcome.stale, "fragment read");

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
                observer.next(result);
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
