//! Collapses concurrently in-flight requests for the same artifact and
//! variables into a single forwarded operation, fanning the eventual
//! result back out to every waiter under its own operation key.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::operation::Operation;
use crate::operation::OperationKey;
use crate::operation::OperationResult;
use crate::stream;
use crate::stream::Source;
use crate::util::stable_stringify;

use super::Exchange;
use super::Forward;

struct InFlight {
    canonical: OperationKey,
    waiters: Vec<OperationKey>,
}

#[derive(Default)]
pub struct DedupExchange;

impl DedupExchange {
    pub fn new() -> Self {
        DedupExchange
    }
}

fn content_key(artifact_key: &str, variables: &serde_json::Map<String, Value>) -> String {
    format!("{artifact_key}:{}", stable_stringify(&Value::Object(variables.clone())))
}

impl Exchange for DedupExchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult> {
        let in_flight: Rc<RefCell<HashMap<String, InFlight>>> = Rc::new(RefCell::new(HashMap::new()));
        let content_key_of: Rc<RefCell<HashMap<OperationKey, String>>> = Rc::new(RefCell::new(HashMap::new()));

        let in_flight_fwd = in_flight.clone();
        let content_key_fwd = content_key_of.clone();
        let forwarded = stream::filter(operations, move |op| match op {
            Operation::Request {
                key,
                artifact,
                variables,
                metadata,
                ..
            } => {
                if metadata.dedup_skip {
                    return true;
                }
                let ck = content_key(artifact.content_key(), &variables.0);
                let mut in_flight = in_flight_fwd.borrow_mut();
                content_key_fwd.borrow_mut().insert(*key, ck.clone());
                match in_flight.get_mut(&ck) {
                    Some(entry) => {
                        tracing::debug!(key, canonical = entry.canonical, "collapsed into in-flight request");
                        entry.waiters.push(*key);
                        false
                    }
                    None => {
                        in_flight.insert(
                            ck,
                            InFlight {
                                canonical: *key,
                                waiters: vec![*key],
                            },
                        );
                        true
                    }
                }
            }
            Operation::Teardown { key, .. } => {
                let Some(ck) = content_key_fwd.borrow_mut().remove(key) else {
                    return true;
                };
                let mut in_flight = in_flight_fwd.borrow_mut();
                let Some(entry) = in_flight.get_mut(&ck) else {
                    return true;
                };
                entry.waiters.retain(|k| k != key);
                if entry.canonical == *key {
                    in_flight.remove(&ck);
                    true
                } else {
                    if entry.waiters.is_empty() {
                        in_flight.remove(&ck);
                    }
                    false
                }
            }
        });

        let results = forward(forwarded);

        let in_flight_res = in_flight;
        let content_key_res = content_key_of;
        stream::merge_map(results, move |result| {
            let canonical_key = result.operation.key();
            let ck = content_key_res.borrow_mut().remove(&canonical_key);
            let waiters = ck
                .as_ref()
                .and_then(|ck| in_flight_res.borrow_mut().remove(ck))
                .map(|entry| entry.waiters)
                .unwrap_or_else(|| vec![canonical_key]);
            for key in &waiters {
                content_key_res.borrow_mut().remove(key);
            }
            let fanned: Vec<OperationResult> = waiters
                .into_iter()
                .map(|key| {
                    let mut r = result.clone();
                    r.operation = r.operation.with_key(key);
                    r
                })
                .collect();
            stream::from_array(fanned)
        })
    }
}
