//! `Operation` and `OperationResult`: the values that flow through the
//! exchange pipeline in each direction.

use std::rc::Rc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::artifact::Artifact;
use crate::error::ExchangeError;
use crate::error::GraphqlError;

pub type OperationKey = u64;

/// Cache request policy, set per-call via `ExecuteOptions`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestPolicy {
    #[default]
    CacheFirst,
    CacheAndNetwork,
    NetworkOnly,
    CacheOnly,
}

/// Caller-facing variables map. A thin newtype over `serde_json::Map` so
/// selection-tree walkers and the scalar exchange can pattern-match on it
/// without importing `serde_json` everywhere.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Variables(pub Map<String, Value>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

impl From<Map<String, Value>> for Variables {
    fn from(map: Map<String, Value>) -> Self {
        Variables(map)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryMeta {
    pub attempt: u32,
    pub delay_ms: u64,
}

/// Metadata threaded alongside an operation through the exchange chain.
/// Every field is a documented, reserved slot; exchanges must not invent
/// ad hoc keys outside `extra`.
#[derive(Clone, Debug, Default)]
pub struct OperationMetadata {
    pub policy: Option<RequestPolicy>,
    pub dedup_skip: bool,
    pub retry: Option<RetryMeta>,
    pub extra: Map<String, Value>,
}

impl OperationMetadata {
    pub fn with_policy(policy: RequestPolicy) -> Self {
        OperationMetadata {
            policy: Some(policy),
            ..Default::default()
        }
    }
}

/// Either a `request` or a `teardown`, sharing a subscription-lifecycle
/// `key` unique within the client that issued it.
#[derive(Clone, Debug)]
pub enum Operation {
    Request {
        key: OperationKey,
        artifact: Rc<Artifact>,
        variables: Variables,
        metadata: OperationMetadata,
    },
    Teardown {
        key: OperationKey,
        metadata: OperationMetadata,
    },
}

impl Operation {
    pub fn key(&self) -> OperationKey {
        match self {
            Operation::Request { key, .. } => *key,
            Operation::Teardown { key, .. } => *key,
        }
    }

    pub fn is_teardown(&self) -> bool {
        matches!(self, Operation::Teardown { .. })
    }

    pub fn metadata(&self) -> &OperationMetadata {
        match self {
            Operation::Request { metadata, .. } => metadata,
            Operation::Teardown { metadata, .. } => metadata,
        }
    }

    pub fn with_metadata(self, metadata: OperationMetadata) -> Self {
        match self {
            Operation::Request {
                key,
                artifact,
                variables,
                ..
            } => Operation::Request {
                key,
                artifact,
                variables,
                metadata,
            },
            Operation::Teardown { key, .. } => Operation::Teardown { key, metadata },
        }
    }

    /// Returns a copy of this request with a different operation key,
    /// used by the dedup exchange to fan one network result out to every
    /// deduplicated subscriber.
    pub fn with_key(self, key: OperationKey) -> Self {
        match self {
            Operation::Request {
                artifact,
                variables,
                metadata,
                ..
            } => Operation::Request {
                key,
                artifact,
                variables,
                metadata,
            },
            Operation::Teardown { metadata, .. } => Operation::Teardown { key, metadata },
        }
    }

    pub fn teardown_for(key: OperationKey) -> Self {
        Operation::Teardown {
            key,
            metadata: OperationMetadata::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResultMetadata {
    pub cache_stale: Option<bool>,
    pub extra: Map<String, Value>,
}

/// The result of one operation attempt: the operation it answers, and
/// whatever combination of data, errors and extensions came back.
///
/// `transport_error` is distinct from `errors`: `errors` holds
/// server-returned `GraphqlError`s from a response that was still
/// successfully received, while `transport_error` holds a failure to get a
/// response at all (a non-2xx status, a connection failure, a malformed
/// body). It travels through the exchange chain as an ordinary value
/// rather than a stream-level error so that one operation's transport
/// failure never tears down a shared pipeline other operations are still
/// using.
#[derive(Clone, Debug)]
pub struct OperationResult {
    pub operation: Operation,
    pub data: Option<Value>,
    pub errors: Option<Vec<GraphqlError>>,
    pub extensions: Option<Map<String, Value>>,
    pub metadata: ResultMetadata,
    pub transport_error: Option<Rc<ExchangeError>>,
}

impl OperationResult {
    pub fn new(operation: Operation) -> Self {
        OperationResult {
            operation,
            data: None,
            errors: None,
            extensions: None,
            metadata: ResultMetadata::default(),
            transport_error: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_errors(mut self, errors: Vec<GraphqlError>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_transport_error(mut self, err: ExchangeError) -> Self {
        self.transport_error = Some(Rc::new(err));
        self
    }

    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }
}
