//! Test-only helpers: a scripted [`MockTransport`] standing in for the
//! network, and small builder functions for assembling [`Artifact`]s and
//! selection trees inline instead of hand-writing them per test.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::artifact::Artifact;
use crate::artifact::Directive;
use crate::artifact::Field;
use crate::artifact::OperationKind;
use crate::artifact::RequiredAction;
use crate::artifact::Selection;
use crate::error::ExchangeError;
use crate::exchange::HttpTransport;

type TransportFuture = Pin<Box<dyn Future<Output = Result<Value, ExchangeError>>>>;

/// One scripted outcome for a [`MockTransport`] call.
pub enum MockResponse {
    /// A successful response body, as the full `{ data, errors?, extensions? }` envelope.
    Ok(Value),
    /// A non-2xx response, carrying the status code the HTTP exchange
    /// surfaces as `extensions.statusCode` — the signal `RetryExchange`
    /// keys its retryable check off.
    Status(u16),
    /// A transport-level failure with no status code (connection refused,
    /// malformed body, …) — never retried.
    TransportFailure(String),
}

impl MockResponse {
    pub fn data(value: Value) -> Self {
        MockResponse::Ok(json!({ "data": value }))
    }

    pub fn errors(errors: Vec<Value>) -> Self {
        MockResponse::Ok(json!({ "errors": errors }))
    }
}

/// A [`HttpTransport`] fed by a queue of canned responses consumed in
/// order, one per call. Calling past the end of the queue is a test bug,
/// not a runtime condition, so it panics rather than returning an error.
#[derive(Default)]
pub struct MockTransport {
    responses: RefCell<VecDeque<MockResponse>>,
    calls: Cell<usize>,
    bodies: RefCell<Vec<Value>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: MockResponse) -> &Self {
        self.responses.borrow_mut().push_back(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.get()
    }

    /// The request bodies this transport has been called with, in order —
    /// lets a test assert on the exact query/variables sent over the wire.
    pub fn requests(&self) -> Vec<Value> {
        self.bodies.borrow().clone()
    }
}

impl HttpTransport for MockTransport {
    fn post(&self, body: Value) -> TransportFuture {
        self.calls.set(self.calls.get() + 1);
        self.bodies.borrow_mut().push(body);

        let response = self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| panic!("mock transport called with an empty response queue"));

        Box::pin(async move {
            match response {
                MockResponse::Ok(value) => Ok(value),
                MockResponse::Status(code) => Err(ExchangeError::new("http", format!("mock status {code}"))
                    .with_extension("statusCode", json!(code))),
                MockResponse::TransportFailure(message) => Err(ExchangeError::new("http", message)),
            }
        })
    }
}

/// A bare scalar field, defaulting to a non-null `String`.
pub fn field(name: &str) -> Field {
    Field {
        name: name.to_string(),
        alias: None,
        type_name: "String".to_string(),
        array: false,
        nullable: false,
        selections: None,
        args: None,
        directives: None,
    }
}

/// An object-typed field with a nested selection set.
pub fn object_field(name: &str, type_name: &str, selections: Vec<Selection>) -> Field {
    Field {
        selections: Some(selections),
        ..field(name).with_type(type_name)
    }
}

impl Field {
    pub fn with_type(mut self, type_name: &str) -> Self {
        self.type_name = type_name.to_string();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }

    pub fn aliased(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_args(mut self, args: Map<String, Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn required(mut self, action: RequiredAction) -> Self {
        let action_name = match action {
            RequiredAction::Throw => "THROW",
            RequiredAction::Cascade => "CASCADE",
        };
        self.directives.get_or_insert_with(Vec::new).push(Directive {
            name: "required".to_string(),
            args: Map::from_iter([("action".to_string(), json!(action_name))]),
        });
        self
    }
}

/// `__typename` is what the normalized cache keys entities off; every
/// object-typed selection set meant to resolve to an entity needs it.
pub fn typename_field() -> Selection {
    Selection::Field(field("__typename"))
}

fn artifact(kind: OperationKind, name: &str, selections: Vec<Selection>) -> Rc<Artifact> {
    Rc::new(Artifact {
        kind,
        name: name.to_string(),
        body: name.to_string(),
        selections,
        variable_defs: None,
    })
}

pub fn query_artifact(name: &str, selections: Vec<Selection>) -> Rc<Artifact> {
    artifact(OperationKind::Query, name, selections)
}

pub fn mutation_artifact(name: &str, selections: Vec<Selection>) -> Rc<Artifact> {
    artifact(OperationKind::Mutation, name, selections)
}

pub fn subscription_artifact(name: &str, selections: Vec<Selection>) -> Rc<Artifact> {
    artifact(OperationKind::Subscription, name, selections)
}

pub fn fragment_artifact(name: &str, selections: Vec<Selection>) -> Rc<Artifact> {
    artifact(OperationKind::Fragment, name, selections)
}

pub fn variables(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> crate::operation::Variables {
    crate::operation::Variables(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}
