//! Enforces `@required` directives on a response before it reaches the
//! cache or the caller. `THROW` nulls the whole response and raises a
//! `GraphqlError`. `CASCADE` nulls the object directly containing the
//! required field and raises nothing, then keeps nulling outward through
//! every enclosing non-nullable ancestor — the same bubbling a real
//! non-null violation would trigger — until it reaches one marked
//! nullable, or the root.

use serde_json::Map;
use serde_json::Value;

use crate::artifact::RequiredAction;
use crate::artifact::Selection;
use crate::error::GraphqlError;
use crate::operation::Operation;
use crate::operation::OperationResult;
use crate::stream;
use crate::stream::Source;

use super::Exchange;
use super::Forward;

pub struct RequiredExchange;

impl RequiredExchange {
    pub fn new() -> Self {
        RequiredExchange
    }
}

impl Default for RequiredExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange for RequiredExchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult> {
        stream::map(forward(operations), apply_required)
    }
}

enum Enforcement {
    Ok,
    CascadeNull,
    Throw(String),
}

fn apply_required(mut result: OperationResult) -> OperationResult {
    let Operation::Request { artifact, .. } = &result.operation else {
        return result;
    };
    let Some(Value::Object(obj)) = &mut result.data else {
        return result;
    };
    match enforce(obj, &artifact.selections) {
        Enforcement::Ok => {}
        Enforcement::CascadeNull => {
            tracing::debug!(operation = %artifact.name, "required field cascaded to null");
            result.data = Some(Value::Null);
        }
        Enforcement::Throw(message) => {
            tracing::debug!(operation = %artifact.name, %message, "required field violation");
            result.data = None;
            let mut errors = result.errors.take().unwrap_or_default();
            errors.push(GraphqlError::new(message));
            result.errors = Some(errors);
        }
    }
    result
}

fn enforce(obj: &mut Map<String, Value>, selections: &[Selection]) -> Enforcement {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let key = field.response_key().to_string();
                let is_null = matches!(obj.get(&key), None | Some(Value::Null));
                if is_null {
                    if let Some(action) = field.required_action() {
                        match action {
                            RequiredAction::Throw => {
                                return Enforcement::Throw(format!(
                                    "`{}` is required but was null",
                                    field.name
                                ));
                            }
                            RequiredAction::Cascade => return Enforcement::CascadeNull,
                        }
                    }
                    continue;
                }
                let Some(child_selections) = &field.selections else {
                    continue;
                };
                let outcome = match obj.get_mut(&key) {
                    Some(Value::Object(child)) => Some(enforce(child, child_selections)),
                    Some(Value::Array(items)) => {
                        let mut thrown = None;
                        for item in items.iter_mut() {
                            if let Value::Object(child) = item {
                                match enforce(child, child_selections) {
                                    Enforcement::Ok => {}
                                    Enforcement::CascadeNull => *item = Value::Null,
                                    Enforcement::Throw(msg) => {
                                        thrown = Some(msg);
                                        break;
                                    }
                                }
                            }
                        }
                        thrown.map(Enforcement::Throw)
                    }
                    _ => None,
                };
                match outcome {
                    None | Some(Enforcement::Ok) => {}
                    Some(Enforcement::CascadeNull) => {
                        obj.insert(key, Value::Null);
                        if !field.nullable || field.required_action().is_some() {
                            return Enforcement::CascadeNull;
                        }
                    }
                    Some(Enforcement::Throw(msg)) => return Enforcement::Throw(msg),
                }
            }
            Selection::FragmentSpread(spread) => match enforce(obj, &spread.selections) {
                Enforcement::Ok => {}
                other => return other,
            },
            Selection::InlineFragment(inline) => match enforce(obj, &inline.selections) {
                Enforcement::Ok => {}
                other => return other,
            },
        }
    }
    Enforcement::Ok
}
