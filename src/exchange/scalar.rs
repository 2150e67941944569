//! Runs registered [`ScalarCodec`]s over the wire boundary: outgoing
//! variables are serialized to their wire representation before reaching
//! the network, incoming response leaves are parsed into their canonical
//! form before reaching the cache or the caller.

use std::rc::Rc;

use serde_json::Map;
use serde_json::Value;

use crate::artifact::Field;
use crate::artifact::Selection;
use crate::operation::Operation;
use crate::operation::OperationResult;
use crate::schema::SchemaDescriptor;
use crate::stream;
use crate::stream::Source;

use super::Exchange;
use super::Forward;

pub struct ScalarExchange {
    schema: Rc<SchemaDescriptor>,
}

impl ScalarExchange {
    pub fn new(schema: Rc<SchemaDescriptor>) -> Self {
        ScalarExchange { schema }
    }
}

impl Exchange for ScalarExchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult> {
        let schema_req = self.schema.clone();
        let mapped_ops = stream::map(operations, move |op| serialize_variables(&schema_req, op));
        let results = forward(mapped_ops);
        let schema_res = self.schema.clone();
        stream::map(results, move |result| parse_result_scalars(&schema_res, result))
    }
}

fn serialize_variables(schema: &SchemaDescriptor, op: Operation) -> Operation {
    let Operation::Request {
        key,
        artifact,
        mut variables,
        metadata,
    } = op
    else {
        return op;
    };
    if let Some(defs) = &artifact.variable_defs {
        for def in defs {
            let Some(codec) = schema.scalars.get(&def.type_name) else {
                continue;
            };
            if let Some(value) = variables.0.get(&def.name).cloned() {
                match codec.serialize(value) {
                    Ok(serialized) => {
                        variables.0.insert(def.name.clone(), serialized);
                    }
                    Err(err) => {
                        tracing::warn!(variable = %def.name, error = %err, "scalar serialize failed");
                    }
                }
            }
        }
    }
    Operation::Request {
        key,
        artifact,
        variables,
        metadata,
    }
}

fn parse_result_scalars(schema: &SchemaDescriptor, mut result: OperationResult) -> OperationResult {
    if let Operation::Request { artifact, .. } = &result.operation {
        if let Some(Value::Object(obj)) = &mut result.data {
            transform_object(obj, &artifact.selections, schema);
        }
    }
    result
}

fn transform_object(obj: &mut Map<String, Value>, selections: &[Selection], schema: &SchemaDescriptor) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                if let Some(value) = obj.get_mut(field.response_key()) {
                    apply_field(value, field, schema);
                }
            }
            Selection::FragmentSpread(spread) => transform_object(obj, &spread.selections, schema),
            Selection::InlineFragment(inline) => transform_object(obj, &inline.selections, schema),
        }
    }
}

fn apply_field(value: &mut Value, field: &Field, schema: &SchemaDescriptor) {
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                apply_field(item, field, schema);
            }
        }
        Value::Object(obj) => {
            if let Some(selections) = &field.selections {
                transform_object(obj, selections, schema);
            }
        }
        _ => {
            if let Some(codec) = schema.scalars.get(&field.type_name) {
                let owned = std::mem::replace(value, Value::Null);
                *value = codec.parse(owned).unwrap_or_else(|err| {
                    tracing::warn!(field = %field.name, error = %err, "scalar parse failed");
                    Value::Null
                });
            }
        }
    }
}
