//! The schema descriptor supplied at client construction, and the scalar
//! codec registry — parsing/serializing scalars is a caller-supplied
//! contract, not something this crate implements itself.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;

use crate::error::ExchangeError;

/// `{ keyFields: string[] }` for one entity typename.
#[derive(Clone, Debug)]
pub struct EntityDescriptor {
    pub key_fields: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct InputFieldDescriptor {
    pub name: String,
    pub type_name: String,
    pub array: bool,
    pub nullable: bool,
}

/// `{ fields: [{name, type, array?, nullable?}] }` for one input typename,
/// used by the scalar exchange to recurse through variable values.
#[derive(Clone, Debug)]
pub struct InputDescriptor {
    pub fields: Vec<InputFieldDescriptor>,
}

/// `parse(unknown) -> T`, `serialize(T) -> unknown`, specified generically
/// over `serde_json::Value` since the core never needs the codec's native
/// Rust type — only the wire/cache representation on either side of it.
pub trait ScalarCodec {
    fn parse(&self, value: Value) -> Result<Value, ExchangeError>;
    fn serialize(&self, value: Value) -> Result<Value, ExchangeError>;
}

#[derive(Clone, Default)]
pub struct ScalarRegistry(BTreeMap<String, Rc<dyn ScalarCodec>>);

impl ScalarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, codec: impl ScalarCodec + 'static) {
        self.0.insert(type_name.into(), Rc::new(codec));
    }

    pub fn get(&self, type_name: &str) -> Option<&Rc<dyn ScalarCodec>> {
        self.0.get(type_name)
    }
}

/// The full schema surface a client needs: entity key fields, input type
/// shapes for variable recursion, and the scalar codec registry.
#[derive(Clone, Default)]
pub struct SchemaDescriptor {
    pub entities: BTreeMap<String, EntityDescriptor>,
    pub inputs: BTreeMap<String, InputDescriptor>,
    pub scalars: ScalarRegistry,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, typename: impl Into<String>, key_fields: Vec<String>) -> Self {
        self.entities
            .insert(typename.into(), EntityDescriptor { key_fields });
        self
    }

    pub fn with_input(mut self, typename: impl Into<String>, input: InputDescriptor) -> Self {
        self.inputs.insert(typename.into(), input);
        self
    }

    pub fn entity(&self, typename: &str) -> Option<&EntityDescriptor> {
        self.entities.get(typename)
    }
}
