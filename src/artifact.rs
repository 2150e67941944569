//! Compiled operation artifacts. Document parsing and artifact compilation
//! are out of scope for this crate; callers hand in already-compiled
//! `Artifact` values.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
    Fragment,
}

/// A compiled operation descriptor. Immutable, content-addressed by
/// `name`: two artifacts with the same name are assumed to describe the
/// same operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: OperationKind,
    pub name: String,
    pub body: String,
    pub selections: Vec<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_defs: Option<Vec<VariableDefinition>>,
}

impl Artifact {
    pub fn content_key(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub array: bool,
}

/// An ordered selection-tree node: a field, a named fragment spread, or an
/// inline fragment.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Selection {
    Field(Field),
    FragmentSpread(FragmentSpread),
    InlineFragment(InlineFragment),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub array: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selections: Option<Vec<Selection>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directives: Option<Vec<Directive>>,
}

impl Field {
    /// The key a response (and the cache) stores this field's value under
    /// before any argument-based disambiguation.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn required_action(&self) -> Option<RequiredAction> {
        self.directives
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find_map(Directive::required_action)
    }
}

/// A spread of a named fragment. Since document parsing is out of scope,
/// the spread already carries the fragment's resolved selection set (the
/// artifact compiler inlines fragment definitions at compile time).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FragmentSpread {
    pub fragment_name: String,
    pub type_condition: Option<String>,
    pub selections: Vec<Selection>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InlineFragment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_condition: Option<String>,
    pub selections: Vec<Selection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directives: Option<Vec<Directive>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Directive {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequiredAction {
    Throw,
    Cascade,
}

impl Directive {
    pub fn required_action(&self) -> Option<RequiredAction> {
        if self.name != "required" {
            return None;
        }
        match self.args.get("action").and_then(Value::as_str) {
            Some("CASCADE") => Some(RequiredAction::Cascade),
            _ => Some(RequiredAction::Throw),
        }
    }
}
