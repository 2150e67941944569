//! Error taxonomy: [`GraphqlError`], [`ExchangeError`] and [`AggregatedError`].
//!
//! Every error that can reach a caller of this crate carries a stable,
//! machine-readable tag and an extensions map, so that it serializes to the
//! same wire shape as a GraphQL response's `errors` entry.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// A single entry from a server's `errors` array. Never thrown by this
/// crate; always surfaced through `OperationResult::errors`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ErrorLocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<BTreeMap<String, Value>>,
}

impl GraphqlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            locations: None,
            extensions: None,
        }
    }
}

impl fmt::Display for GraphqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GraphqlError {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorLocation {
    pub line: u32,
    pub column: u32,
}

/// A per-exchange failure. `exchange` is the stable tag identifying which
/// stage raised it (`"http"`, `"required"`, `"scalar"`, `"cache"`,
/// `"terminal"`, …).
#[derive(Debug, thiserror::Error)]
#[error("exchange '{exchange}' failed: {message}")]
pub struct ExchangeError {
    pub exchange: &'static str,
    pub message: String,
    pub extensions: BTreeMap<String, Value>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExchangeError {
    pub fn new(exchange: &'static str, message: impl Into<String>) -> Self {
        Self {
            exchange,
            message: message.into(),
            extensions: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Status code attached by the HTTP exchange on a non-2xx response.
    pub fn status_code(&self) -> Option<u16> {
        self.extensions
            .get("statusCode")
            .and_then(Value::as_u64)
            .map(|v| v as u16)
    }

    /// Clones everything but the source error, which isn't `Clone`. Used
    /// where a single failure must fan out to multiple independent
    /// consumers (a broadcast sink, a retry's final report).
    pub fn shallow_clone(&self) -> Self {
        ExchangeError {
            exchange: self.exchange,
            message: self.message.clone(),
            extensions: self.extensions.clone(),
            cause: None,
        }
    }
}

/// Either of the two error kinds this crate ever produces. Used as the
/// element type of [`AggregatedError`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Graphql(#[from] GraphqlError),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// Bundles one or more errors so that `Client::query`/`Client::mutation`
/// have a single throwable. Never empty once constructed via [`AggregatedError::new`].
#[derive(Debug, thiserror::Error)]
#[error("{}", format_aggregated(.0))]
pub struct AggregatedError(pub Vec<ClientError>);

fn format_aggregated(errors: &[ClientError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AggregatedError {
    pub fn new(errors: Vec<ClientError>) -> Self {
        debug_assert!(!errors.is_empty(), "AggregatedError must not be empty");
        Self(errors)
    }

    pub fn from_graphql(errors: Vec<GraphqlError>) -> Self {
        Self(errors.into_iter().map(ClientError::Graphql).collect())
    }

    pub fn single_exchange(err: ExchangeError) -> Self {
        Self(vec![ClientError::Exchange(err)])
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
