//! Runtime core for a GraphQL client: pull-based streams, a composable
//! exchange pipeline, and a normalized document cache with
//! subscription-based invalidation.
//!
//! This crate deliberately stops short of parsing GraphQL documents or
//! generating artifacts from them — callers hand in already-compiled
//! [`artifact::Artifact`] values, the same contract a build-time codegen
//! step would produce.

pub mod artifact;
pub mod cache;
pub mod client;
pub mod error;
pub mod exchange;
pub mod operation;
pub mod schema;
pub mod stream;
mod util;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use client::Client;
pub use client::ClientOptions;
pub use error::AggregatedError;
pub use error::ClientError;
pub use error::ExchangeError;
pub use error::GraphqlError;
pub use operation::Operation;
pub use operation::OperationResult;
pub use operation::RequestPolicy;
pub use operation::Variables;
