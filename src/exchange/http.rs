//! POSTs queries and mutations to a single GraphQL endpoint. Subscriptions
//! and fragments pass straight through, since the subscription exchange
//! and the fragment exchange each sit at their own position in the chain
//! and handle their own operation kinds before they would ever reach here.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::Request;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use serde_json::json;

use crate::artifact::OperationKind;
use crate::error::ExchangeError;
use crate::error::GraphqlError;
use crate::operation::Operation;
use crate::operation::OperationKey;
use crate::operation::OperationResult;
use crate::stream;
use crate::stream::Source;

use super::Exchange;
use super::Forward;

type TransportFuture = Pin<Box<dyn Future<Output = Result<Value, ExchangeError>>>>;

/// The network boundary the HTTP exchange drives. Out of scope for this
/// crate beyond the contract: given a request body, resolve to the parsed
/// JSON response or an [`ExchangeError`] tagged `"http"`.
pub trait HttpTransport {
    fn post(&self, body: Value) -> TransportFuture;
}

/// A [`HttpTransport`] backed by `hyper`, POSTing to a fixed URL with a
/// fixed set of extra headers applied to every request.
pub struct HyperHttpTransport {
    url: String,
    headers: Vec<(String, String)>,
    client: HyperClient<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HyperHttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .expect("native root certificates")
            .https_or_http()
            .enable_http1()
            .build();
        HyperHttpTransport {
            url: url.into(),
            headers: Vec::new(),
            client: HyperClient::builder(TokioExecutor::new()).build(https),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl HttpTransport for HyperHttpTransport {
    fn post(&self, body: Value) -> TransportFuture {
        let url = self.url.clone();
        let headers = self.headers.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let payload = serde_json::to_vec(&body)
                .map_err(|err| ExchangeError::new("http", "failed to serialize request body").with_cause(err))?;

            let mut builder = Request::post(&url).header("content-type", "application/json");
            for (name, value) in &headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let request = builder
                .body(Full::new(Bytes::from(payload)))
                .map_err(|err| ExchangeError::new("http", "failed to build request").with_cause(err))?;

            let response = client
                .request(request)
                .await
                .map_err(|err| ExchangeError::new("http", "request failed").with_cause(err))?;
            let status = response.status();
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|err| ExchangeError::new("http", "failed to read response body").with_cause(err))?
                .to_bytes();

            if !status.is_success() {
                return Err(ExchangeError::new("http", format!("unexpected status {status}"))
                    .with_extension("statusCode", json!(status.as_u16())));
            }

            serde_json::from_slice(&body)
                .map_err(|err| ExchangeError::new("http", "failed to parse response JSON").with_cause(err))
        })
    }
}

pub struct HttpExchange {
    transport: Rc<dyn HttpTransport>,
}

impl HttpExchange {
    pub fn new(transport: Rc<dyn HttpTransport>) -> Self {
        HttpExchange { transport }
    }
}

fn is_http_kind(kind: OperationKind) -> bool {
    matches!(kind, OperationKind::Query | OperationKind::Mutation)
}

impl Exchange for HttpExchange {
    fn run(&self, operations: Source<Operation>, forward: Forward) -> Source<OperationResult> {
        let transport = self.transport.clone();
        let passthrough = stream::filter(operations.clone(), |op| match op {
            Operation::Request { artifact, .. } => !is_http_kind(artifact.kind),
            Operation::Teardown { .. } => true,
        });
        let passthrough_results = forward(passthrough);

        let http_ops = stream::filter(operations, |op| match op {
            Operation::Teardown { .. } => true,
            Operation::Request { artifact, .. } => is_http_kind(artifact.kind),
        });

        let in_flight: Rc<std::cell::RefCell<HashMap<OperationKey, tokio::task::JoinHandle<()>>>> =
            Rc::new(std::cell::RefCell::new(HashMap::new()));

        let http_results = stream::merge_map(http_ops, move |op| {
            if let Operation::Teardown { key, .. } = &op {
                if let Some(handle) = in_flight.borrow_mut().remove(key) {
                    handle.abort();
                }
                return stream::empty();
            }

            let Operation::Request {
                key,
                artifact,
                variables,
                ..
            } = op.clone()
            else {
                return stream::empty();
            };

            if let Some(handle) = in_flight.borrow_mut().remove(&key) {
                handle.abort();
            }

            let transport = transport.clone();
            let in_flight = in_flight.clone();
            let operation = op.clone();
            let operation_for_catch = operation.clone();
            let request_source = stream::make(move |observer: stream::MakeObserver<OperationResult>| {
                let span = tracing::debug_span!("http_exchange", key, operation = %artifact.name);
                let body = json!({
                    "operationName": artifact.name,
                    "query": artifact.body,
                    "variables": Value::Object(variables.0.clone()),
                });
                let transport = transport.clone();
                let operation = operation.clone();
                let observer_for_task = observer.clone();
                let handle = tokio::task::spawn_local(tracing::Instrument::instrument(async move {
                    match transport.post(body).await {
                        Ok(response) => {
                            let mut result = OperationResult::new(operation);
                            if let Some(data) = response.get("data").cloned() {
                                result = result.with_data(data);
                            }
                            if let Some(errors) = response.get("errors").cloned() {
                                if let Ok(errors) = serde_json::from_value::<Vec<GraphqlError>>(errors) {
                                    result = result.with_errors(errors);
                                }
                            }
                            if let Some(Value::Object(extensions)) = response.get("extensions").cloned() {
                                result.extensions = Some(extensions);
                            }
                            observer_for_task.next(result);
                            observer_for_task.complete();
                        }
                        Err(err) => {
                            observer_for_task.error(err);
                        }
                    }
                }, span));
                in_flight.borrow_mut().insert(key, handle);

                let in_flight_cleanup = in_flight.clone();
                Box::new(move || {
                    if let Some(handle) = in_flight_cleanup.borrow_mut().remove(&key) {
                        handle.abort();
                    }
                })
            });

            // A transport failure belongs to this one operation: caught here
            // and carried onward as a value so it never reaches the
            // `share()`/`merge_map` points downstream as a stream-level
            // error, which would otherwise tear down every other operation
            // multiplexed through the same pipeline.
            stream::catch_error(request_source, move |err| {
                OperationResult::new(operation_for_catch.clone()).with_transport_error(err)
            })
        });

        stream::merge(vec![passthrough_results, http_results])
    }
}
