//! Assembles the exchange chain and exposes the operation-execution
//! surface callers actually use: a `Source`-returning API for live
//! subscriptions, and `async fn` helpers for one-shot queries/mutations.

use std::cell::Cell;
use std::rc::Rc;

use serde_json::Value;

use crate::artifact::Artifact;
use crate::artifact::OperationKind;
use crate::cache::Cache;
use crate::cache::FragmentRef;
use crate::cache::StorageKey;
use crate::error::AggregatedError;
use crate::exchange::CacheExchange;
use crate::exchange::DedupExchange;
use crate::exchange::Exchange;
use crate::exchange::FragmentExchange;
use crate::exchange::HttpExchange;
use crate::exchange::HttpTransport;
use crate::exchange::RequiredExchange;
use crate::exchange::RetryExchange;
use crate::exchange::RetryOptions;
use crate::exchange::ScalarExchange;
use crate::exchange::SubscriptionExchange;
use crate::exchange::SubscriptionTransport;
use crate::exchange::TerminalExchange;
use crate::exchange::compose;
use crate::operation::Operation;
use crate::operation::OperationKey;
use crate::operation::OperationMetadata;
use crate::operation::OperationResult;
use crate::operation::RequestPolicy;
use crate::operation::Variables;
use crate::schema::SchemaDescriptor;
use crate::stream;
use crate::stream::Source;
use crate::stream::Subject;

/// Per-call overrides. `policy` defaults to `RequestPolicy::CacheFirst`;
/// `dedup_skip` opts a single call out of request collapsing (used for
/// operations with intentional side effects issued more than once, like a
/// "retry" button firing the identical mutation before the first attempt
/// settles).
#[derive(Clone, Debug, Default)]
pub struct ExecuteOptions {
    pub policy: Option<RequestPolicy>,
    pub dedup_skip: bool,
}

pub struct ClientOptions {
    pub schema: SchemaDescriptor,
    pub http_transport: Option<Rc<dyn HttpTransport>>,
    pub subscription_transport: Option<Rc<dyn SubscriptionTransport>>,
    pub retry: RetryOptions,
}

impl ClientOptions {
    pub fn new(schema: SchemaDescriptor) -> Self {
        ClientOptions {
            schema,
            http_transport: None,
            subscription_transport: None,
            retry: RetryOptions::default(),
        }
    }

    pub fn with_http_transport(mut self, transport: Rc<dyn HttpTransport>) -> Self {
        self.http_transport = Some(transport);
        self
    }

    pub fn with_subscription_transport(mut self, transport: Rc<dyn SubscriptionTransport>) -> Self {
        self.subscription_transport = Some(transport);
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }
}

pub struct Client {
    cache: Rc<Cache>,
    input: Subject<Operation>,
    results: Source<OperationResult>,
    next_key: Rc<Cell<OperationKey>>,
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        let schema = Rc::new(options.schema.clone());
        let cache = Rc::new(Cache::new(options.schema));

        let mut exchanges: Vec<Rc<dyn Exchange>> = vec![
            Rc::new(DedupExchange::new()),
            Rc::new(RetryExchange::new(options.retry)),
            Rc::new(CacheExchange::new(cache.clone())),
            Rc::new(ScalarExchange::new(schema)),
            Rc::new(RequiredExchange::new()),
            Rc::new(FragmentExchange::new(cache.clone())),
        ];
        if let Some(transport) = options.http_transport {
            exchanges.push(Rc::new(HttpExchange::new(transport)));
        }
        if let Some(transport) = options.subscription_transport {
            exchanges.push(Rc::new(SubscriptionExchange::new(transport)));
        }
        exchanges.push(Rc::new(TerminalExchange::new()));

        let forward = compose(exchanges);
        let input: Subject<Operation> = stream::make_subject();
        let results = stream::share(forward(input.source()));

        Client {
            cache,
            input,
            results,
            next_key: Rc::new(Cell::new(0)),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Builds a source that, on each subscription, claims a fresh
    /// operation key, dispatches the matching request onto the shared
    /// input subject, and emits the paired teardown on unsubscribe — so
    /// resubscribing the same returned source runs the operation again
    /// under its own key rather than reusing a torn-down one.
    fn execute(&self, artifact: Rc<Artifact>, variables: Variables, metadata: OperationMetadata) -> Source<OperationResult> {
        let input = self.input.clone();
        let results = self.results.clone();
        let next_key = self.next_key.clone();

        stream::make(move |observer: stream::MakeObserver<OperationResult>| {
            let key = next_key.get();
            next_key.set(key + 1);

            let sub = stream::subscribe(
                &stream::filter(results.clone(), move |r| r.operation.key() == key),
                stream::SinkObserver::new(
                    {
                        let observer = observer.clone();
                        move |r| observer.next(r)
                    },
                    {
                        let observer = observer.clone();
                        move |e| observer.error(e)
                    },
                    || {},
                ),
            );
            input.next(Operation::Request {
                key,
                artifact: artifact.clone(),
                variables: variables.clone(),
                metadata: metadata.clone(),
            });

            let input = input.clone();
            Box::new(move || {
                sub.unsubscribe();
                input.next(Operation::teardown_for(key));
            })
        })
    }

    fn execute_options_metadata(options: Option<ExecuteOptions>) -> OperationMetadata {
        let options = options.unwrap_or_default();
        OperationMetadata {
            policy: options.policy,
            dedup_skip: options.dedup_skip,
            ..Default::default()
        }
    }

    pub fn execute_query(
        &self,
        artifact: Rc<Artifact>,
        variables: Variables,
        options: Option<ExecuteOptions>,
    ) -> Source<OperationResult> {
        debug_assert_eq!(artifact.kind, OperationKind::Query);
        self.execute(artifact, variables, Self::execute_options_metadata(options))
    }

    pub fn execute_mutation(
        &self,
        artifact: Rc<Artifact>,
        variables: Variables,
        options: Option<ExecuteOptions>,
    ) -> Source<OperationResult> {
        debug_assert_eq!(artifact.kind, OperationKind::Mutation);
        let mut metadata = Self::execute_options_metadata(options);
        if metadata.policy.is_none() {
            metadata.policy = Some(RequestPolicy::NetworkOnly);
        }
        self.execute(artifact, variables, metadata)
    }

    pub fn execute_subscription(&self, artifact: Rc<Artifact>, variables: Variables) -> Source<OperationResult> {
        debug_assert_eq!(artifact.kind, OperationKind::Subscription);
        self.execute(artifact, variables, OperationMetadata::default())
    }

    pub fn execute_fragment(
        &self,
        artifact: Rc<Artifact>,
        fragment_ref: FragmentRef,
        variables: Variables,
    ) -> Source<OperationResult> {
        debug_assert_eq!(artifact.kind, OperationKind::Fragment);
        let mut metadata = OperationMetadata::default();
        metadata.extra.insert("fragmentRef".to_string(), encode_fragment_ref(&fragment_ref));
        self.execute(artifact, variables, metadata)
    }

    pub async fn query(&self, artifact: Rc<Artifact>, variables: Variables) -> Result<Value, AggregatedError> {
        let source = stream::take(self.execute_query(artifact, variables, None), 1);
        let result = stream::collect(source).await.map_err(AggregatedError::single_exchange)?;
        Self::resolve(result)
    }

    pub async fn mutation(&self, artifact: Rc<Artifact>, variables: Variables) -> Result<Value, AggregatedError> {
        let source = stream::take(self.execute_mutation(artifact, variables, None), 1);
        let result = stream::collect(source).await.map_err(AggregatedError::single_exchange)?;
        Self::resolve(result)
    }

    fn resolve(result: Option<OperationResult>) -> Result<Value, AggregatedError> {
        let Some(result) = result else {
            return Ok(Value::Null);
        };
        if let Some(err) = &result.transport_error {
            return Err(AggregatedError::single_exchange(err.shallow_clone()));
        }
        if let Some(errors) = result.errors.filter(|e| !e.is_empty()) {
            return Err(AggregatedError::from_graphql(errors));
        }
        Ok(result.data.unwrap_or(Value::Null))
    }
}

fn encode_fragment_ref(fragment_ref: &FragmentRef) -> Value {
    use serde_json::json;
    match fragment_ref {
        FragmentRef::Entity(key) => json!({ "kind": "entity", "storageKey": key.as_str() }),
        FragmentRef::List(keys) => json!({
            "kind": "list",
            "storageKeys": keys.iter().map(|k| k.as_ref().map(StorageKey::as_str)).collect::<Vec<_>>(),
        }),
        FragmentRef::Literal(value) => json!({ "kind": "literal", "value": value }),
    }
}
