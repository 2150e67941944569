//! End-to-end coverage of the client assembled from its full exchange
//! chain: dedup, cache-first reads, mutation-driven cache updates,
//! explicit invalidation, retry, and `@required` cascading.

use std::rc::Rc;
use std::time::Duration;

use graphql_exchange_core::Client;
use graphql_exchange_core::ClientOptions;
use graphql_exchange_core::Variables;
use graphql_exchange_core::exchange::RetryOptions;
use graphql_exchange_core::schema::EntityDescriptor;
use graphql_exchange_core::schema::SchemaDescriptor;
use graphql_exchange_core::stream;
use graphql_exchange_core::test_support::MockResponse;
use graphql_exchange_core::test_support::MockTransport;
use graphql_exchange_core::test_support::field;
use graphql_exchange_core::test_support::mutation_artifact;
use graphql_exchange_core::test_support::object_field;
use graphql_exchange_core::test_support::query_artifact;
use graphql_exchange_core::test_support::typename_field;
use serde_json::json;

fn run_local<F: std::future::Future>(fut: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("current-thread runtime");
    tokio::task::LocalSet::new().block_on(&rt, fut)
}

fn schema_with_user() -> SchemaDescriptor {
    let mut schema = SchemaDescriptor::default();
    schema.entities.insert(
        "User".to_string(),
        EntityDescriptor {
            key_fields: vec!["id".to_string()],
        },
    );
    schema
}

fn user_query(name: &str) -> Rc<graphql_exchange_core::artifact::Artifact> {
    let user_selections = vec![typename_field(), graphql_exchange_core::artifact::Selection::Field(field("id")), graphql_exchange_core::artifact::Selection::Field(field("name"))];
    query_artifact(
        name,
        vec![graphql_exchange_core::artifact::Selection::Field(object_field(
            "user",
            "User",
            user_selections,
        ))],
    )
}

fn user_mutation(name: &str) -> Rc<graphql_exchange_core::artifact::Artifact> {
    let user_selections = vec![typename_field(), graphql_exchange_core::artifact::Selection::Field(field("id")), graphql_exchange_core::artifact::Selection::Field(field("name"))];
    mutation_artifact(
        name,
        vec![graphql_exchange_core::artifact::Selection::Field(object_field(
            "updateUser",
            "User",
            user_selections,
        ))],
    )
}

#[test]
fn dedup_collapses_three_identical_in_flight_queries() {
    run_local(async {
        let transport = Rc::new(MockTransport::new());
        transport.push(MockResponse::data(
            json!({ "user": { "__typename": "User", "id": "1", "name": "Alice" } }),
        ));

        let client = Client::new(ClientOptions::new(schema_with_user()).with_http_transport(transport.clone()));
        let artifact = user_query("GetUser");

        let (a, b, c) = tokio::join!(
            client.query(artifact.clone(), Variables::new()),
            client.query(artifact.clone(), Variables::new()),
            client.query(artifact.clone(), Variables::new()),
        );

        assert_eq!(transport.call_count(), 1);
        for result in [a, b, c] {
            let data = result.expect("query succeeds");
            assert_eq!(data["user"]["name"], json!("Alice"));
        }
    });
}

#[test]
fn cache_first_hit_avoids_a_second_network_call() {
    run_local(async {
        let transport = Rc::new(MockTransport::new());
        transport.push(MockResponse::data(
            json!({ "user": { "__typename": "User", "id": "1", "name": "Alice" } }),
        ));

        let client = Client::new(ClientOptions::new(schema_with_user()).with_http_transport(transport.clone()));
        let artifact = user_query("GetUser");

        let first = client.query(artifact.clone(), Variables::new()).await.unwrap();
        assert_eq!(first["user"]["name"], json!("Alice"));
        assert_eq!(transport.call_count(), 1);

        let second = client.query(artifact.clone(), Variables::new()).await.unwrap();
        assert_eq!(second["user"]["name"], json!("Alice"));
        assert_eq!(transport.call_count(), 1, "second issuance must be served from cache");
    });
}

#[test]
fn mutation_updates_entity_and_subscribed_query_re_emits() {
    run_local(async {
        let transport = Rc::new(MockTransport::new());
        transport.push(MockResponse::data(
            json!({ "user": { "__typename": "User", "id": "1", "name": "Alice" } }),
        ));
        transport.push(MockResponse::data(
            json!({ "updateUser": { "__typename": "User", "id": "1", "name": "Bob" } }),
        ));

        let client = Rc::new(Client::new(
            ClientOptions::new(schema_with_user()).with_http_transport(transport.clone()),
        ));
        let query = user_query("GetUser");

        let emissions: Rc<std::cell::RefCell<Vec<serde_json::Value>>> = Rc::new(std::cell::RefCell::new(Vec::new()));
        let emissions_for_sink = emissions.clone();
        let source = client.execute_query(query, Variables::new(), None);
        let sub = stream::subscribe(
            &source,
            stream::SinkObserver::new(
                move |r: graphql_exchange_core::OperationResult| {
                    if let Some(data) = r.data {
                        emissions_for_sink.borrow_mut().push(data);
                    }
                },
                |_e| panic!("unexpected exchange error"),
                || {},
            ),
        );

        // Let the initial cache-miss network fetch resolve.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(emissions.borrow().last().unwrap()["user"]["name"], json!("Alice"));

        let mutation = user_mutation("UpdateUser");
        client.mutation(mutation, Variables::new()).await.unwrap();

        assert_eq!(emissions.borrow().last().unwrap()["user"]["name"], json!("Bob"));
        sub.unsubscribe();
    });
}

#[test]
fn invalidate_marks_stale_then_refetches() {
    run_local(async {
        let transport = Rc::new(MockTransport::new());
        transport.push(MockResponse::data(
            json!({ "user": { "__typename": "User", "id": "1", "name": "Alice" } }),
        ));
        transport.push(MockResponse::data(
            json!({ "user": { "__typename": "User", "id": "1", "name": "Robert" } }),
        ));

        let client = Rc::new(Client::new(
            ClientOptions::new(schema_with_user()).with_http_transport(transport.clone()),
        ));
        let query = user_query("GetUser");

        let emissions: Rc<std::cell::RefCell<Vec<(serde_json::Value, Option<bool>)>>> =
            Rc::new(std::cell::RefCell::new(Vec::new()));
        let emissions_for_sink = emissions.clone();
        let source = client.execute_query(query, Variables::new(), None);
        let sub = stream::subscribe(
            &source,
            stream::SinkObserver::new(
                move |r: graphql_exchange_core::OperationResult| {
                    if let Some(data) = r.data {
                        emissions_for_sink.borrow_mut().push((data, r.metadata.cache_stale));
                    }
                },
                |_e| panic!("unexpected exchange error"),
                || {},
            ),
        );

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(emissions.borrow().last().unwrap().0["user"]["name"], json!("Alice"));

        client.cache().invalidate_entity("User", &["1".to_string()]);

        // The stale emission fires synchronously off the listener callback.
        let (stale_data, stale_flag) = emissions.borrow().last().unwrap().clone();
        assert_eq!(stale_data["user"]["name"], json!("Alice"));
        assert_eq!(stale_flag, Some(true));

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let (fresh_data, fresh_flag) = emissions.borrow().last().unwrap().clone();
        assert_eq!(fresh_data["user"]["name"], json!("Robert"));
        assert_eq!(fresh_flag, Some(false));
        assert_eq!(transport.call_count(), 2);

        sub.unsubscribe();
    });
}

#[test]
fn retries_on_server_errors_until_success() {
    run_local(async {
        let transport = Rc::new(MockTransport::new());
        transport.push(MockResponse::Status(500));
        transport.push(MockResponse::Status(500));
        transport.push(MockResponse::data(json!({ "ping": "pong" })));

        let fast_retry = RetryOptions {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let client = Client::new(
            ClientOptions::new(SchemaDescriptor::default())
                .with_http_transport(transport.clone())
                .with_retry(fast_retry),
        );
        let artifact = mutation_artifact("Ping", vec![graphql_exchange_core::artifact::Selection::Field(field("ping"))]);

        let result = client.mutation(artifact, Variables::new()).await;
        assert_eq!(result.unwrap()["ping"], json!("pong"));
        assert_eq!(transport.call_count(), 3);
    });
}

#[test]
fn does_not_retry_a_non_retryable_status() {
    run_local(async {
        let transport = Rc::new(MockTransport::new());
        transport.push(MockResponse::Status(404));

        let client = Client::new(ClientOptions::new(SchemaDescriptor::default()).with_http_transport(transport.clone()));
        let artifact = mutation_artifact("Ping", vec![graphql_exchange_core::artifact::Selection::Field(field("ping"))]);

        let result = client.mutation(artifact, Variables::new()).await;
        assert!(result.is_err());
        assert_eq!(transport.call_count(), 1);
    });
}

#[test]
fn required_cascade_nulls_through_non_nullable_ancestors() {
    run_local(async {
        let transport = Rc::new(MockTransport::new());
        transport.push(MockResponse::data(json!({ "user": { "name": null } })));

        let client = Client::new(ClientOptions::new(SchemaDescriptor::default()).with_http_transport(transport.clone()));

        let name_field = field("name").required(graphql_exchange_core::artifact::RequiredAction::Cascade);
        let user_selections = vec![graphql_exchange_core::artifact::Selection::Field(name_field)];
        let artifact = query_artifact(
            "GetUserCascade",
            vec![graphql_exchange_core::artifact::Selection::Field(object_field(
                "user",
                "User",
                user_selections,
            ))],
        );

        // NetworkOnly sidesteps the normalized cache's own read/write
        // round-trip so the assertion is purely about required-directive
        // enforcement on the raw network response.
        let options = graphql_exchange_core::client::ExecuteOptions {
            policy: Some(graphql_exchange_core::RequestPolicy::NetworkOnly),
            dedup_skip: false,
        };
        let source = stream::take(client.execute_query(artifact, Variables::new(), Some(options)), 1);
        let result = stream::collect(source).await.unwrap();
        let result = result.expect("one result emitted");
        assert!(!result.has_errors());
        assert_eq!(result.data, Some(serde_json::Value::Null));
    });
}
