use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use posthog_flags::{Client, ClientConfig, Error, FeatureFlagCalled};
use serde_json::{json, Value};

const PERSONAL_API_KEY: &str = "my very secret key";

#[derive(Default)]
struct MockServer {
    definition_requests: AtomicUsize,
    decide_bodies: Mutex<Vec<Value>>,
}

fn flags_response() -> Value {
    json!({
        "count": 4,
        "next": null,
        "previous": null,
        "results": [
            {
                "id": 719,
                "name": "",
                "key": "simpleFlag",
                "filters": {"groups": [{"properties": [], "rollout_percentage": null}]},
                "deleted": false,
                "active": true,
                "is_simple_flag": true,
                "rollout_percentage": null
            },
            {
                "id": 720,
                "name": "",
                "key": "enabled-flag",
                "filters": {"groups": [{"properties": [], "rollout_percentage": null}]},
                "deleted": false,
                "active": true,
                "is_simple_flag": false,
                "rollout_percentage": null
            },
            {
                "id": 721,
                "name": "",
                "key": "disabled-flag",
                "filters": {"groups": [{"properties": [], "rollout_percentage": null}]},
                "deleted": false,
                "active": true,
                "is_simple_flag": false,
                "rollout_percentage": null
            },
            {
                "id": 722,
                "name": "",
                "key": "inactive-flag",
                "deleted": false,
                "active": false,
                "is_simple_flag": true,
                "rollout_percentage": null
            }
        ]
    })
}

/// Start a mock PostHog API on a random local port and return its base URL.
async fn serve(server: Arc<MockServer>) -> String {
    let definitions = {
        let server = server.clone();
        get(move |headers: HeaderMap| async move {
            server.definition_requests.fetch_add(1, Ordering::SeqCst);
            let expected = format!("Bearer {PERSONAL_API_KEY}");
            let authorization = headers
                .get("authorization")
                .and_then(|value| value.to_str().ok());
            if authorization != Some(expected.as_str()) {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"detail": "Invalid personal API key."})),
                );
            }
            (StatusCode::OK, Json(flags_response()))
        })
    };

    let decide = post(move |Json(body): Json<Value>| async move {
        server.decide_bodies.lock().unwrap().push(body);
        Json(json!({"featureFlags": ["enabled-flag"]}))
    });

    let app = Router::new()
        .route("/api/feature_flag/", definitions)
        .route("/decide/", decide);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn create_client(server: &Arc<MockServer>, personal_api_key: &str) -> Client {
    let host = serve(server.clone()).await;
    ClientConfig::from_api_key("key")
        .host(format!("{host}/"))
        .personal_api_key(personal_api_key)
        .to_client()
        .unwrap()
}

#[tokio::test]
async fn simple_flag_is_enabled() {
    let server = Arc::new(MockServer::default());
    let client = create_client(&server, PERSONAL_API_KEY).await;

    assert!(client
        .is_feature_enabled("simpleFlag", "some id", false)
        .await
        .unwrap());

    client.shutdown();
}

#[tokio::test]
async fn complex_flags_use_decide() {
    let server = Arc::new(MockServer::default());
    let client = create_client(&server, PERSONAL_API_KEY).await;

    let enabled = client
        .is_feature_enabled("enabled-flag", "some id", false)
        .await
        .unwrap();
    let disabled = client
        .is_feature_enabled("disabled-flag", "some id", false)
        .await
        .unwrap();

    assert!(enabled);
    assert!(!disabled);
    assert_eq!(
        server.decide_bodies.lock().unwrap()[0],
        json!({"api_key": "key", "distinct_id": "some id"})
    );

    client.shutdown();
}

#[tokio::test]
async fn default_override() {
    let server = Arc::new(MockServer::default());
    let client = create_client(&server, PERSONAL_API_KEY).await;

    assert!(!client
        .is_feature_enabled("i-dont-exist", "some id", false)
        .await
        .unwrap());
    assert!(client
        .is_feature_enabled("i-dont-exist", "some id", true)
        .await
        .unwrap());

    client.shutdown();
}

#[tokio::test]
async fn inactive_flags_are_not_cached() {
    let server = Arc::new(MockServer::default());
    let client = create_client(&server, PERSONAL_API_KEY).await;

    client.wait_for_feature_flags().await.unwrap();

    let flags = client.feature_flags().unwrap();
    assert_eq!(flags.len(), 3);
    assert!(flags.get("inactive-flag").is_none());
    assert!(!client
        .is_feature_enabled("inactive-flag", "some id", false)
        .await
        .unwrap());

    client.shutdown();
}

#[tokio::test]
async fn reload_fetches_definitions_again() {
    let server = Arc::new(MockServer::default());
    let client = create_client(&server, PERSONAL_API_KEY).await;

    client.wait_for_feature_flags().await.unwrap();
    let before = server.definition_requests.load(Ordering::SeqCst);

    client.reload_feature_flags().await.unwrap();

    assert_eq!(server.definition_requests.load(Ordering::SeqCst), before + 1);

    client.shutdown();
}

#[tokio::test]
async fn project_key_used_as_personal_key_is_rejected() {
    let server = Arc::new(MockServer::default());
    let client = create_client(&server, "key").await;

    let result = client.wait_for_feature_flags().await;
    assert!(matches!(result, Err(Error::Unauthorized)));

    // Once the key has been rejected, evaluations fall back to the default.
    assert!(client
        .is_feature_enabled("simpleFlag", "some id", true)
        .await
        .unwrap());
    assert!(client.feature_flags().is_none());

    client.shutdown();
}

#[tokio::test]
async fn callback_is_notified() {
    let server = Arc::new(MockServer::default());
    let host = serve(server.clone()).await;
    let events = Arc::new(Mutex::new(Vec::new()));
    let client = {
        let events = events.clone();
        ClientConfig::from_api_key("key")
            .host(host)
            .personal_api_key(PERSONAL_API_KEY)
            .feature_flag_called_callback(move |event: FeatureFlagCalled| {
                events.lock().unwrap().push(event);
            })
            .to_client()
            .unwrap()
    };

    client
        .is_feature_enabled("simpleFlag", "some id", false)
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, "simpleFlag");
    assert_eq!(events[0].distinct_id, "some id");
    assert!(events[0].enabled);

    client.shutdown();
}
