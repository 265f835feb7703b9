use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use news_dedup::classifier::{
    Category, ClassificationResult, Classifier, ClassifierError, HttpClassifier, RetryPolicy,
    classify_with_retry,
};
use news_dedup::config::ClassifierConfig;

fn classifier_for(server: &MockServer) -> HttpClassifier {
    let addr = server.address();
    let config = ClassifierConfig {
        protocol: "http".to_string(),
        host: addr.ip().to_string(),
        port: addr.port(),
        retry_attempts: 3,
        backoff_base_ms: 1,
        concurrency: 4,
        timeout_seconds: 5,
    };
    HttpClassifier::new(&config).expect("classifier builds from valid config")
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base_ms: 1,
    }
}

#[tokio::test]
async fn parses_successful_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "categories": ["markets", "economy"],
            "tags": ["rates", "inflation"],
            "confidence": 88
        })))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let result = classifier
        .classify("Central bank raises rates", "Inflation pressure cited")
        .await
        .expect("classification succeeds");

    assert_eq!(result.categories, vec![Category::Markets, Category::Economy]);
    assert_eq!(result.tags, vec!["rates", "inflation"]);
    assert_eq!(result.confidence, 88);
}

#[tokio::test]
async fn tolerates_markdown_fenced_payload() {
    let server = MockServer::start().await;

    let body = "```json\n{\"categories\": [\"legal\"], \"tags\": [], \"confidence\": 60}\n```";
    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let result = classifier
        .classify("Court ruling", "Appeal dismissed")
        .await
        .expect("fenced payload parses");

    assert_eq!(result.categories, vec![Category::Legal]);
    assert_eq!(result.confidence, 60);
}

#[tokio::test]
async fn unknown_categories_fall_back_with_capped_confidence() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "categories": ["weather", "astrology"],
            "tags": ["sunny"],
            "confidence": 95
        })))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let result = classifier
        .classify("Forecast", "Sunny all week")
        .await
        .expect("classification succeeds");

    assert_eq!(result.categories, vec![Category::Other]);
    assert_eq!(result.confidence, 50);
    assert_eq!(result.tags, vec!["sunny"]);
}

#[tokio::test]
async fn malformed_body_is_reported_as_malformed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_string("no json at all"))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let error = classifier
        .classify("Title", "Body")
        .await
        .expect_err("malformed body fails");

    assert!(matches!(error, ClassifierError::Malformed(_)));
    assert!(!error.is_transient());
}

#[tokio::test]
async fn client_error_maps_to_http_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let error = classifier
        .classify("Title", "Body")
        .await
        .expect_err("client error fails");

    assert!(matches!(error, ClassifierError::Http(422)));
    assert!(!error.is_transient());
}

#[tokio::test]
async fn rate_limiting_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let error = classifier
        .classify("Title", "Body")
        .await
        .expect_err("rate limit fails the call");

    assert!(matches!(error, ClassifierError::RateLimited));
    assert!(error.is_transient());
}

#[tokio::test]
async fn retry_recovers_from_server_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "categories": ["corporate"],
            "tags": [],
            "confidence": 75
        })))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let outcome = classify_with_retry(&classifier, "Merger news", "Details", fast_policy()).await;

    assert!(!outcome.is_degraded());
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.result.categories, vec![Category::Corporate]);
}

#[tokio::test]
async fn persistent_outage_degrades_to_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/classify"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let classifier = classifier_for(&server);
    let outcome = classify_with_retry(&classifier, "Title", "Body", fast_policy()).await;

    assert!(outcome.is_degraded());
    assert_eq!(outcome.result, ClassificationResult::fallback());
    assert_eq!(outcome.attempts, 3);
}
