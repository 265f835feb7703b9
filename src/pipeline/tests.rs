use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::*;
use crate::classifier::{Category, ClassificationResult, ClassifierError};
use crate::embedder::{EmbeddingBackend, EmbeddingError, HashingBackend};
use crate::store::NewArticle;

const TEST_DIMENSION: usize = 64;

async fn create_test_store(name: &str) -> Store {
    // Unique shared-cache name per test so parallel tests do not collide.
    let url = format!("file:{name}?mode=memory&cache=shared");
    Store::new(url).await.expect("can create in-memory store")
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dimension = TEST_DIMENSION as u32;
    config.classifier.retry_attempts = 2;
    config.classifier.backoff_base_ms = 1;
    config
}

fn make_pipeline(store: Store, classifier: Arc<dyn Classifier>, config: Config) -> Pipeline {
    let backend = Arc::new(HashingBackend::new(TEST_DIMENSION));
    let embedder = Embedder::new(backend, &config.embedding);
    Pipeline::new(store, embedder, classifier, config)
}

async fn seed(store: &Store, title: &str, description: &str, source: &str) -> i64 {
    store
        .insert_article(NewArticle {
            title: title.to_string(),
            description: description.to_string(),
            source: source.to_string(),
            created_date: Utc::now().naive_utc(),
        })
        .await
        .expect("can insert article")
        .id
}

/// Classifier that always returns the same successful result.
struct FixedClassifier(ClassificationResult);

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(
        &self,
        _title: &str,
        _description: &str,
    ) -> std::result::Result<ClassificationResult, ClassifierError> {
        Ok(self.0.clone())
    }
}

/// Classifier whose every call times out.
struct TimeoutClassifier;

#[async_trait]
impl Classifier for TimeoutClassifier {
    async fn classify(
        &self,
        _title: &str,
        _description: &str,
    ) -> std::result::Result<ClassificationResult, ClassifierError> {
        Err(ClassifierError::Timeout)
    }
}

/// Classifier whose every response is unparseable.
struct MalformedClassifier;

#[async_trait]
impl Classifier for MalformedClassifier {
    async fn classify(
        &self,
        _title: &str,
        _description: &str,
    ) -> std::result::Result<ClassificationResult, ClassifierError> {
        Err(ClassifierError::Malformed("not a json object".to_string()))
    }
}

/// Classifier that takes a fixed wall-clock time per call.
struct SlowClassifier(Duration);

#[async_trait]
impl Classifier for SlowClassifier {
    async fn classify(
        &self,
        _title: &str,
        _description: &str,
    ) -> std::result::Result<ClassificationResult, ClassifierError> {
        tokio::time::sleep(self.0).await;
        Ok(ClassificationResult {
            categories: vec![Category::Economy],
            tags: Vec::new(),
            confidence: 70,
        })
    }
}

/// Backend that returns a wrong-dimension vector for marked texts, so those
/// records fail individually while the rest of the batch survives.
struct FlakyBackend {
    inner: HashingBackend,
}

#[async_trait]
impl EmbeddingBackend for FlakyBackend {
    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = self.inner.embed_batch(texts).await?;
        for (text, vector) in texts.iter().zip(vectors.iter_mut()) {
            if text.contains("BROKEN") {
                vector.truncate(3);
            }
        }
        Ok(vectors)
    }
}

/// Backend that is wholly unreachable.
struct DownBackend;

#[async_trait]
impl EmbeddingBackend for DownBackend {
    fn dimension(&self) -> usize {
        TEST_DIMENSION
    }

    async fn embed_batch(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unreachable("connection refused".to_string()))
    }
}

fn markets_result() -> ClassificationResult {
    ClassificationResult {
        categories: vec![Category::Markets],
        tags: vec!["stocks".to_string()],
        confidence: 80,
    }
}

#[tokio::test]
async fn empty_fetch_is_a_noop() {
    let store = create_test_store("pipeline_empty").await;
    let pipeline = make_pipeline(
        store,
        Arc::new(FixedClassifier(markets_result())),
        test_config(),
    );

    let stats = pipeline.run().await.expect("empty run succeeds");

    assert_eq!(stats, RunStats::default());
}

#[tokio::test]
async fn duplicates_collapse_to_one_representative() {
    let store = create_test_store("pipeline_duplicates").await;

    let dupe_title = "Central bank raises interest rates by quarter point";
    let dupe_desc = "The central bank announced a rate hike citing inflation pressure";
    let dupe_ids = [
        seed(&store, dupe_title, dupe_desc, "wire-a").await,
        seed(&store, dupe_title, dupe_desc, "wire-b").await,
        seed(&store, dupe_title, dupe_desc, "wire-c").await,
    ];
    let solo_ids = [
        seed(
            &store,
            "Local football team wins championship final",
            "Fans celebrated downtown after the decisive victory",
            "sports-desk",
        )
        .await,
        seed(
            &store,
            "New species of deep sea fish discovered",
            "Researchers described the find in a marine biology journal",
            "science-daily",
        )
        .await,
    ];

    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(FixedClassifier(markets_result())),
        test_config(),
    );
    let stats = pipeline.run().await.expect("run succeeds");

    assert_eq!(stats.fetched, 5);
    assert_eq!(stats.embedded, 5);
    // Only the three duplicates joined a cluster; singletons are outliers.
    assert_eq!(stats.clustered, 3);
    // One cluster representative plus two singleton outliers.
    assert_eq!(stats.representatives, 3);
    assert_eq!(stats.classified, 3);
    assert_eq!(stats.persisted, 5);
    assert_eq!(stats.failed, 0);

    let mut dupes: Vec<Article> = Vec::new();
    for &id in &dupe_ids {
        let article = store
            .get_article(id)
            .await
            .expect("can fetch")
            .expect("dupe exists");
        dupes.push(article);
    }

    let cluster_id = dupes[0].cluster_id.expect("dupes are clustered");
    for dupe in &dupes {
        assert_eq!(dupe.status, ArticleStatus::Processed);
        assert_eq!(dupe.cluster_id, Some(cluster_id));
        assert_eq!(dupe.duplicate_count, 3);
    }
    let reps: Vec<&Article> = dupes.iter().filter(|a| a.is_representative).collect();
    assert_eq!(reps.len(), 1, "exactly one representative per cluster");
    assert_eq!(reps[0].category_labels(), vec!["markets"]);

    for &id in &solo_ids {
        let article = store
            .get_article(id)
            .await
            .expect("can fetch")
            .expect("solo exists");
        assert_eq!(article.status, ArticleStatus::Processed);
        assert_eq!(article.cluster_id, None);
        assert_eq!(article.duplicate_count, 1);
        assert!(article.is_representative);
        assert_eq!(article.category_labels(), vec!["markets"]);
    }
}

#[tokio::test]
async fn rerun_on_processed_batch_changes_nothing() {
    let store = create_test_store("pipeline_rerun").await;
    seed(&store, "Parliament passes budget bill", "Details inside", "wire").await;

    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(FixedClassifier(markets_result())),
        test_config(),
    );

    let first = pipeline.run().await.expect("first run succeeds");
    assert_eq!(first.persisted, 1);

    let second = pipeline.run().await.expect("second run succeeds");
    assert_eq!(second, RunStats::default());
}

#[tokio::test]
async fn per_record_embedding_failure_is_isolated() {
    let store = create_test_store("pipeline_embed_failure").await;
    let bad_id = seed(&store, "BROKEN record title", "BROKEN body", "wire").await;
    let good_id = seed(
        &store,
        "Housing starts rise in second quarter",
        "Construction activity picked up across most regions",
        "wire",
    )
    .await;

    let config = test_config();
    let embedder = Embedder::new(
        Arc::new(FlakyBackend {
            inner: HashingBackend::new(TEST_DIMENSION),
        }),
        &config.embedding,
    );
    let pipeline = Pipeline::new(
        store.clone(),
        embedder,
        Arc::new(FixedClassifier(markets_result())),
        config,
    );

    let stats = pipeline.run().await.expect("run succeeds");

    assert_eq!(stats.fetched, 2);
    assert_eq!(stats.embedded, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.persisted, 1);

    let bad = store
        .get_article(bad_id)
        .await
        .expect("can fetch")
        .expect("exists");
    assert_eq!(bad.status, ArticleStatus::Failed);
    let reason = bad.error_message.expect("failure reason recorded");
    assert!(reason.contains("embedding failed"), "reason: {reason}");
    assert!(bad.processed_date.is_some());

    let good = store
        .get_article(good_id)
        .await
        .expect("can fetch")
        .expect("exists");
    assert_eq!(good.status, ArticleStatus::Processed);
}

#[tokio::test]
async fn unreachable_backend_aborts_and_leaves_records_raw() {
    let store = create_test_store("pipeline_backend_down").await;
    let id = seed(&store, "Some headline", "Some body", "wire").await;

    let config = test_config();
    let embedder = Embedder::new(Arc::new(DownBackend), &config.embedding);
    let pipeline = Pipeline::new(
        store.clone(),
        embedder,
        Arc::new(FixedClassifier(markets_result())),
        config,
    );

    let error = pipeline.run().await.expect_err("run aborts");
    assert!(matches!(error, PipelineError::Embedding(_)));

    let article = store
        .get_article(id)
        .await
        .expect("can fetch")
        .expect("exists");
    assert_eq!(article.status, ArticleStatus::Raw);
}

#[tokio::test]
async fn classifier_outage_degrades_instead_of_failing() {
    let store = create_test_store("pipeline_classifier_down").await;
    let id = seed(
        &store,
        "Court rules on antitrust case",
        "The ruling affects several large firms",
        "wire",
    )
    .await;

    let pipeline = make_pipeline(store.clone(), Arc::new(TimeoutClassifier), test_config());
    let stats = pipeline.run().await.expect("run succeeds");

    assert_eq!(stats.classified, 1);
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.failed, 0, "degraded classification is not a failure");

    let article = store
        .get_article(id)
        .await
        .expect("can fetch")
        .expect("exists");
    assert_eq!(article.status, ArticleStatus::Processed);
    assert_eq!(article.category_labels(), vec!["other"]);
    assert_eq!(article.confidence, Some(0));
    let reason = article.error_message.expect("degradation reason recorded");
    assert!(reason.contains("retries exhausted"), "reason: {reason}");
}

#[tokio::test]
async fn malformed_classifier_output_yields_fallback_everywhere() {
    let store = create_test_store("pipeline_classifier_malformed").await;
    let ids = [
        seed(&store, "Retail sales slip in July", "Spending cooled", "wire").await,
        seed(
            &store,
            "Port strike delays shipments",
            "Container backlogs grew overnight",
            "wire",
        )
        .await,
    ];

    let pipeline = make_pipeline(store.clone(), Arc::new(MalformedClassifier), test_config());
    let stats = pipeline.run().await.expect("run succeeds");

    assert_eq!(stats.classified, 2);
    assert_eq!(stats.failed, 0);

    for &id in &ids {
        let article = store
            .get_article(id)
            .await
            .expect("can fetch")
            .expect("exists");
        assert_eq!(article.status, ArticleStatus::Processed);
        assert_eq!(article.category_labels(), vec!["other"]);
        assert_eq!(article.confidence, Some(0));
        assert!(article.tag_labels().is_empty());
    }
}

#[tokio::test]
async fn budget_exhaustion_defers_undispatched_representatives() {
    let store = create_test_store("pipeline_budget").await;
    seed(
        &store,
        "Tech firm announces quarterly earnings",
        "Revenue beat analyst expectations",
        "wire",
    )
    .await;
    seed(
        &store,
        "Drought conditions worsen across farm belt",
        "Crop forecasts were revised downward",
        "wire",
    )
    .await;
    seed(
        &store,
        "Museum reopens after decade of restoration",
        "Visitors queued for hours on opening day",
        "wire",
    )
    .await;

    let mut config = test_config();
    config.pipeline.run_budget_seconds = 1;
    config.classifier.concurrency = 1;

    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(SlowClassifier(Duration::from_millis(1200))),
        config,
    );
    let stats = pipeline.run().await.expect("run succeeds");

    assert_eq!(stats.fetched, 3);
    assert_eq!(stats.representatives, 3);
    // First dispatch starts before the deadline; the rest are deferred.
    assert_eq!(stats.classified, 1);
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.failed, 0);

    let deferred = store
        .fetch_by_status(ArticleStatus::Raw, 10)
        .await
        .expect("can fetch raw");
    assert_eq!(deferred.len(), 2, "deferred records return to raw");
    for article in &deferred {
        // Deferral leaves no cluster annotation behind; the next run starts
        // from a clean record.
        assert_eq!(article.cluster_id, None);
        assert_eq!(article.duplicate_count, 1);
        assert!(!article.is_representative);
        assert!(article.categories.is_none());
    }

    let processed_count = store
        .count_by_status(ArticleStatus::Processed)
        .await
        .expect("can count");
    assert_eq!(processed_count, 1);
}

#[tokio::test]
async fn repeated_failures_for_one_record_count_once() {
    let store = create_test_store("pipeline_failed_dedup").await;
    let id = seed(&store, "Flaky record", "Body", "wire").await;

    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(FixedClassifier(markets_result())),
        test_config(),
    );

    // A record that fails at more than one stage is still one failed record.
    let mut failed = HashSet::new();
    pipeline.mark_failed(id, "first failure", &mut failed).await;
    pipeline.mark_failed(id, "second failure", &mut failed).await;

    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn empty_text_records_become_singletons() {
    let store = create_test_store("pipeline_empty_text").await;
    let empty_id = seed(&store, "", "", "wire").await;
    seed(
        &store,
        "Regulators approve bank merger",
        "The combined entity becomes the third largest lender",
        "wire",
    )
    .await;

    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(FixedClassifier(markets_result())),
        test_config(),
    );
    let stats = pipeline.run().await.expect("run succeeds");

    assert_eq!(stats.failed, 0);
    assert_eq!(stats.persisted, 2);

    let empty = store
        .get_article(empty_id)
        .await
        .expect("can fetch")
        .expect("exists");
    assert_eq!(empty.status, ArticleStatus::Processed);
    assert_eq!(empty.cluster_id, None, "empty text never joins a cluster");
    assert!(empty.is_representative);
}
