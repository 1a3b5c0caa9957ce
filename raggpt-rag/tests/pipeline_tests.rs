//! End-to-end ingestion and query scenarios.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use raggpt_rag::{
    ChatEngine, Collection, CollectionLocation, Conversation, ConversationTurn, Document,
    EmbeddingClient, EmbeddingProvider, EmbeddingRegistry, ErrorKind, HashEmbeddingProvider,
    InMemoryVectorStore, IndexBuilder, LanguageModel, Prompt, QueryState, RagConfig, RagError,
    RagMode, Result, Retriever, VectorStore,
};

/// Hash embeddings that fail on a marker word, or on everything once tripped.
struct FlakyProvider {
    inner: HashEmbeddingProvider,
    broken: AtomicBool,
}

impl FlakyProvider {
    fn new(model_id: &str) -> Self {
        Self {
            inner: HashEmbeddingProvider::new(64).with_model_id(model_id),
            broken: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn max_batch_size(&self) -> usize {
        4
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if self.broken.load(Ordering::SeqCst) || texts.iter().any(|t| t.contains("QUOTA")) {
            return Err(RagError::EmbeddingService {
                provider: self.model_id().to_string(),
                message: "429 Too Many Requests".to_string(),
            });
        }
        self.inner.embed_batch(texts).await
    }
}

/// Hash embeddings behind a fixed delay per sub-batch.
struct SlowProvider {
    inner: HashEmbeddingProvider,
    delay: Duration,
}

impl SlowProvider {
    fn new(delay: Duration) -> Self {
        Self { inner: HashEmbeddingProvider::new(64), delay }
    }
}

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn max_batch_size(&self) -> usize {
        2
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.embed_batch(texts).await
    }
}

/// Records the last prompt and answers with a fixed string.
#[derive(Default)]
struct RecordingModel {
    last_prompt: std::sync::Mutex<Option<Prompt>>,
}

#[async_trait]
impl LanguageModel for RecordingModel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &Prompt, _temperature: f32) -> Result<String> {
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());
        Ok("answer".to_string())
    }
}

fn config(model_id: &str) -> RagConfig {
    RagConfig::builder()
        .embedding_model_id(model_id)
        .chunk_size(120)
        .chunk_overlap(20)
        .top_k(4)
        .build()
        .unwrap()
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "solar.txt",
            "Solar panels convert sunlight into electricity. Output drops on cloudy days. \
             Panels facing south collect the most light in the northern hemisphere.",
        ),
        Document::new(
            "water.txt",
            "Rain barrels collect water from the roof. A first-flush diverter keeps debris out. \
             Stored rainwater should be filtered before drinking.",
        ),
        Document::new(
            "garden.md",
            "Tomatoes need six hours of direct sun. Water deeply twice a week. \
             Mulch keeps the soil moist and suppresses weeds.",
        ),
    ]
}

fn builder_for(
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<InMemoryVectorStore>,
) -> IndexBuilder {
    let registry = EmbeddingRegistry::new().with(provider.clone());
    IndexBuilder::new(&config(provider.model_id()), &registry, store).unwrap()
}

#[tokio::test]
async fn persisted_collection_answers_identically_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(64));
    let store = Arc::new(InMemoryVectorStore::new());
    let builder = builder_for(provider.clone(), store.clone());
    builder.build("docs", &corpus(), dir.path()).await.unwrap();

    let registry = EmbeddingRegistry::new().with(provider);
    let original = Retriever::new(store, registry.clone());
    let reloaded = Retriever::new(Arc::new(InMemoryVectorStore::new()), registry);
    reloaded.open("docs", dir.path()).await.unwrap();

    for query in ["cloudy day output", "filter rainwater", "tomato sun", "unrelated words"] {
        assert_eq!(
            original.retrieve(query, "docs", 3).await.unwrap(),
            reloaded.retrieve(query, "docs", 3).await.unwrap(),
            "query {query:?}"
        );
    }
}

#[tokio::test]
async fn building_twice_does_not_duplicate_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let builder = builder_for(Arc::new(HashEmbeddingProvider::new(64)), store.clone());

    let once = builder.build("docs", &corpus(), dir.path()).await.unwrap();
    let twice = builder.build("docs", &corpus(), dir.path()).await.unwrap();

    assert_eq!(once.chunk_count, twice.chunk_count);
    assert_eq!(twice.ingested.len(), 0);
    assert_eq!(twice.skipped.len(), 3);
    assert_eq!(Collection::load(dir.path()).await.unwrap().len(), once.chunk_count);
}

#[tokio::test]
async fn concurrent_builds_on_one_collection_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let builder = builder_for(Arc::new(HashEmbeddingProvider::new(64)), store.clone());
    let single = {
        let other = tempfile::tempdir().unwrap();
        let solo = builder_for(Arc::new(HashEmbeddingProvider::new(64)), Arc::default());
        solo.build("docs", &corpus(), other.path()).await.unwrap().chunk_count
    };

    let docs = corpus();
    let (a, b) = tokio::join!(
        builder.build("docs", &docs, dir.path()),
        builder.build("docs", &docs, dir.path())
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.ingested.len() + b.ingested.len(), 3);
    assert_eq!(store.snapshot("docs").await.unwrap().len(), single);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn separate_builders_sharing_a_store_take_turns() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let provider: Arc<dyn EmbeddingProvider> =
        Arc::new(SlowProvider::new(Duration::from_millis(20)));
    let first = builder_for(provider.clone(), store.clone());
    let second = builder_for(provider, store.clone());

    let one = [Document::new("one.txt", "Batteries store surplus solar energy for the night.")];
    let two = [Document::new("two.txt", "Inverters turn direct current into alternating current.")];
    let (a, b) = tokio::join!(
        first.build("docs", &one, dir.path()),
        second.build("docs", &two, dir.path())
    );
    a.unwrap();
    b.unwrap();

    let resident: Vec<String> =
        store.collection_info("docs").await.unwrap().documents.into_keys().collect();
    assert_eq!(resident, ["one.txt", "two.txt"]);
    let persisted: Vec<String> =
        Collection::read_metadata(dir.path()).await.unwrap().documents.into_keys().collect();
    assert_eq!(persisted, resident);
    let on_disk = Collection::load(dir.path()).await.unwrap();
    assert_eq!(on_disk.len(), store.snapshot("docs").await.unwrap().len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn searches_during_a_build_see_before_or_after_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let provider: Arc<dyn EmbeddingProvider> =
        Arc::new(SlowProvider::new(Duration::from_millis(10)));
    let builder = builder_for(provider.clone(), store.clone());
    builder.build("docs", &corpus()[..1], dir.path()).await.unwrap();

    let query = EmbeddingClient::new(provider).embed_query("water and sun").await.unwrap();
    let before = store.search("docs", &query, 100).await.unwrap();

    let additions: Vec<Document> = corpus()[1..]
        .iter()
        .map(|doc| Document::new(doc.name.clone(), doc.text.repeat(4)))
        .collect();
    let task = {
        let builder = builder.clone();
        let path = dir.path().to_path_buf();
        tokio::spawn(async move { builder.build("docs", &additions, &path).await })
    };

    let mut observed = Vec::new();
    while !task.is_finished() {
        observed.push(store.search("docs", &query, 100).await.unwrap());
        tokio::task::yield_now().await;
    }
    let summary = task.await.unwrap().unwrap();
    let after = store.search("docs", &query, 100).await.unwrap();

    assert!(summary.ingested.len() == 2 && after.len() > before.len() + 2);
    assert!(!observed.is_empty());
    for results in &observed {
        assert!(*results == before || *results == after, "saw {} results", results.len());
    }
}

#[tokio::test]
async fn reingesting_with_another_model_is_a_policy_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    builder_for(Arc::new(FlakyProvider::new("A")), store.clone())
        .build("docs", &corpus(), dir.path())
        .await
        .unwrap();

    let err = builder_for(Arc::new(FlakyProvider::new("B")), store)
        .build("docs", &corpus(), dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::CollectionPolicyMismatch { .. }));

    // Same result from a fresh process reading only the persisted state.
    let err = builder_for(Arc::new(FlakyProvider::new("B")), Arc::default())
        .build("docs", &corpus(), dir.path())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CollectionPolicyMismatch);
}

#[tokio::test]
async fn k_larger_than_collection_returns_every_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(64));
    let store = Arc::new(InMemoryVectorStore::new());
    let docs = [Document::new("a.txt", "first short note"), Document::new("b.txt", "second")];
    let summary =
        builder_for(provider.clone(), store.clone()).build("two", &docs, dir.path()).await.unwrap();
    assert_eq!(summary.chunk_count, 2);

    let retriever = Retriever::new(store, EmbeddingRegistry::new().with(provider));
    assert_eq!(retriever.retrieve("note", "two", 5).await.unwrap().len(), 2);
}

#[tokio::test]
async fn querying_a_never_built_collection_is_not_found() {
    let registry = EmbeddingRegistry::new().with(Arc::new(HashEmbeddingProvider::new(64)));
    let retriever = Retriever::new(Arc::new(InMemoryVectorStore::new()), registry);
    let err = retriever.retrieve("anything", "empty", 3).await.unwrap_err();
    assert!(matches!(err, RagError::CollectionNotFound(_)));
}

#[tokio::test]
async fn embedding_failure_mid_build_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let builder = builder_for(Arc::new(FlakyProvider::new("flaky")), store.clone());
    builder.build("docs", &corpus()[..1], dir.path()).await.unwrap();
    let before_disk = Collection::read_metadata(dir.path()).await.unwrap();
    let before_len = store.snapshot("docs").await.unwrap().len();

    let batch = [corpus()[1].clone(), Document::new("bad.txt", "this one hits the QUOTA limit")];
    let err = builder.build("docs", &batch, dir.path()).await.unwrap_err();

    assert!(matches!(
        err,
        RagError::PartialBatchFailure { ref document, .. } if document == "bad.txt"
    ));
    assert_eq!(Collection::read_metadata(dir.path()).await.unwrap(), before_disk);
    let after = store.snapshot("docs").await.unwrap();
    assert_eq!(after.len(), before_len);
    assert!(after.document_chunks("water.txt").is_empty());
}

#[tokio::test]
async fn failed_build_of_a_new_collection_leaves_no_directory_contents() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("fresh");
    let store = Arc::new(InMemoryVectorStore::new());
    let builder = builder_for(Arc::new(FlakyProvider::new("flaky")), store.clone());

    let docs = [Document::new("bad.txt", "QUOTA")];
    assert!(builder.build("fresh", &docs, &target).await.is_err());
    assert!(!Collection::exists(&target).await);
    assert!(!store.contains("fresh").await);
}

async fn engine_with(
    root: &Path,
    provider: Arc<FlakyProvider>,
    model: Arc<RecordingModel>,
    max_context_units: usize,
) -> ChatEngine {
    let config = RagConfig::builder()
        .embedding_model_id(provider.model_id())
        .chunk_size(120)
        .chunk_overlap(20)
        .top_k(4)
        .max_context_units(max_context_units)
        .system_instruction("Answer from the retrieved content.")
        .build()
        .unwrap();
    let engine = ChatEngine::builder()
        .config(config)
        .registry(EmbeddingRegistry::new().with(provider))
        .language_model(model)
        .preprocessed(CollectionLocation::new("preprocessed", root.join("processed")))
        .uploaded(CollectionLocation::new("uploaded", root.join("uploaded")))
        .build()
        .unwrap();

    let data = root.join("docs");
    tokio::fs::create_dir_all(&data).await.unwrap();
    for document in corpus() {
        tokio::fs::write(data.join(&document.name), &document.text).await.unwrap();
    }
    engine.prepare_preprocessed(&data).await.unwrap();
    engine
}

#[tokio::test]
async fn truncated_prompt_keeps_query_and_references_only_sent_chunks() {
    let root = tempfile::tempdir().unwrap();
    let model = Arc::new(RecordingModel::default());
    let engine =
        engine_with(root.path(), Arc::new(FlakyProvider::new("m")), model.clone(), 450).await;

    let history = Conversation::new()
        .apply_turn(ConversationTurn::new("earlier question", "earlier answer"))
        .apply_turn(ConversationTurn::new("another question", "another answer"));
    let question = "How much sun do tomatoes need each day?";
    let reply = engine.respond(history, question, RagMode::Preprocessed).await.unwrap();

    let prompt = model.last_prompt.lock().unwrap().clone().unwrap();
    assert!(prompt.truncated);
    assert!(prompt.user.ends_with(question));
    assert!(!prompt.chunks.is_empty());
    assert!(prompt.units() <= 450);
    for reference in &reply.references {
        assert!(prompt.chunks.iter().any(|c| c.chunk.document == reference.source));
        assert!(prompt.user.contains(&format!("Source: {}", reference.source)));
    }
    assert_eq!(reply.conversation.len(), 3);
    assert_eq!(reply.conversation.turns()[2].user, question);
}

#[tokio::test]
async fn failed_query_leaves_conversation_untouched() {
    let root = tempfile::tempdir().unwrap();
    let provider = Arc::new(FlakyProvider::new("m"));
    let engine = engine_with(
        root.path(),
        provider.clone(),
        Arc::new(RecordingModel::default()),
        10_000,
    )
    .await;

    let history = Conversation::new().apply_turn(ConversationTurn::new("hi", "hello"));
    provider.broken.store(true, Ordering::SeqCst);
    let question = "what about water?";
    let failure =
        engine.respond(history.clone(), question, RagMode::Preprocessed).await.unwrap_err();

    assert_eq!(failure.conversation, history);
    assert_eq!(failure.stage, QueryState::Embedding);
    assert!(failure.kind.is_retryable());

    provider.broken.store(false, Ordering::SeqCst);
    let reply = engine.respond(failure.conversation, question, RagMode::Preprocessed);
    assert_eq!(reply.await.unwrap().conversation.len(), 2);
}
