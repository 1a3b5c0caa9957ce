//! Property tests for in-memory vector store search ordering.

use std::collections::HashMap;

use proptest::prelude::*;
use raggpt_rag::document::{Chunk, EmbeddingVector};
use raggpt_rag::inmemory::InMemoryVectorStore;
use raggpt_rag::vectorstore::VectorStore;

const MODEL: &str = "prop-model";

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-3 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

/// Generate a chunk paired with a normalized embedding.
fn arb_entry(dim: usize) -> impl Strategy<Value = (Chunk, EmbeddingVector)> {
    ("[a-z]{3,8}", 0usize..4, "[a-z ]{5,30}", arb_normalized_embedding(dim)).prop_map(
        |(document, index, text, values)| {
            let chunk = Chunk {
                id: format!("{document}#{index}"),
                document,
                index,
                end: text.chars().count(),
                text,
                start: 0,
                page: None,
            };
            (chunk, EmbeddingVector::new(MODEL, values))
        },
    )
}

fn dedup_by_id(entries: Vec<(Chunk, EmbeddingVector)>) -> Vec<(Chunk, EmbeddingVector)> {
    let mut deduped: HashMap<String, (Chunk, EmbeddingVector)> = HashMap::new();
    for entry in entries {
        deduped.entry(entry.0.id.clone()).or_insert(entry);
    }
    deduped.into_values().collect()
}

/// For any set of stored entries, search returns results ordered by descending
/// cosine similarity, at most `min(k, stored)` of them.
mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_k(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, unique_count) = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                let unique = dedup_by_id(entries);
                let count = unique.len();
                store.upsert("test", unique).await.unwrap();
                let results =
                    store.search("test", &EmbeddingVector::new(MODEL, query), k).await.unwrap();
                (results, count)
            });

            prop_assert_eq!(results.len(), k.min(unique_count));
            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }

        #[test]
        fn stored_vector_ranks_first_with_perfect_score(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
            pick in any::<prop::sample::Index>(),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let unique = dedup_by_id(entries);
            let (target_chunk, target_vector) = unique[pick.index(unique.len())].clone();

            let total = unique.len();
            let results = rt.block_on(async {
                let store = InMemoryVectorStore::new();
                store.upsert("test", unique).await.unwrap();
                store.search("test", &target_vector, total).await.unwrap()
            });

            // Ranked first up to ties with an identical stored vector.
            let target = results.iter().find(|r| r.chunk.id == target_chunk.id).unwrap();
            prop_assert!((target.score - 1.0).abs() < 1e-4);
            prop_assert!(target.score >= results[0].score - 1e-4);
        }
    }
}
