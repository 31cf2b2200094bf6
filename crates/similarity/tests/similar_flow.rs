use pretty_assertions::assert_eq;
use sonance_embeddings::{Embedding, EmbeddingProvider, ProviderConfig, StubProvider};
use sonance_similarity::{
    similar_to_item, similar_to_item_scored, similar_to_many, similar_to_many_scored,
};
use sonance_store::{Metric, ProviderRegistry, Store, StoreConfig};
use tempfile::TempDir;

fn stub_config(metric: Metric) -> StoreConfig {
    StoreConfig {
        metric,
        provider: "stub".to_string(),
        ..StoreConfig::default()
    }
}

fn tensor(rows: Vec<Vec<f32>>) -> Embedding {
    let width = rows[0].len();
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Embedding::from_shape_vec((rows.len(), width), flat).expect("rectangular")
}

fn tiny_stub(_config: &ProviderConfig) -> sonance_embeddings::Result<Box<dyn EmbeddingProvider>> {
    Ok(Box::new(StubProvider::with_vector_length(2)))
}

/// V=2 store so query vectors are easy to reason about by hand.
fn tiny_store(dir: &TempDir, metric: Metric) -> Store {
    let mut registry = ProviderRegistry::new();
    registry.register("stub", tiny_stub);
    Store::open_with_registry(dir.path(), stub_config(metric), &registry).unwrap()
}

#[test]
fn identical_items_are_each_others_nearest_neighbors() {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(dir.path(), stub_config(Metric::Cosine)).unwrap();

    let ones = Embedding::from_elem((3, 8), 1.0);
    store.add_embedding(1, ones.clone(), false).unwrap();
    store.add_embedding(2, ones, false).unwrap();

    // Self-matches are not excluded; with equal scores insertion order wins,
    // so the seed leads its own result list.
    assert_eq!(similar_to_item(&store, 1, 1).unwrap(), vec![1]);
    assert_eq!(similar_to_item(&store, 1, 2).unwrap(), vec![1, 2]);

    let scored = similar_to_item_scored(&store, 1, 2).unwrap();
    assert!((scored[0].1 - 1.0).abs() < 1e-6);
    assert!((scored[1].1 - 1.0).abs() < 1e-6);
}

#[test]
fn querying_an_empty_store_is_an_explicit_empty_outcome() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path(), stub_config(Metric::Cosine)).unwrap();

    assert!(similar_to_item(&store, 1, 10).unwrap().is_empty());
    assert!(similar_to_many(&store, &[1, 2, 3], 10).unwrap().is_empty());
    assert!(similar_to_many(&store, &[], 10).unwrap().is_empty());
}

#[test]
fn seeds_without_embeddings_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(dir.path(), stub_config(Metric::Cosine)).unwrap();
    store
        .add_embedding(1, Embedding::from_elem((2, 8), 1.0), false)
        .unwrap();

    let hits = similar_to_many(&store, &[1, 99], 5).unwrap();
    assert_eq!(hits, vec![1]);
}

#[test]
fn cross_item_mean_is_taken_after_per_item_pooling() {
    let dir = TempDir::new().unwrap();
    let mut store = tiny_store(&dir, Metric::Cosine);

    // Seeds with different segment counts: pooling first gives
    // a = (1, 0) and b = (0, 1), so the query direction is (√2/2, √2/2).
    // Pooling all four raw segments together would instead give
    // (0.25, 0.75), whose nearest candidate is item 4, not item 3.
    store
        .add_embedding(1, tensor(vec![vec![1.0, 0.0]]), false)
        .unwrap();
    store
        .add_embedding(
            2,
            tensor(vec![vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0, 1.0]]),
            false,
        )
        .unwrap();
    store
        .add_embedding(3, tensor(vec![vec![1.0, 1.0]]), false)
        .unwrap();
    store
        .add_embedding(4, tensor(vec![vec![1.0, 3.0]]), false)
        .unwrap();

    assert_eq!(similar_to_many(&store, &[1, 2], 1).unwrap(), vec![3]);
}

#[test]
fn multi_seed_scores_come_back_in_index_order() {
    let dir = TempDir::new().unwrap();
    let mut store = tiny_store(&dir, Metric::Cosine);
    store
        .add_embedding(1, tensor(vec![vec![1.0, 0.0]]), false)
        .unwrap();
    store
        .add_embedding(2, tensor(vec![vec![0.0, 1.0]]), false)
        .unwrap();
    store
        .add_embedding(3, tensor(vec![vec![1.0, 1.0]]), false)
        .unwrap();

    let scored = similar_to_many_scored(&store, &[1, 2], 3).unwrap();
    assert_eq!(scored.len(), 3);
    assert_eq!(scored[0].0, 3);
    // Descending similarity under cosine.
    assert!(scored[0].1 >= scored[1].1 && scored[1].1 >= scored[2].1);
}

#[test]
fn l2_results_come_back_in_ascending_distance_order() {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(dir.path(), stub_config(Metric::L2)).unwrap();

    store
        .add_embedding(1, Embedding::from_elem((1, 8), 0.0), false)
        .unwrap();
    store
        .add_embedding(2, Embedding::from_elem((1, 8), 2.0), false)
        .unwrap();

    let scored = similar_to_item_scored(&store, 1, 2).unwrap();
    assert_eq!(scored[0].0, 1);
    assert!((scored[0].1 - 0.0).abs() < 1e-6);
    assert_eq!(scored[1].0, 2);
    // Squared distance: 8 dimensions × 2².
    assert!((scored[1].1 - 32.0).abs() < 1e-4);
}

#[test]
fn unknown_single_seed_yields_empty_not_error() {
    let dir = TempDir::new().unwrap();
    let mut store = Store::open(dir.path(), stub_config(Metric::Cosine)).unwrap();
    store
        .add_embedding(1, Embedding::from_elem((1, 8), 1.0), false)
        .unwrap();

    assert!(similar_to_item(&store, 42, 5).unwrap().is_empty());
}
