//! Semantic request partitioning
//!
//! Each optimizable request is embedded and routed to the nearest of the
//! skill's K centroids by cosine similarity. Centroids are seeded once, at
//! skill creation or reset, and never move online; the bandit owns
//! everything that happens inside a partition.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use skillopt_core::{InvocationRequest, Partition, Skill};

use crate::engine::EngineCtx;

/// Compute cosine similarity between two vectors
///
/// Returns a value between -1 and 1; mismatched or empty inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Seed K centroids on the unit d-sphere, deterministically per skill.
///
/// For `K <= d` the centroids are the vertices of a regular simplex built
/// from the first K standard basis vectors (pairwise similarity
/// `-1/(K-1)`), padded to dimension d. Larger K falls back to random unit
/// vectors from an RNG seeded with the skill id, so results reproduce
/// across runs and processes.
pub fn seeded_centroids(skill_id: &str, k: usize, d: usize) -> Vec<Vec<f32>> {
    assert!(k >= 1 && d >= 1, "centroids need k >= 1 and d >= 1");

    if k == 1 {
        let mut centroid = vec![0.0; d];
        centroid[0] = 1.0;
        return vec![centroid];
    }

    if k <= d {
        // Regular simplex over the first k coordinates: basis vectors
        // shifted off their common centroid and normalized.
        let shift = 1.0 / k as f32;
        let norm = ((k as f32 - 1.0) / k as f32).sqrt();
        return (0..k)
            .map(|i| {
                let mut centroid = vec![0.0; d];
                for (j, value) in centroid.iter_mut().enumerate().take(k) {
                    let coord = if i == j { 1.0 - shift } else { -shift };
                    *value = coord / norm;
                }
                centroid
            })
            .collect();
    }

    let mut hasher = DefaultHasher::new();
    skill_id.hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());

    (0..k)
        .map(|_| {
            let mut centroid: Vec<f32> = (0..d).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let norm: f32 = centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for value in &mut centroid {
                    *value /= norm;
                }
            } else {
                centroid[0] = 1.0;
            }
            centroid
        })
        .collect()
}

/// Nearest partition to an embedding by cosine similarity, ties to the
/// lowest partition index. Partitions must be ordered by index.
pub fn nearest_partition<'a>(
    partitions: &'a [Partition],
    embedding: &[f32],
) -> Option<&'a Partition> {
    partitions.iter().reduce(|best, partition| {
        let best_sim = cosine_similarity(&best.centroid, embedding);
        let sim = cosine_similarity(&partition.centroid, embedding);
        if sim > best_sim {
            partition
        } else {
            best
        }
    })
}

/// Route a request to one of the skill's partitions.
///
/// Embeds the request fingerprint and returns the nearest centroid. Every
/// degraded case — no embedding model configured, a single partition,
/// embedding timeout or error, a dimension mismatch — routes to the first
/// partition rather than failing the call.
pub(crate) async fn partition_for<'a>(
    ctx: &EngineCtx,
    skill: &Skill,
    request: &InvocationRequest,
    partitions: &'a [Partition],
) -> &'a Partition {
    let first = &partitions[0];

    let Some(model) = skill.embedding_model.as_deref() else {
        return first;
    };
    if partitions.len() == 1 {
        return first;
    }

    let fingerprint = request.fingerprint();
    let embedding = match ctx
        .llm
        .embed(&fingerprint, model, ctx.config.embed_timeout())
        .await
    {
        Ok(embedding) => embedding,
        Err(error) => {
            warn!(skill_id = %skill.id, %error, "embedding failed; routing to first partition");
            return first;
        }
    };

    if embedding.len() != skill.embedding_dimensions {
        warn!(
            skill_id = %skill.id,
            expected = skill.embedding_dimensions,
            actual = embedding.len(),
            "embedding dimension mismatch; routing to first partition"
        );
        return first;
    }

    let partition = nearest_partition(partitions, &embedding).unwrap_or(first);
    debug!(skill_id = %skill.id, partition = partition.index, "request partitioned");
    partition
}
