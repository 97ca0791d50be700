use std::collections::HashMap;

use crate::models::aggregated::{Entity, Provenance, Sourced};

/// Entities from one source, tagged with that source's priority.
/// Lower rank wins on collision.
#[derive(Debug, Clone)]
pub struct RankedBatch<T> {
    pub rank: usize,
    pub items: Vec<Sourced<T>>,
}

impl<T> RankedBatch<T> {
    pub fn new(rank: usize, items: Vec<Sourced<T>>) -> Self {
        Self { rank, items }
    }

    /// All items from one provider.
    pub fn from_provider(rank: usize, provider: &str, items: Vec<T>) -> Self {
        Self::new(
            rank,
            items
                .into_iter()
                .map(|item| Sourced::from_provider(item, provider))
                .collect(),
        )
    }
}

/// Merge batches into one deduplicated, canonically ordered collection.
///
/// On an identity collision the lower-rank item wins, whatever the batch
/// order; equal ranks keep the earlier batch. The loser is folded into the
/// winner through [`Entity::absorb`]. `limit` truncates after sorting.
pub fn merge<T: Entity>(batches: Vec<RankedBatch<T>>, limit: Option<usize>) -> Vec<Sourced<T>> {
    let mut slots: Vec<(usize, Sourced<T>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for batch in batches {
        for incoming in batch.items {
            let key = incoming.item.identity();
            match index.get(&key) {
                None => {
                    index.insert(key, slots.len());
                    slots.push((batch.rank, incoming));
                }
                Some(&slot) => {
                    let (rank, kept) = &mut slots[slot];
                    if batch.rank < *rank {
                        let mut winner = incoming;
                        winner.item.absorb(&kept.item);
                        *kept = winner;
                        *rank = batch.rank;
                    } else {
                        kept.item.absorb(&incoming.item);
                    }
                }
            }
        }
    }

    let mut merged: Vec<Sourced<T>> = slots.into_iter().map(|(_, s)| s).collect();
    merged.sort_by(|a, b| a.item.canonical_cmp(&b.item));
    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    merged
}

/// Rank of a provenance within a priority list; placeholders rank last.
pub fn rank_of(source: &Provenance, priority: &[String]) -> usize {
    source
        .provider()
        .and_then(|id| priority.iter().position(|p| p == id))
        .unwrap_or(priority.len())
}
