// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Count-ranked summary of traffic by source address.

use std::collections::HashMap;

use crate::geo::GeoResolver;
use crate::models::{LogEntry, RankEntry};

/// Count entries per source address, in first-seen order.
pub fn count_by_address(history: &[LogEntry]) -> Vec<(String, usize)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut counts: Vec<(String, usize)> = Vec::new();

    for entry in history {
        match index.get(entry.source_address.as_str()) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(&entry.source_address, counts.len());
                counts.push((entry.source_address.clone(), 1));
            }
        }
    }

    counts
}

/// Rank addresses by descending count, labelling each once through `resolver`.
///
/// Equal counts keep first-seen order.
pub async fn aggregate(history: &[LogEntry], resolver: &GeoResolver) -> Vec<RankEntry> {
    let mut rank = Vec::new();
    for (address, count) in count_by_address(history) {
        let location = resolver.resolve(&address).await.to_string();
        rank.push(RankEntry {
            address,
            count,
            location,
        });
    }
    rank.sort_by(|a, b| b.count.cmp(&a.count));
    rank
}
