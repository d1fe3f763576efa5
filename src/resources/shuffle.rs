//! Grouping and interleaving of resources across accounts.
//!
//! The externally visible resource sequence is produced by taking the 1st
//! resource of every account in rank order, then the 2nd, and so on. A
//! caller exhausting N resources therefore touches N different accounts
//! before repeating any account, which bounds the blast radius of one bad
//! account to one failed attempt per retry round.

use super::IngestResource;
use rand::seq::SliceRandom;
use std::collections::HashMap;

/// Group resources by account name, randomizing each account's sublist
/// order once.
pub fn group_by_account<T: IngestResource>(resources: Vec<T>) -> Vec<(String, Vec<T>)> {
    let mut by_account: HashMap<String, Vec<T>> = HashMap::new();
    for resource in resources {
        by_account
            .entry(resource.account_name().to_string())
            .or_default()
            .push(resource);
    }

    let mut grouped: Vec<(String, Vec<T>)> = by_account.into_iter().collect();
    grouped.sort_by(|a, b| a.0.cmp(&b.0));

    let mut rng = rand::thread_rng();
    for (_, sublist) in &mut grouped {
        sublist.shuffle(&mut rng);
    }
    grouped
}

/// Interleave per-account lists index-by-index.
pub fn round_robin_nested<T: Clone>(lists: &[&[T]]) -> Vec<T> {
    let longest = lists.iter().map(|l| l.len()).max().unwrap_or(0);
    let mut out = Vec::with_capacity(lists.iter().map(|l| l.len()).sum());
    for i in 0..longest {
        for list in lists {
            if let Some(item) = list.get(i) {
                out.push(item.clone());
            }
        }
    }
    out
}

/// Produce the rotation sequence for the given account rank order.
///
/// Accounts absent from `order` are skipped; accounts in `order` without
/// resources of this type contribute nothing.
pub fn interleave_by_rank<T: IngestResource + Clone>(
    by_account: &[(String, Vec<T>)],
    order: &[String],
) -> Vec<T> {
    let index: HashMap<&str, &Vec<T>> = by_account
        .iter()
        .map(|(name, list)| (name.as_str(), list))
        .collect();

    let ordered: Vec<&[T]> = order
        .iter()
        .filter_map(|name| index.get(name.as_str()))
        .filter(|list| !list.is_empty())
        .map(|list| list.as_slice())
        .collect();

    round_robin_nested(&ordered)
}
