//! The dependency graph over version numbers, and jumping between them.
//!
//! A file update feed `F` has `minv(F)`, the version number of its first
//! update blob (recorded in its `updfile` packet), and `L(F) = length(F) -
//! 3` blobs appended after the `ischild`/`updfile`/`mkchild` trio — so `F`
//! owns the contiguous version range `[minv(F), minv(F) + L(F) - 1]`, and
//! the blob for version `v` sits at feed sequence `v - minv(F) + 4`.
//! Emergency rotation chains feeds together (each a parent of the next),
//! each owning a disjoint range, so the full graph is built by walking the
//! parent chain from the current file feed back to the root.

use std::collections::{HashMap, VecDeque};

use crate::error::{FeedError, Result};
use crate::packet::PacketType;
use crate::store::{Feed, FeedStore};
use crate::version_manager::diff::{self, ChangeRecord};

pub type VersionGraph = HashMap<u32, Vec<u32>>;
pub type AccessDict = HashMap<u32, ([u8; 32], u32)>;

/// Sequence number of the update blob for `version`, within the feed that
/// owns it (`minv` is that feed's base version).
fn seq_for_version(version: u32, minv: u32) -> i64 {
    (version - minv) as i64 + 4
}

/// `true` if `feed` carries the `ischild`/`updfile` genesis pair of a file
/// update feed. Distinguishes a rotated-in predecessor from the plain
/// update feed a chain's oldest incarnation is anchored to.
fn is_file_feed(store: &FeedStore, feed: &Feed) -> bool {
    feed.length() >= 2
        && matches!(store.get_type(feed, 1), Ok(PacketType::IsChild))
        && matches!(store.get_type(feed, 2), Ok(PacketType::UpdFile))
}

/// Walk `feed` and its ancestors (via `parent`), collecting which feed owns
/// each version and the undirected dependency graph linking every version
/// to the version its update blob names as a dependency. The walk follows
/// emergency-rotation predecessors only — it stops at the first ancestor
/// that is not itself a file feed, which is the plain update feed every
/// chain is ultimately anchored to. Returns the graph, the access map, and
/// the highest version observed.
pub fn extract_version_graph(store: &FeedStore, feed: &Feed) -> Result<(VersionGraph, AccessDict, u32)> {
    let mut access_dict: AccessDict = HashMap::new();
    let mut max_version: i64 = -1;
    let mut current = feed.clone();

    loop {
        let (_, minv) = store.read_updfile(&current, 2)?;
        let l = current.length() as i64 - 3;
        if l > 0 {
            let maxv = minv as i64 + l - 1;
            max_version = max_version.max(maxv);
            for v in minv as i64..=maxv {
                access_dict.insert(v as u32, (current.fid(), minv));
            }
        }

        let Some(parent_fid) = store.parent(&current)? else { break };
        let parent_feed = store.open_feed(&parent_fid)?;
        if !is_file_feed(store, &parent_feed) {
            break;
        }
        current = parent_feed;
    }

    let max_version = if max_version < 0 { 0 } else { max_version as u32 };

    let mut graph: VersionGraph = HashMap::new();
    for v in 1..=max_version {
        let Some((fid, minv)) = access_dict.get(&v) else {
            continue;
        };
        let owning_feed = store.open_feed(fid)?;
        let seq = seq_for_version(v, *minv);
        let payload = store.get_payload(&owning_feed, seq)?;
        if payload.len() < 4 {
            return Err(FeedError::Malformed(format!("update blob for version {v} missing dependency header")));
        }
        let dep_on = u32::from_be_bytes(payload[..4].try_into().unwrap());

        graph.entry(v).or_default().push(dep_on);
        graph.entry(dep_on).or_default().push(v);
    }

    Ok((graph, access_dict, max_version))
}

fn bfs(graph: &VersionGraph, start: u32, end: u32) -> Option<Vec<u32>> {
    let mut visited = std::collections::HashSet::new();
    visited.insert(start);
    let mut queue = VecDeque::new();
    queue.push_back(vec![start]);

    while let Some(path) = queue.pop_front() {
        let current = *path.last().expect("path is never empty");
        if current == end {
            return Some(path);
        }
        if let Some(neighbors) = graph.get(&current) {
            for &n in neighbors {
                if visited.insert(n) {
                    let mut next = path.clone();
                    next.push(n);
                    queue.push_back(next);
                }
            }
        }
    }
    None
}

fn mono_inc(path: &[u32]) -> bool {
    path.windows(2).all(|w| w[0] < w[1])
}

fn mono_dec(path: &[u32]) -> bool {
    path.windows(2).all(|w| w[0] > w[1])
}

/// Longest prefix of `path` for which every suffix starting there is not
/// monotonically increasing.
fn takewhile_not_mono_inc(path: &[u32]) -> usize {
    let mut count = 0;
    for i in 0..path.len() {
        if mono_inc(&path[i..]) {
            break;
        }
        count += 1;
    }
    count
}

/// Compute the change list that takes the file owned by `feed` from
/// `start` to `end`, by shortest path over the version dependency graph.
pub fn jump_versions(store: &FeedStore, feed: &Feed, start: u32, end: u32) -> Result<Vec<ChangeRecord>> {
    if start == end {
        return Ok(Vec::new());
    }

    let (graph, access_dict, max_version) = extract_version_graph(store, feed)?;

    if start > max_version || end > max_version {
        return Err(FeedError::UnknownVersion { version: start.max(end) });
    }

    let path = bfs(&graph, start, end).ok_or(FeedError::UnknownVersion { version: end })?;

    let step_changes = |step: u32| -> Result<Vec<ChangeRecord>> {
        let (fid, minv) = access_dict
            .get(&step)
            .ok_or(FeedError::UnknownVersion { version: step })?;
        let owning_feed = store.open_feed(fid)?;
        let seq = seq_for_version(step, *minv);
        let payload = store.get_payload(&owning_feed, seq)?;
        let (changes, _dep) = diff::decode_changes(&payload)?;
        Ok(changes)
    };

    let mut all_changes = Vec::new();

    if mono_inc(&path) {
        for &step in &path[1..] {
            all_changes.extend(step_changes(step)?);
        }
    } else if mono_dec(&path) {
        for &step in &path[..path.len() - 1] {
            all_changes.extend(diff::reverse_changes(&step_changes(step)?));
        }
    } else {
        let split = takewhile_not_mono_inc(&path);
        let first_half = &path[..split];
        let second_half = &path[split + 1..];

        for &step in first_half {
            all_changes.extend(diff::reverse_changes(&step_changes(step)?));
        }
        for &step in second_half {
            all_changes.extend(step_changes(step)?);
        }
    }

    Ok(all_changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// Shortest distance from `start` to every reachable node, computed by
    /// expanding frontier level-sets rather than `bfs`'s path-queue — an
    /// independent check that `bfs` returns a minimal-length path.
    fn distances_from(graph: &VersionGraph, start: u32) -> HashMap<u32, usize> {
        let mut dist = HashMap::new();
        dist.insert(start, 0);
        let mut frontier: HashSet<u32> = [start].into_iter().collect();
        let mut level = 0;
        while !frontier.is_empty() {
            let mut next = HashSet::new();
            for &node in &frontier {
                if let Some(neighbors) = graph.get(&node) {
                    for &n in neighbors {
                        if !dist.contains_key(&n) {
                            next.insert(n);
                        }
                    }
                }
            }
            level += 1;
            for &n in &next {
                dist.insert(n, level);
            }
            frontier = next;
        }
        dist
    }

    fn random_graph_strategy() -> impl Strategy<Value = VersionGraph> {
        proptest::collection::vec((0u32..8, 0u32..8), 4..20).prop_map(|edges| {
            let mut graph: VersionGraph = HashMap::new();
            for (a, b) in edges {
                if a == b {
                    continue;
                }
                let a_neighbors = graph.entry(a).or_default();
                if !a_neighbors.contains(&b) {
                    a_neighbors.push(b);
                }
                let b_neighbors = graph.entry(b).or_default();
                if !b_neighbors.contains(&a) {
                    b_neighbors.push(a);
                }
            }
            graph
        })
    }

    proptest! {
        #[test]
        fn bfs_returns_a_shortest_path(graph in random_graph_strategy(), start in 0u32..8, end in 0u32..8) {
            let dist = distances_from(&graph, start);
            let Some(&expected_len) = dist.get(&end) else {
                prop_assert!(bfs(&graph, start, end).is_none());
                return Ok(());
            };

            let path = bfs(&graph, start, end).expect("end is reachable from start");
            prop_assert_eq!(path.first().copied(), Some(start));
            prop_assert_eq!(path.last().copied(), Some(end));
            prop_assert_eq!(path.len(), expected_len + 1);

            for window in path.windows(2) {
                prop_assert!(graph.get(&window[0]).is_some_and(|ns| ns.contains(&window[1])));
            }
        }
    }

    #[test]
    fn bfs_finds_shortest_path_in_linear_graph() {
        let mut graph: VersionGraph = HashMap::new();
        graph.insert(0, vec![1]);
        graph.insert(1, vec![0, 2]);
        graph.insert(2, vec![1, 3]);
        graph.insert(3, vec![2]);

        let path = bfs(&graph, 0, 3).unwrap();
        assert_eq!(path, vec![0, 1, 2, 3]);
    }

    #[test]
    fn bfs_prefers_shortcut_over_chain() {
        let mut graph: VersionGraph = HashMap::new();
        graph.insert(0, vec![1, 3]);
        graph.insert(1, vec![0, 2]);
        graph.insert(2, vec![1, 3]);
        graph.insert(3, vec![2, 0]);

        let path = bfs(&graph, 0, 3).unwrap();
        assert_eq!(path, vec![0, 3]);
    }

    #[test]
    fn classification_helpers() {
        assert!(mono_inc(&[1, 2, 3, 4]));
        assert!(!mono_inc(&[1, 2, 1]));
        assert!(mono_dec(&[4, 3, 2, 1]));
        assert!(!mono_dec(&[4, 3, 3]));
    }

    #[test]
    fn takewhile_splits_mixed_path_at_crossover() {
        let path = vec![2u32, 1, 3, 4];
        let split = takewhile_not_mono_inc(&path);
        assert_eq!(split, 1);
        assert_eq!(&path[split + 1..], &[3, 4]);
    }
}
