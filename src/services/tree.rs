use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use futures_util::{future::BoxFuture, FutureExt};

use crate::models::tree::{ActivityStats, ReferralNode, TreeSummary};
use crate::repositories::{ReferralRepository, RepositoryResult};

pub const DEFAULT_MAX_DEPTH: usize = 4;
pub const DEFAULT_ACTIVITY_WINDOW_DAYS: i64 = 7;

/// Trailing window used to flag a referral as active.
#[derive(Clone, Copy, Debug)]
pub struct ActivityWindow {
    days: i64,
}

impl ActivityWindow {
    pub fn days(days: i64) -> Self {
        Self { days }
    }

    pub fn len_days(&self) -> i64 {
        self.days
    }

    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - Duration::days(self.days), now)
    }
}

impl Default for ActivityWindow {
    fn default() -> Self {
        Self::days(DEFAULT_ACTIVITY_WINDOW_DAYS)
    }
}

/// Builds the referrals below `parent_id`, down to `max_depth` levels. The
/// parent itself is not part of the result.
pub async fn build_tree(
    repository: &dyn ReferralRepository,
    parent_id: &str,
    max_depth: usize,
    active: &HashSet<String>,
) -> RepositoryResult<Vec<ReferralNode>> {
    build_level(repository, parent_id.to_string(), 1, max_depth, active).await
}

/// Builds the whole network: one node per root, each with `max_depth`
/// levels below it.
pub async fn build_forest(
    repository: &dyn ReferralRepository,
    max_depth: usize,
    active: &HashSet<String>,
) -> RepositoryResult<Vec<ReferralNode>> {
    let roots = repository.find_roots().await?;
    let mut forest = Vec::with_capacity(roots.len());

    for root in roots {
        let children =
            build_level(repository, root.referral_id.clone(), 1, max_depth, active).await?;
        forest.push(ReferralNode::new(root, children, active));
    }

    Ok(forest)
}

fn build_level<'a>(
    repository: &'a dyn ReferralRepository,
    parent_id: String,
    depth: usize,
    max_depth: usize,
    active: &'a HashSet<String>,
) -> BoxFuture<'a, RepositoryResult<Vec<ReferralNode>>> {
    async move {
        if depth > max_depth {
            return Ok(Vec::new());
        }

        let referrals = repository.find_children(&parent_id).await?;
        let mut nodes = Vec::with_capacity(referrals.len());

        for referral in referrals {
            let children = build_level(
                repository,
                referral.referral_id.clone(),
                depth + 1,
                max_depth,
                active,
            )
            .await?;
            nodes.push(ReferralNode::new(referral, children, active));
        }

        Ok(nodes)
    }
    .boxed()
}

/// Flattens a forest and counts nodes, active nodes and distinct levels.
pub fn summarize(nodes: &[ReferralNode]) -> TreeSummary {
    let mut summary = TreeSummary::default();
    let mut stack: Vec<(&ReferralNode, usize)> = nodes.iter().map(|n| (n, 0)).collect();

    while let Some((node, level)) = stack.pop() {
        summary.total += 1;
        if node.is_active {
            summary.active += 1;
        }
        summary.levels = summary.levels.max(level + 1);
        stack.extend(node.children.iter().map(|child| (child, level + 1)));
    }

    summary.inactive = summary.total - summary.active;
    summary
}

pub fn activity_of(summary: TreeSummary, window: ActivityWindow) -> ActivityStats {
    ActivityStats {
        total: summary.total,
        active: summary.active,
        inactive: summary.inactive,
        window_days: window.len_days(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::referrals::{NewReferral, Referral};
    use crate::repositories::memory::MemoryStore;

    fn referral(id: &str, parent: Option<&str>, reg_date: DateTime<Utc>) -> Referral {
        NewReferral {
            referral_id: Some(id.to_string()),
            referrer_id: parent.map(str::to_string),
            reg_date: Some(reg_date),
            ..Default::default()
        }
        .into_referral(reg_date)
        .unwrap()
    }

    /// A chain root -> l1 -> l2 -> ... -> l6 plus a second child of root.
    async fn chain_store(now: DateTime<Utc>) -> MemoryStore {
        let store = MemoryStore::new();
        let old = now - Duration::days(60);

        ReferralRepository::insert(&store, referral("root", None, old)).await.unwrap();
        ReferralRepository::insert(&store, referral("l1", Some("root"), old)).await.unwrap();
        for level in 2..=6 {
            let parent = format!("l{}", level - 1);
            ReferralRepository::insert(
                &store,
                referral(&format!("l{level}"), Some(&parent), old),
            )
            .await
            .unwrap();
        }
        ReferralRepository::insert(&store, referral("side", Some("root"), now - Duration::days(2)))
            .await
            .unwrap();

        store
    }

    fn depth(nodes: &[ReferralNode]) -> usize {
        nodes
            .iter()
            .map(|n| 1 + depth(&n.children))
            .max()
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn tree_stops_at_max_depth() {
        let now = Utc::now();
        let store = chain_store(now).await;

        let tree = build_tree(&store, "root", DEFAULT_MAX_DEPTH, &HashSet::new())
            .await
            .unwrap();

        assert_eq!(depth(&tree), 4);
        let ids: Vec<&str> = tree.iter().map(|n| n.referral.referral_id.as_str()).collect();
        assert_eq!(ids, vec!["l1", "side"]);
    }

    #[tokio::test]
    async fn descendants_are_counted_once() {
        let now = Utc::now();
        let store = chain_store(now).await;

        let tree = build_tree(&store, "root", DEFAULT_MAX_DEPTH, &HashSet::new())
            .await
            .unwrap();

        // l1 -> l2 -> l3 -> l4 is the visible part of the chain.
        let l1 = &tree[0];
        assert_eq!(l1.total_referrals, 3);
        assert_eq!(l1.children[0].total_referrals, 2);
        assert_eq!(tree[1].total_referrals, 0);
    }

    #[tokio::test]
    async fn unknown_parent_yields_empty_tree() {
        let store = MemoryStore::new();
        let tree = build_tree(&store, "nobody", DEFAULT_MAX_DEPTH, &HashSet::new())
            .await
            .unwrap();
        assert!(tree.is_empty());
    }

    #[tokio::test]
    async fn forest_includes_roots_and_flags_activity() {
        let now = Utc::now();
        let store = chain_store(now).await;
        ReferralRepository::insert(&store, referral("orphan", Some("missing"), now))
            .await
            .unwrap();

        let window = ActivityWindow::default();
        let (since, until) = window.bounds(now);
        let active = store.recently_active_parents(since, until).await.unwrap();

        let forest = build_forest(&store, DEFAULT_MAX_DEPTH, &active).await.unwrap();
        let roots: Vec<&str> = forest
            .iter()
            .map(|n| n.referral.referral_id.as_str())
            .collect();
        assert_eq!(roots, vec!["root", "orphan"]);

        let root = &forest[0];
        assert!(root.is_active);
        assert_eq!(root.total_referrals, 5);
        assert!(!forest[1].is_active);

        let summary = summarize(&forest);
        assert_eq!(
            summary,
            TreeSummary {
                total: 7,
                active: 1,
                inactive: 6,
                levels: 5,
            }
        );
    }

    #[tokio::test]
    async fn activity_flags_respect_window_edges() {
        let now = Utc::now();
        let (since, until) = ActivityWindow::default().bounds(now);
        let old = now - Duration::days(60);
        let store = MemoryStore::new();

        let cases = [
            ("edge", since),
            ("stale", since - Duration::seconds(1)),
            ("future", until + Duration::seconds(1)),
        ];
        for (parent, child_date) in cases {
            ReferralRepository::insert(&store, referral(parent, None, old)).await.unwrap();
            ReferralRepository::insert(
                &store,
                referral(&format!("{parent}-child"), Some(parent), child_date),
            )
            .await
            .unwrap();
        }

        let active = store.recently_active_parents(since, until).await.unwrap();
        let forest = build_forest(&store, DEFAULT_MAX_DEPTH, &active).await.unwrap();
        let flags: Vec<(&str, bool)> = forest
            .iter()
            .map(|n| (n.referral.referral_id.as_str(), n.is_active))
            .collect();

        assert_eq!(
            flags,
            vec![("edge", true), ("future", false), ("stale", false)]
        );
        assert_eq!(summarize(&forest).active, 1);
    }

    #[test]
    fn empty_forest_has_no_levels() {
        assert_eq!(summarize(&[]), TreeSummary::default());
    }

    #[test]
    fn window_bounds_trail_now() {
        let now = Utc::now();
        let (since, until) = ActivityWindow::days(7).bounds(now);
        assert_eq!(until, now);
        assert_eq!(until - since, Duration::days(7));
    }
}
