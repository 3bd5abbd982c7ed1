//! Candidate ranking
//!
//! Candidates are ordered by priority (desc), health score (desc), failure
//! count (asc) and finally node id, so every node ranking the same view
//! picks the same winner.

use super::node::{FailoverNode, NodeRole};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::cmp::Ordering;

fn rank(a: &FailoverNode, b: &FailoverNode) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| {
            b.health_score
                .partial_cmp(&a.health_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.failure_count.cmp(&b.failure_count))
        .then_with(|| a.id.cmp(&b.id))
}

/// Sort `nodes` best first
pub fn rank_candidates(nodes: &mut [FailoverNode]) {
    nodes.sort_by(rank);
}

/// Healthy PRIMARY or SECONDARY nodes, best first
pub fn eligible_candidates<'a, I>(
    nodes: I,
    now: DateTime<Utc>,
    liveness: ChronoDuration,
    threshold: f64,
) -> Vec<FailoverNode>
where
    I: IntoIterator<Item = &'a FailoverNode>,
{
    let mut candidates: Vec<FailoverNode> = nodes
        .into_iter()
        .filter(|n| matches!(n.role, NodeRole::Primary | NodeRole::Secondary))
        .filter(|n| n.is_healthy_at(now, liveness, threshold))
        .cloned()
        .collect();
    rank_candidates(&mut candidates);
    candidates
}

/// Winner of an election over `nodes`, or `None` without an eligible node
pub fn conduct_election<'a, I>(
    nodes: I,
    now: DateTime<Utc>,
    liveness: ChronoDuration,
    threshold: f64,
) -> Option<FailoverNode>
where
    I: IntoIterator<Item = &'a FailoverNode>,
{
    eligible_candidates(nodes, now, liveness, threshold)
        .into_iter()
        .next()
}

/// Best healthy SECONDARY other than `exclude`, same ordering as elections
pub fn best_secondary<'a, I>(
    nodes: I,
    exclude: &str,
    now: DateTime<Utc>,
    liveness: ChronoDuration,
    threshold: f64,
) -> Option<FailoverNode>
where
    I: IntoIterator<Item = &'a FailoverNode>,
{
    nodes
        .into_iter()
        .filter(|n| n.id != exclude && n.role == NodeRole::Secondary)
        .filter(|n| n.is_healthy_at(now, liveness, threshold))
        .min_by(|a, b| rank(a, b))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, role: NodeRole, priority: i32, score: f64) -> FailoverNode {
        let mut node = FailoverNode::new(id, role, "10.0.0.1", 8080).with_priority(priority);
        node.health_score = score;
        node
    }

    fn window() -> ChronoDuration {
        ChronoDuration::seconds(30)
    }

    #[test]
    fn test_winner_independent_of_order() {
        let nodes = vec![
            node("a", NodeRole::Secondary, 3, 90.0),
            node("b", NodeRole::Secondary, 7, 80.0),
            node("c", NodeRole::Primary, 5, 100.0),
        ];
        let now = Utc::now();

        let forward = conduct_election(&nodes, now, window(), 50.0).unwrap();
        let reversed: Vec<_> = nodes.iter().rev().cloned().collect();
        let backward = conduct_election(&reversed, now, window(), 50.0).unwrap();
        assert_eq!(forward.id, "b");
        assert_eq!(backward.id, "b");
    }

    #[test]
    fn test_unhealthy_top_priority_loses() {
        let nodes = vec![
            node("top", NodeRole::Secondary, 100, 49.0),
            node("ok", NodeRole::Secondary, 1, 60.0),
        ];
        let winner = conduct_election(&nodes, Utc::now(), window(), 50.0).unwrap();
        assert_eq!(winner.id, "ok");
    }

    #[test]
    fn test_witness_and_stale_excluded() {
        let now = Utc::now();
        let mut stale = node("stale", NodeRole::Secondary, 9, 100.0);
        stale.last_heartbeat = now - ChronoDuration::seconds(45);
        let nodes = vec![stale, node("w", NodeRole::Witness, 10, 100.0)];
        assert!(conduct_election(&nodes, now, window(), 50.0).is_none());
    }

    #[test]
    fn test_tie_breakers() {
        let mut flaky = node("flaky", NodeRole::Secondary, 5, 80.0);
        flaky.failure_count = 3;
        let steady = node("steady", NodeRole::Secondary, 5, 80.0);
        let healthier = node("z-healthier", NodeRole::Secondary, 5, 95.0);

        let mut ranked = vec![flaky, steady, healthier];
        rank_candidates(&mut ranked);
        let ids: Vec<_> = ranked.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["z-healthier", "steady", "flaky"]);
    }

    #[test]
    fn test_best_secondary_skips_primary_and_self() {
        let nodes = vec![
            node("x", NodeRole::Primary, 10, 100.0),
            node("y", NodeRole::Secondary, 5, 100.0),
            node("z", NodeRole::Secondary, 1, 100.0),
        ];
        let now = Utc::now();
        assert_eq!(best_secondary(&nodes, "x", now, window(), 50.0).unwrap().id, "y");
        assert_eq!(best_secondary(&nodes, "y", now, window(), 50.0).unwrap().id, "z");
    }
}
