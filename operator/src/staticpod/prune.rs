use girder_types::OperatorStatus;
use std::collections::BTreeSet;

pub const DEFAULT_FAILED_REVISION_LIMIT: i64 = 5;
pub const DEFAULT_SUCCEEDED_REVISION_LIMIT: i64 = 5;

/// Approximates the set of revisions that must stay on disk:
/// `latestAvailableRevision` with the `max(failed, succeeded) - 1` revisions
/// below it, plus per node a window below `current` (succeeded limit),
/// `target` (max of both) and `lastFailed` (failed limit).
///
/// `None` means pruning is disabled because a limit is unknown (`-1`).
pub fn revisions_to_keep(
    status: &OperatorStatus,
    failed_limit: i64,
    succeeded_limit: i64,
) -> Option<BTreeSet<i64>> {
    if failed_limit == -1 || succeeded_limit == -1 {
        return None;
    }
    let failed = failed_limit.max(0);
    let succeeded = succeeded_limit.max(0);
    let widest = failed.max(succeeded);

    let mut keep = BTreeSet::new();
    let mut keep_window = |top: i64, count: i64| {
        for revision in (top - count + 1)..=top {
            if revision >= 1 {
                keep.insert(revision);
            }
        }
    };

    keep_window(status.latest_available_revision, widest);
    for node in &status.node_statuses {
        keep_window(node.current_revision, succeeded);
        keep_window(node.target_revision, widest);
        keep_window(node.last_failed_revision, failed);
    }
    Some(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use girder_types::NodeStatus;

    fn status(latest: i64, nodes: Vec<(i64, i64, i64)>) -> OperatorStatus {
        OperatorStatus {
            latest_available_revision: latest,
            node_statuses: nodes
                .into_iter()
                .enumerate()
                .map(|(i, (current, target, failed))| NodeStatus {
                    node_name: format!("master-{i}"),
                    current_revision: current,
                    target_revision: target,
                    last_failed_revision: failed,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_limit_disables_pruning() {
        let s = status(9, vec![(9, 0, 0)]);
        assert!(revisions_to_keep(&s, -1, 5).is_none());
        assert!(revisions_to_keep(&s, 5, -1).is_none());
    }

    #[test]
    fn default_limits_keep_a_window_below_latest() {
        let s = status(10, vec![]);
        let keep = revisions_to_keep(&s, 5, 5).unwrap();
        assert_eq!(keep, (6..=10).collect());
    }

    #[test]
    fn windows_never_reach_below_revision_one() {
        let s = status(2, vec![(1, 0, 0)]);
        let keep = revisions_to_keep(&s, 5, 5).unwrap();
        assert_eq!(keep, [1, 2].into_iter().collect());
    }

    #[test]
    fn node_windows_extend_the_kept_set() {
        // latest window keeps {10}, node current keeps {6}, failed keeps {8}.
        let s = status(10, vec![(6, 0, 8)]);
        let keep = revisions_to_keep(&s, 1, 1).unwrap();
        assert_eq!(keep, [6, 8, 10].into_iter().collect());
    }

    #[test]
    fn target_window_uses_the_wider_limit() {
        let s = status(10, vec![(0, 9, 0)]);
        let keep = revisions_to_keep(&s, 1, 3).unwrap();
        // latest window: {8,9,10}; target window (widest=3): {7,8,9}.
        assert_eq!(keep, [7, 8, 9, 10].into_iter().collect());
    }
}
