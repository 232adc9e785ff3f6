use super::NodeState;
use girder_types::NodeStatus;

/// Orders nodes the way every pass walks them. The rollout depends on
/// deterministic iteration, so callers sort at the boundary.
pub fn sort_nodes(nodes: &mut [NodeStatus]) {
    nodes.sort_by(|a, b| a.node_name.cmp(&b.node_name));
}

/// Picks the next `(node_index, revision)` to install, or `None` when the
/// cluster is settled or an installation is already in flight.
///
/// The plan is one-at-a-time and forward-only: the first node chases
/// `latest_available`, every later node chases its predecessor's current
/// revision, and a node never retries a revision that already failed on it.
pub fn plan_rollout(nodes: &[NodeStatus], latest_available: i64) -> Option<(usize, i64)> {
    if nodes
        .iter()
        .any(|n| !NodeState::of(n).settled())
    {
        return None;
    }

    for (index, node) in nodes.iter().enumerate() {
        if index == 0 {
            if latest_available != 0
                && node.current_revision != latest_available
                && node.last_failed_revision != latest_available
            {
                return Some((0, latest_available));
            }
        } else {
            let previous = &nodes[index - 1];
            if previous.current_revision > node.current_revision
                && node.last_failed_revision != previous.current_revision
            {
                return Some((index, previous.current_revision));
            }
        }
    }
    None
}
