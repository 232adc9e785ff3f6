use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::ResourceExt;

/// Human-readable per-pod phrases for the Degraded message. A single restart
/// is tolerated as normal (certificate reload); two or more count as
/// crashlooping.
pub fn pod_status_phrases(pods: &[Pod]) -> Vec<String> {
    let mut phrases = Vec::new();
    for pod in pods {
        let name = pod.name_any();
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let statuses: &[ContainerStatus] = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or(&[]);

        let mut crashed = 0;
        let mut waiting = 0;
        let mut crashlooping = 0;
        let mut not_ready = 0;
        for cs in statuses {
            if container_crashed(cs) {
                crashed += 1;
            } else if container_waiting(cs) {
                waiting += 1;
            } else if cs.restart_count > 1 {
                crashlooping += 1;
            } else if !cs.ready {
                not_ready += 1;
            }
        }

        if crashed > 0 {
            phrases.push(format!("{crashed} container(s) crashed in {name}"));
        }
        if waiting > 0 {
            phrases.push(format!("{waiting} container(s) waiting in {phase} {name}"));
        }
        if crashlooping > 0 {
            phrases.push(format!(
                "{crashlooping} crashlooping container(s) in {phase} {name}"
            ));
        }
        if not_ready > 0 {
            phrases.push(format!("{not_ready} container(s) not ready in {phase} {name}"));
        }
    }
    phrases
}

fn container_crashed(cs: &ContainerStatus) -> bool {
    cs.state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .is_some_and(|t| t.exit_code != 0)
}

fn container_waiting(cs: &ContainerStatus) -> bool {
    cs.state.as_ref().is_some_and(|s| s.waiting.is_some())
}
