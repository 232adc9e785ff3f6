use crate::installer::ResourceSource;
use crate::util::Error;
use k8s_openapi::api::core::v1::Pod;

/// Embedded single-shot installer pod. Placeholders are substituted before
/// parsing; the args list is rendered as a JSON array, which is valid YAML.
const INSTALLER_POD_TEMPLATE: &str = r#"apiVersion: v1
kind: Pod
metadata:
  name: installer-{{revision}}-{{node_name}}
  namespace: {{namespace}}
  labels:
    app: installer
    girder.io/revision: "{{revision}}"
spec:
  serviceAccountName: installer-sa
  nodeName: {{node_name}}
  restartPolicy: Never
  priorityClassName: system-node-critical
  tolerations:
    - operator: Exists
  containers:
    - name: installer
      image: {{image}}
      imagePullPolicy: {{pull_policy}}
      command: ["girder-agent", "installer"]
      args: {{args}}
      securityContext:
        privileged: true
        runAsUser: 0
      resources:
        requests:
          cpu: 150m
          memory: 200Mi
      volumeMounts:
        - mountPath: /etc/kubernetes/
          name: kubelet-dir
  volumes:
    - name: kubelet-dir
      hostPath:
        path: /etc/kubernetes/
"#;

pub struct InstallerPodParams<'a> {
    pub revision: i64,
    pub namespace: &'a str,
    pub node_name: &'a str,
    pub image: &'a str,
    pub pull_policy: &'a str,
    pub pod_manifest_name: &'a str,
    pub resource_dir: &'a str,
    pub pod_manifest_dir: &'a str,
    /// The first element is the pod-manifest configmap.
    pub configmaps: &'a [ResourceSource],
    pub secrets: &'a [ResourceSource],
}

/// Renders the installer pod for one node and revision.
pub fn render_installer_pod(params: &InstallerPodParams<'_>) -> Result<Pod, Error> {
    let args = serde_json::to_string(&installer_args(params))?;
    let yaml = INSTALLER_POD_TEMPLATE
        .replace("{{revision}}", &params.revision.to_string())
        .replace("{{node_name}}", params.node_name)
        .replace("{{namespace}}", params.namespace)
        .replace("{{image}}", params.image)
        .replace("{{pull_policy}}", params.pull_policy)
        .replace("{{args}}", &args);
    Ok(serde_yaml::from_str(&yaml)?)
}

fn installer_args(params: &InstallerPodParams<'_>) -> Vec<String> {
    let mut args = vec![
        "--revision".to_string(),
        params.revision.to_string(),
        "--namespace".to_string(),
        params.namespace.to_string(),
        "--pod".to_string(),
        params.pod_manifest_name.to_string(),
        "--resource-dir".to_string(),
        params.resource_dir.to_string(),
        "--pod-manifest-dir".to_string(),
        params.pod_manifest_dir.to_string(),
    ];
    for source in params.configmaps {
        let flag = if source.optional {
            "--optional-configmap"
        } else {
            "--configmap"
        };
        args.push(flag.to_string());
        args.push(source.name.clone());
    }
    for source in params.secrets {
        let flag = if source.optional {
            "--optional-secret"
        } else {
            "--secret"
        };
        args.push(flag.to_string());
        args.push(source.name.clone());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staticpod::installer_pod_name;

    fn params<'a>(
        configmaps: &'a [ResourceSource],
        secrets: &'a [ResourceSource],
    ) -> InstallerPodParams<'a> {
        InstallerPodParams {
            revision: 7,
            namespace: "girder-system",
            node_name: "master-1",
            image: "registry.local/girder-agent:1.2.3",
            pull_policy: "IfNotPresent",
            pod_manifest_name: "girder-control",
            resource_dir: "/etc/kubernetes/static-pod-resources",
            pod_manifest_dir: "/etc/kubernetes/manifests",
            configmaps,
            secrets,
        }
    }

    #[test]
    fn rendered_pod_matches_the_naming_convention() {
        let configmaps = vec![ResourceSource::required("girder-control-pod")];
        let pod = render_installer_pod(&params(&configmaps, &[])).expect("renders");
        assert_eq!(
            pod.metadata.name.as_deref(),
            Some(installer_pod_name(7, "master-1").as_str())
        );
        assert_eq!(pod.metadata.namespace.as_deref(), Some("girder-system"));
        let spec = pod.spec.expect("pod spec");
        assert_eq!(spec.node_name.as_deref(), Some("master-1"));
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("registry.local/girder-agent:1.2.3"));
    }

    #[test]
    fn args_carry_revision_and_sources_with_optionality() {
        let configmaps = vec![
            ResourceSource::required("girder-control-pod"),
            ResourceSource::optional("girder-control-overrides"),
        ];
        let secrets = vec![ResourceSource::required("serving-cert")];
        let pod = render_installer_pod(&params(&configmaps, &secrets)).expect("renders");
        let args = pod.spec.unwrap().containers[0].args.clone().unwrap();

        let joined = args.join(" ");
        assert!(joined.contains("--revision 7"));
        assert!(joined.contains("--configmap girder-control-pod"));
        assert!(joined.contains("--optional-configmap girder-control-overrides"));
        assert!(joined.contains("--secret serving-cert"));
        // The pod-manifest configmap stays first.
        let first_cm = args
            .iter()
            .position(|a| a == "--configmap" || a == "--optional-configmap")
            .unwrap();
        assert_eq!(args[first_cm + 1], "girder-control-pod");
    }

    #[test]
    fn revision_label_is_stamped_on_the_installer_pod() {
        let configmaps = vec![ResourceSource::required("girder-control-pod")];
        let pod = render_installer_pod(&params(&configmaps, &[])).expect("renders");
        let labels = pod.metadata.labels.expect("labels");
        assert_eq!(labels.get("girder.io/revision").map(String::as_str), Some("7"));
    }
}
