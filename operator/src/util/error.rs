#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Yaml error: {source}")]
    Yaml {
        #[from]
        source: serde_yaml::Error,
    },

    #[error("Io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A patch that must never be sent, e.g. a `test` on
    /// `/metadata/resourceVersion`.
    #[error("Forbidden patch: {0}")]
    ForbiddenPatch(String),

    #[error("Required {kind} '{name}' not found")]
    RequiredNotFound { kind: &'static str, name: String },

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// An on-node state the rollout cannot recover from, e.g. no previous
    /// revision to fall back to.
    #[error("Node state error: {0}")]
    NodeState(String),

    #[error("{0}")]
    Aggregate(String),
}

/// Folds a list of errors into a single one; `None` when the list is empty.
/// The aggregated message is what lands in the `SyncError` condition.
pub fn aggregate(errors: Vec<Error>) -> Option<Error> {
    match errors.len() {
        0 => None,
        1 => errors.into_iter().next(),
        _ => Some(Error::Aggregate(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )),
    }
}

/// Joins error messages without consuming, for condition messages.
pub fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
