//! RFC-6902 patch builder for shared status arrays.
//!
//! Every `remove` is guarded by a `test` on a key field of the entry it
//! removes, so concurrent writers fail loudly instead of deleting the wrong
//! element. Optimistic concurrency belongs to the API server, not to the
//! patch: a `test` on `/metadata/resourceVersion` is rejected at marshal
//! time.

use crate::util::Error;
use girder_types::{GenerationStatus, NodeStatus, OperatorCondition};
use serde_json::{Value, json};

const FORBIDDEN_TEST_PATHS: &[&str] = &["/metadata/resourceVersion"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Test,
    Remove,
}

#[derive(Debug, Clone)]
struct Op {
    kind: OpKind,
    path: String,
    value: Option<Value>,
}

/// An ordered JSON-patch document. An empty patch marshals to the JSON value
/// `null`; callers use [`JsonPatch::is_empty`] to skip the server round-trip.
#[derive(Debug, Clone, Default)]
pub struct JsonPatch {
    ops: Vec<Op>,
}

impl JsonPatch {
    pub fn new() -> Self {
        JsonPatch::default()
    }

    pub fn with_test(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.ops.push(Op {
            kind: OpKind::Test,
            path: path.to_string(),
            value: Some(value.into()),
        });
        self
    }

    pub fn with_remove(mut self, path: &str) -> Self {
        self.ops.push(Op {
            kind: OpKind::Remove,
            path: path.to_string(),
            value: None,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    fn validate(&self) -> Result<(), Error> {
        let offenders: Vec<String> = self
            .ops
            .iter()
            .enumerate()
            .filter(|(_, op)| {
                op.kind == OpKind::Test && FORBIDDEN_TEST_PATHS.contains(&op.path.as_str())
            })
            .map(|(i, op)| format!("test operation at index {} uses forbidden path '{}'", i, op.path))
            .collect();
        if offenders.is_empty() {
            Ok(())
        } else {
            Err(Error::ForbiddenPatch(offenders.join("; ")))
        }
    }

    /// Marshals the patch document. The empty patch yields the bytes `null`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        if self.is_empty() {
            return Ok(b"null".to_vec());
        }
        self.validate()?;
        Ok(serde_json::to_vec(&self.ops_value())?)
    }

    fn ops_value(&self) -> Value {
        Value::Array(
            self.ops
                .iter()
                .map(|op| match op.kind {
                    OpKind::Test => json!({"op": "test", "path": op.path, "value": op.value}),
                    OpKind::Remove => json!({"op": "remove", "path": op.path}),
                })
                .collect(),
        )
    }

    /// Converts into the wire type accepted by `kube::api::Patch::Json`.
    pub fn to_patch(&self) -> Result<json_patch::Patch, Error> {
        if self.is_empty() {
            return Ok(serde_json::from_value(json!([]))?);
        }
        self.validate()?;
        Ok(serde_json::from_value(self.ops_value())?)
    }
}

/// Appends guarded removals of `entries` from the array at `array_path`.
/// `entries` are `(index, guard_field, expected_value)` in ascending index
/// order; emitted indices are rewritten for the cumulative shift caused by
/// the preceding removals in the same patch.
pub fn remove_indexed(
    mut patch: JsonPatch,
    array_path: &str,
    entries: &[(usize, &str, String)],
) -> JsonPatch {
    for (removed, (index, field, expected)) in entries.iter().enumerate() {
        let shifted = index - removed;
        patch = patch
            .with_test(
                &format!("{array_path}/{shifted}/{field}"),
                expected.as_str(),
            )
            .with_remove(&format!("{array_path}/{shifted}"));
    }
    patch
}

/// Guarded removal of every condition whose type is in `types`. Indices are
/// taken from `conditions`, which must reflect the server-side order.
pub fn remove_conditions(
    patch: JsonPatch,
    conditions: &[OperatorCondition],
    types: &[&str],
) -> JsonPatch {
    let entries: Vec<(usize, &str, String)> = conditions
        .iter()
        .enumerate()
        .filter(|(_, c)| types.contains(&c.type_.as_str()))
        .map(|(i, c)| (i, "type", c.type_.clone()))
        .collect();
    remove_indexed(patch, "/status/conditions", &entries)
}

/// Guarded removal of the generations entry for one managed resource.
pub fn remove_generation(
    patch: JsonPatch,
    generations: &[GenerationStatus],
    group: &str,
    resource: &str,
    namespace: &str,
    name: &str,
) -> JsonPatch {
    let entries: Vec<(usize, &str, String)> = generations
        .iter()
        .enumerate()
        .filter(|(_, g)| {
            g.group == group && g.resource == resource && g.namespace == namespace && g.name == name
        })
        .map(|(i, g)| (i, "name", g.name.clone()))
        .collect();
    remove_indexed(patch, "/status/generations", &entries)
}

/// Guarded removal of node status entries by node name.
pub fn remove_node_statuses(
    patch: JsonPatch,
    node_statuses: &[NodeStatus],
    names: &[&str],
) -> JsonPatch {
    let entries: Vec<(usize, &str, String)> = node_statuses
        .iter()
        .enumerate()
        .filter(|(_, n)| names.contains(&n.node_name.as_str()))
        .map(|(i, n)| (i, "nodeName", n.node_name.clone()))
        .collect();
    remove_indexed(patch, "/status/nodeStatuses", &entries)
}
