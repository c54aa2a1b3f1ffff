use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::OWNED_LABEL;
use crate::constants::OWNED_LABEL_VALUE;

/// A custom resource definition as stored remotely.
///
/// The watcher only reads `metadata.name`, `metadata.resource_version` and the
/// owned label; everything else is carried through to callbacks untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub metadata: ObjectMeta,
    pub spec: DefinitionSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Unique, cluster-scoped name. Used as the dispatch key.
    pub name: String,

    /// Opaque version token, changes on every remote mutation
    #[serde(default)]
    pub resource_version: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub generation: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSpec {
    pub group: String,
    pub names: DefinitionNames,
    #[serde(default)]
    pub versions: Vec<DefinitionVersion>,
    /// Schema content, opaque to the watcher
    #[serde(default)]
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionNames {
    pub plural: String,
    #[serde(default)]
    pub singular: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionVersion {
    pub name: String,
    #[serde(default)]
    pub served: bool,
    #[serde(default)]
    pub storage: bool,
}

impl ResourceDefinition {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn resource_version(&self) -> &str {
        &self.metadata.resource_version
    }

    /// Whether the definition carries the owned marker
    pub fn is_owned(&self) -> bool {
        self.metadata
            .labels
            .get(OWNED_LABEL)
            .is_some_and(|v| v == OWNED_LABEL_VALUE)
    }
}
