use std::fmt;

use crate::ResourceDefinition;
use crate::ResourceError;
use crate::Result;

/// Externally addressable coordinate of the resources a definition declares
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl GroupVersionResource {
    /// Derives the coordinate from the definition's group, its first declared
    /// version and its plural name.
    ///
    /// # Errors
    /// `ResourceError::NoVersions` when the definition declares no version.
    pub fn from_definition(definition: &ResourceDefinition) -> Result<Self> {
        let version = definition
            .spec
            .versions
            .first()
            .ok_or_else(|| ResourceError::NoVersions {
                name: definition.name().to_string(),
            })?;

        Ok(Self {
            group: definition.spec.group.clone(),
            version: version.name.clone(),
            resource: definition.spec.names.plural.clone(),
        })
    }
}

impl TryFrom<&ResourceDefinition> for GroupVersionResource {
    type Error = crate::Error;

    fn try_from(definition: &ResourceDefinition) -> Result<Self> {
        Self::from_definition(definition)
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}/{}, Resource={}",
            self.group, self.version, self.resource
        )
    }
}
