//! Which image plays which role in a scenario
//!
//! Every image the harness hands to the cluster is resolved here, by role,
//! with a fixed precedence:
//!
//! 1. a per-scenario override,
//! 2. a mapping selected by one of the scenario's tags,
//! 3. the run-wide default.
//!
//! Missing all three is an error raised when the scenario is set up.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Logical image role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageRole {
    Builder,
    RuntimeJvm,
    RuntimeNative,
    Operator,
}

impl ImageRole {
    pub const ALL: [ImageRole; 4] = [
        ImageRole::Builder,
        ImageRole::RuntimeJvm,
        ImageRole::RuntimeNative,
        ImageRole::Operator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageRole::Builder => "builder",
            ImageRole::RuntimeJvm => "runtime-jvm",
            ImageRole::RuntimeNative => "runtime-native",
            ImageRole::Operator => "operator",
        }
    }

    /// Runtime role for a JVM or native build
    pub fn runtime(native: bool) -> Self {
        if native {
            ImageRole::RuntimeNative
        } else {
            ImageRole::RuntimeJvm
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageRole {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImageRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| ImageError::UnknownRole(s.to_string()))
    }
}

/// Errors from image resolution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("no image configured for role '{0}' (no override, no tag mapping, no default)")]
    Unresolved(ImageRole),

    #[error("image reference '{0}' is not fully qualified (expected registry/namespace/name:tag)")]
    Invalid(String),

    #[error("unknown image role '{0}'")]
    UnknownRole(String),
}

/// Fully qualified image reference `registry/namespace/name:tag`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub namespace: String,
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(
        registry: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            namespace: namespace.into(),
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Parse `registry/namespace[/more]/name:tag`
    pub fn parse(reference: &str) -> Result<Self, ImageError> {
        let invalid = || ImageError::Invalid(reference.to_string());
        let reference = reference.trim();

        let slash = reference.rfind('/').ok_or_else(invalid)?;
        let (path, tag) = match reference[slash..].rfind(':') {
            Some(colon) => {
                let split = slash + colon;
                (&reference[..split], &reference[split + 1..])
            }
            None => return Err(invalid()),
        };

        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 3 || tag.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(invalid());
        }

        Ok(Self {
            registry: segments[0].to_string(),
            namespace: segments[1..segments.len() - 1].join("/"),
            name: segments[segments.len() - 1].to_string(),
            tag: tag.to_string(),
        })
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// `registry/namespace/name` without the tag
    pub fn repository(&self) -> String {
        format!("{}/{}/{}", self.registry, self.namespace, self.name)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository(), self.tag)
    }
}

impl FromStr for ImageRef {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Images selected by the presence of a scenario tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMapping {
    /// Tag without the leading `@`
    pub tag: String,
    pub images: BTreeMap<ImageRole, String>,
}

impl TagMapping {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().trim_start_matches('@').to_string(),
            images: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn image(mut self, role: ImageRole, reference: impl Into<String>) -> Self {
        self.images.insert(role, reference.into());
        self
    }
}

/// Where a resolved image came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Override,
    Tag(String),
    Default,
}

/// Resolves role to image from run-wide defaults and tag mappings
#[derive(Debug, Clone, Default)]
pub struct ImageResolver {
    defaults: BTreeMap<ImageRole, String>,
    tag_mappings: Vec<TagMapping>,
}

impl ImageResolver {
    pub fn new(defaults: BTreeMap<ImageRole, String>, tag_mappings: Vec<TagMapping>) -> Self {
        Self {
            defaults,
            tag_mappings,
        }
    }

    pub fn from_config(config: &crate::config::RunConfig) -> Self {
        Self::new(config.image_defaults(), config.tag_mappings.clone())
    }

    /// Resolve `role` and report which tier supplied the answer
    pub fn resolve_with_provenance(
        &self,
        role: ImageRole,
        tags: &BTreeSet<String>,
        overrides: &BTreeMap<ImageRole, ImageRef>,
    ) -> Result<(ImageRef, Provenance), ImageError> {
        if let Some(image) = overrides.get(&role) {
            return Ok((image.clone(), Provenance::Override));
        }

        for mapping in &self.tag_mappings {
            if !tags.contains(&mapping.tag) {
                continue;
            }
            if let Some(reference) = mapping.images.get(&role) {
                return Ok((ImageRef::parse(reference)?, Provenance::Tag(mapping.tag.clone())));
            }
        }

        match self.defaults.get(&role) {
            Some(reference) if !reference.trim().is_empty() => {
                Ok((ImageRef::parse(reference)?, Provenance::Default))
            }
            _ => Err(ImageError::Unresolved(role)),
        }
    }

    pub fn resolve(
        &self,
        role: ImageRole,
        tags: &BTreeSet<String>,
        overrides: &BTreeMap<ImageRole, ImageRef>,
    ) -> Result<ImageRef, ImageError> {
        self.resolve_with_provenance(role, tags, overrides)
            .map(|(image, _)| image)
    }

    /// Resolve every role once so bad input fails at setup
    pub fn validate(
        &self,
        tags: &BTreeSet<String>,
        overrides: &BTreeMap<ImageRole, ImageRef>,
    ) -> Result<(), ImageError> {
        for role in ImageRole::ALL {
            self.resolve(role, tags, overrides)?;
        }
        Ok(())
    }
}
