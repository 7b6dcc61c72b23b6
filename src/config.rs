//! Run-wide configuration
//!
//! Build it programmatically or let the CLI fill it from flags and
//! environment variables. No config files.
//!
//! # Example
//!
//! ```
//! use kogito_bdd::config::{Platform, RunConfig};
//! use std::time::Duration;
//!
//! let config = RunConfig::default()
//!     .platform(Platform::Kubernetes)
//!     .olm_namespace("operators")
//!     .operator_image_tag("2.0.0-snapshot")
//!     .poll_interval(Duration::from_secs(5))
//!     .tag_filter("@smoke");
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::image::{ImageRole, TagMapping};

/// Default image tag for the upstream images
pub const DEFAULT_IMAGE_TAG: &str = "2.0.0-snapshot";

/// Errors from invalid configuration input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown platform '{0}' (expected openshift or kubernetes)")]
    UnknownPlatform(String),

    #[error("invalid tag mapping '{0}' (expected tag:role=image)")]
    InvalidTagMapping(String),
}

/// Flavour of the target cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// Managed platform with routes, image streams and dockercfg pull secrets
    #[default]
    OpenShift,
    Kubernetes,
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openshift" | "ocp" => Ok(Platform::OpenShift),
            "kubernetes" | "k8s" => Ok(Platform::Kubernetes),
            other => Err(ConfigError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Per-category deadlines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Operator installation and readiness
    pub operator: Duration,
    /// Custom catalog becoming READY
    pub catalog: Duration,
    /// Slow dependency operators such as MongoDB
    pub dependency_operator: Duration,
    /// Remote builds on the cluster
    pub build: Duration,
    /// Local subprocesses (maven, oc)
    pub command: Duration,
    /// Source clones
    pub clone: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operator: Duration::from_secs(5 * 60),
            catalog: Duration::from_secs(3 * 60),
            dependency_operator: Duration::from_secs(10 * 60),
            build: Duration::from_secs(30 * 60),
            command: Duration::from_secs(60 * 60),
            clone: Duration::from_secs(10 * 60),
        }
    }
}

/// Configuration shared by every scenario of a run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub operator_image_name: String,
    pub operator_image_tag: String,
    /// Bundle catalog image; enables the custom catalog
    pub operator_catalog_image: Option<String>,
    /// Subscription channel for the operator under test
    pub operator_channel: String,

    /// Package manager's home namespace (cluster-wide subscriptions)
    pub olm_namespace: String,
    /// Namespace holding catalog sources
    pub marketplace_namespace: String,
    pub platform: Platform,

    pub timeouts: Timeouts,
    pub poll_interval: Duration,
    /// Attempts for retriable subprocesses
    pub command_retries: u32,

    pub example_library_uri: String,
    pub example_library_ref: String,

    /// Run-wide defaults for non-operator roles
    pub images: BTreeMap<ImageRole, String>,
    pub tag_mappings: Vec<TagMapping>,
    pub maven_mirror_url: Option<String>,

    /// Each entry must hold; `~@tag` / `not @tag` negates, commas mean OR
    pub tag_filters: Vec<String>,
    /// Regular expressions; a scenario runs if any matches its name
    pub name_filters: Vec<String>,

    pub keep_namespace_on_failure: bool,
    pub collect_diagnostics: bool,
    pub work_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let images = [
            (ImageRole::Builder, format!("quay.io/kiegroup/kogito-builder:{DEFAULT_IMAGE_TAG}")),
            (ImageRole::RuntimeJvm, format!("quay.io/kiegroup/kogito-runtime-jvm:{DEFAULT_IMAGE_TAG}")),
            (ImageRole::RuntimeNative, format!("quay.io/kiegroup/kogito-runtime-native:{DEFAULT_IMAGE_TAG}")),
        ]
        .into();

        let product = TagMapping::new("product")
            .image(ImageRole::Builder, "registry.redhat.io/rhpam-7/rhpam-kogito-builder-rhel8:7.13.0")
            .image(ImageRole::RuntimeJvm, "registry.redhat.io/rhpam-7/rhpam-kogito-runtime-jvm-rhel8:7.13.0")
            .image(ImageRole::RuntimeNative, "registry.redhat.io/rhpam-7/rhpam-kogito-runtime-native-rhel8:7.13.0")
            .image(ImageRole::Operator, "registry.redhat.io/rhpam-7/rhpam-kogito-rhel8-operator:7.13.0");

        Self {
            operator_image_name: "quay.io/kiegroup/kogito-operator".to_string(),
            operator_image_tag: DEFAULT_IMAGE_TAG.to_string(),
            operator_catalog_image: None,
            operator_channel: "alpha".to_string(),
            olm_namespace: "openshift-operators".to_string(),
            marketplace_namespace: "openshift-marketplace".to_string(),
            platform: Platform::OpenShift,
            timeouts: Timeouts::default(),
            poll_interval: crate::wait::DEFAULT_POLL_INTERVAL,
            command_retries: 1,
            example_library_uri: "https://github.com/jstastny-cz/kie-asset-library-poc".to_string(),
            example_library_ref: "main".to_string(),
            images,
            tag_mappings: vec![product],
            maven_mirror_url: None,
            tag_filters: Vec::new(),
            name_filters: Vec::new(),
            keep_namespace_on_failure: false,
            collect_diagnostics: true,
            work_dir: None,
            report_path: None,
        }
    }
}

impl RunConfig {
    /// Role defaults, with the operator image assembled from name and tag
    pub fn image_defaults(&self) -> BTreeMap<ImageRole, String> {
        let mut defaults = self.images.clone();
        if !self.operator_image_name.is_empty() {
            defaults.insert(
                ImageRole::Operator,
                format!("{}:{}", self.operator_image_name, self.operator_image_tag),
            );
        }
        defaults
    }

    #[must_use]
    pub fn operator_image_name(mut self, name: impl Into<String>) -> Self {
        self.operator_image_name = name.into();
        self
    }

    #[must_use]
    pub fn operator_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.operator_image_tag = tag.into();
        self
    }

    #[must_use]
    pub fn operator_catalog_image(mut self, image: impl Into<String>) -> Self {
        self.operator_catalog_image = Some(image.into());
        self
    }

    #[must_use]
    pub fn operator_channel(mut self, channel: impl Into<String>) -> Self {
        self.operator_channel = channel.into();
        self
    }

    #[must_use]
    pub fn olm_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.olm_namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn marketplace_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.marketplace_namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn command_retries(mut self, attempts: u32) -> Self {
        self.command_retries = attempts.max(1);
        self
    }

    #[must_use]
    pub fn example_library(mut self, uri: impl Into<String>, reference: impl Into<String>) -> Self {
        self.example_library_uri = uri.into();
        self.example_library_ref = reference.into();
        self
    }

    #[must_use]
    pub fn image(mut self, role: ImageRole, reference: impl Into<String>) -> Self {
        self.images.insert(role, reference.into());
        self
    }

    #[must_use]
    pub fn without_image(mut self, role: ImageRole) -> Self {
        self.images.remove(&role);
        if role == ImageRole::Operator {
            self.operator_image_name.clear();
        }
        self
    }

    #[must_use]
    pub fn tag_mapping(mut self, mapping: TagMapping) -> Self {
        self.tag_mappings.retain(|m| m.tag != mapping.tag);
        self.tag_mappings.push(mapping);
        self
    }

    #[must_use]
    pub fn maven_mirror_url(mut self, url: impl Into<String>) -> Self {
        self.maven_mirror_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn tag_filter(mut self, filter: impl Into<String>) -> Self {
        self.tag_filters.push(filter.into());
        self
    }

    #[must_use]
    pub fn name_filter(mut self, filter: impl Into<String>) -> Self {
        self.name_filters.push(filter.into());
        self
    }

    #[must_use]
    pub fn keep_namespace_on_failure(mut self, keep: bool) -> Self {
        self.keep_namespace_on_failure = keep;
        self
    }

    #[must_use]
    pub fn collect_diagnostics(mut self, collect: bool) -> Self {
        self.collect_diagnostics = collect;
        self
    }

    #[must_use]
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }
}

/// Parse `tag:role=image` as given on the command line
pub fn parse_tag_mapping(input: &str) -> Result<(String, ImageRole, String), ConfigError> {
    let invalid = || ConfigError::InvalidTagMapping(input.to_string());
    let (tag, rest) = input.split_once(':').ok_or_else(invalid)?;
    let (role, image) = rest.split_once('=').ok_or_else(invalid)?;
    let role = role.trim().parse::<ImageRole>().map_err(|_| invalid())?;
    if tag.trim().is_empty() || image.trim().is_empty() {
        return Err(invalid());
    }
    Ok((tag.trim().trim_start_matches('@').to_string(), role, image.trim().to_string()))
}
