//! Scoped helpers through which executors record what they create

use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::{ContextError, ScenarioContext, Services};
use crate::config::RunConfig;
use crate::gateway::{Gateway, ResourceRef};
use crate::image::{ImageRef, ImageRole};
use crate::olm::SubscriptionId;

/// Future returned by a teardown callback
pub type CleanupFuture = BoxFuture<'static, Result<(), String>>;

pub(crate) struct Cleanup {
    pub label: String,
    pub run: Box<dyn FnOnce(Arc<Services>) -> CleanupFuture + Send + Sync>,
}

impl ScenarioContext {
    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Scratch directory owned by this scenario
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag.trim_start_matches('@'))
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn config(&self) -> &RunConfig {
        self.services.config()
    }

    /// Cluster access for steps; cancelled with the run
    pub fn gateway(&self) -> &Gateway {
        self.services.step_gateway()
    }

    /// Remember a cluster object for LIFO deletion at teardown
    ///
    /// Recording the same object twice keeps its first position.
    pub fn record_resource(&mut self, resource: ResourceRef) {
        if self.applied_resources.contains(&resource) {
            return;
        }
        debug!(resource = %resource, "Recorded for teardown");
        self.applied_resources.push(resource);
    }

    pub fn applied_resources(&self) -> &[ResourceRef] {
        &self.applied_resources
    }

    /// Remember a subscription for LIFO uninstall at teardown
    pub fn record_operator(&mut self, id: SubscriptionId) {
        if !self.installed_operators.contains(&id) {
            self.installed_operators.push(id);
        }
    }

    pub fn installed_operators(&self) -> &[SubscriptionId] {
        &self.installed_operators
    }

    /// Run `cleanup` at teardown, before resources are deleted
    ///
    /// Callbacks run newest first and receive the run services; they hold
    /// no reference to the context.
    pub fn on_teardown<F, Fut>(&mut self, label: impl Into<String>, cleanup: F)
    where
        F: FnOnce(Arc<Services>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.cleanups.push(Cleanup {
            label: label.into(),
            run: Box::new(move |services| Box::pin(cleanup(services))),
        });
    }

    pub fn add_source_tree(&mut self, handle: impl Into<String>, path: PathBuf) {
        self.source_trees.insert(handle.into(), path);
    }

    pub fn source_tree(&self, handle: &str) -> Result<&Path, ContextError> {
        self.source_trees
            .get(handle)
            .map(PathBuf::as_path)
            .ok_or_else(|| ContextError::MissingSource(format!("project {handle} has not been cloned in this scenario")))
    }

    /// Use `image` for `role` for the rest of the scenario
    pub fn override_image(&mut self, role: ImageRole, image: ImageRef) {
        self.image_overrides.insert(role, image);
    }

    /// Image for `role`: override, then tag mapping, then run default
    pub fn image(&self, role: ImageRole) -> Result<ImageRef, ContextError> {
        Ok(self
            .services
            .images()
            .resolve(role, &self.tags, &self.image_overrides)?)
    }

    /// Keep a value for later steps of the same scenario
    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.references.insert(key.into(), value.into());
    }

    pub fn reference(&self, key: &str) -> Option<&str> {
        self.references.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::services;
    use super::*;
    use crate::gateway::MemoryCluster;
    use k8s_openapi::api::core::v1::ConfigMap;

    fn context() -> ScenarioContext {
        ScenarioContext::new(services(Arc::new(MemoryCluster::new())), "tracking", ["product".to_string()])
    }

    #[test]
    fn test_resources_recorded_once_in_order() {
        let mut ctx = context();
        let a = ResourceRef::new::<ConfigMap>(Some("ns"), "a");
        let b = ResourceRef::new::<ConfigMap>(Some("ns"), "b");
        ctx.record_resource(a.clone());
        ctx.record_resource(b.clone());
        ctx.record_resource(a.clone());
        assert_eq!(ctx.applied_resources(), &[a, b]);
    }

    #[test]
    fn test_image_override_beats_tag_mapping() {
        let mut ctx = context();
        let tagged = ctx.image(ImageRole::Builder).unwrap();
        assert_eq!(tagged.registry, "registry.redhat.io");

        let custom = ImageRef::parse("quay.io/me/builder:dev").unwrap();
        ctx.override_image(ImageRole::Builder, custom.clone());
        assert_eq!(ctx.image(ImageRole::Builder).unwrap(), custom);
    }

    #[test]
    fn test_missing_source_tree() {
        let mut ctx = context();
        let err = ctx.source_tree("kie-asset-library").unwrap_err();
        assert!(err.to_string().contains("has not been cloned"));

        ctx.add_source_tree("kie-asset-library", PathBuf::from("/tmp/lib"));
        assert_eq!(ctx.source_tree("kie-asset-library").unwrap(), Path::new("/tmp/lib"));
    }

    #[test]
    fn test_references() {
        let mut ctx = context();
        assert!(ctx.reference("build").is_none());
        ctx.remember("build", "example-builder-1");
        assert_eq!(ctx.reference("build"), Some("example-builder-1"));
    }
}
