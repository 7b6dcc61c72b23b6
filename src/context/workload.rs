//! Workload custom resources applied from a scenario
//!
//! Every operation builds the resource from its option struct, applies it
//! (create, or update when the spec drifted) and records it for teardown.
//! The stored object is returned as the handle later steps assert on.

use kube::ResourceExt;
use tracing::{info, instrument};

use super::{ContextError, ScenarioContext};
use crate::crd::{KogitoBuild, KogitoInfra, KogitoRuntime, KogitoSupportingService};
use crate::gateway::{Object, ResourceRef};
use crate::image::{ImageRef, ImageRole};
use crate::olm::DependencyOperator;
use crate::workload::{
    infra_resource, remote_build_resource, runtime_resource, supporting_service_resource, BuildInputs, BuildOptions,
    Runtime, RuntimeOptions, SupportingServiceOptions,
};

impl ScenarioContext {
    /// Apply `resource` and record it for teardown
    pub async fn apply_recorded<K: Object>(&mut self, resource: &K) -> Result<K, ContextError> {
        let stored = self.gateway().apply(resource).await?;
        if let Some(reference) = ResourceRef::of(&stored) {
            self.record_resource(reference);
        }
        info!(kind = %K::kind(&()), name = %stored.name_any(), "Applied workload resource");
        Ok(stored)
    }

    /// Explicit image from a table, else the role's resolved image
    fn image_or(&self, explicit: Option<&str>, role: ImageRole) -> Result<ImageRef, ContextError> {
        match explicit {
            Some(image) => Ok(ImageRef::parse(image)?),
            None => self.image(role),
        }
    }

    #[instrument(skip(self, options), fields(namespace = %self.namespace))]
    pub async fn deploy_runtime(
        &mut self,
        name: &str,
        runtime: Runtime,
        options: &RuntimeOptions,
    ) -> Result<KogitoRuntime, ContextError> {
        let image = self.image_or(options.image.as_deref(), ImageRole::runtime(options.native))?;
        let resource = runtime_resource(&self.namespace, name, runtime, &image, options);
        self.apply_recorded(&resource).await
    }

    /// Build `project` on the cluster from a git repository
    ///
    /// Repository, ref and maven mirror default to the run's example library
    /// settings.
    #[instrument(skip(self, options), fields(namespace = %self.namespace))]
    pub async fn start_remote_build(
        &mut self,
        name: &str,
        runtime: Runtime,
        project: &str,
        options: &BuildOptions,
    ) -> Result<KogitoBuild, ContextError> {
        let config = self.config();
        let inputs = BuildInputs {
            builder_image: self.image(ImageRole::Builder)?,
            runtime_image: self.image(ImageRole::runtime(options.native))?,
            git_uri: options
                .git_uri
                .clone()
                .unwrap_or_else(|| config.example_library_uri.clone()),
            git_reference: options
                .git_reference
                .clone()
                .unwrap_or_else(|| config.example_library_ref.clone()),
            maven_mirror_url: options
                .maven_mirror_url
                .clone()
                .or_else(|| config.maven_mirror_url.clone()),
        };
        let resource = remote_build_resource(&self.namespace, name, runtime, project, &inputs, options);
        self.apply_recorded(&resource).await
    }

    #[instrument(skip(self, options), fields(namespace = %self.namespace))]
    pub async fn deploy_supporting_service(
        &mut self,
        name: &str,
        service_type: &str,
        options: &SupportingServiceOptions,
    ) -> Result<KogitoSupportingService, ContextError> {
        let resource = supporting_service_resource(&self.namespace, name, service_type, options);
        self.apply_recorded(&resource).await
    }

    /// Bind the infrastructure instance `instance` under `name`
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn bind_infra(
        &mut self,
        name: &str,
        operator: DependencyOperator,
        instance: &str,
    ) -> Result<KogitoInfra, ContextError> {
        let resource = infra_resource(&self.namespace, name, operator, instance);
        self.apply_recorded(&resource).await
    }
}
