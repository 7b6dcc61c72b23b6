//! The example asset library: clone, maven builds, binary uploads

use std::path::PathBuf;
use tracing::{info, instrument, warn};

use super::{ContextError, ScenarioContext};
use crate::command::CommandOutput;
use crate::crd::KogitoBuild;
use crate::image::ImageRole;
use crate::source::ClonePlan;
use crate::workload::{binary_build_resource, BinaryBuildOptions, MavenOptions, Runtime};

/// Handle of the example library among the scenario's source trees
pub const EXAMPLE_LIBRARY: &str = "kie-asset-library";

/// Where the library's generator module writes projects, relative to its root
pub const GENERATED_PROJECTS_DIR: &str = "kie-assets-library-generate/target";

impl ScenarioContext {
    /// Private copy of the run's example library in the workspace
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn clone_example_library(&mut self) -> Result<PathBuf, ContextError> {
        let config = self.config();
        let plan = ClonePlan::new(config.example_library_uri.clone(), config.example_library_ref.clone());
        let target = self.workspace.join(EXAMPLE_LIBRARY);

        let tree = self.services.sources().checkout(&plan, &target).await?;
        self.add_source_tree(EXAMPLE_LIBRARY, tree.clone());
        Ok(tree)
    }

    /// `mvn clean install` in the library root
    #[instrument(skip(self, options), fields(namespace = %self.namespace))]
    pub async fn build_example_library(&self, options: &MavenOptions) -> Result<CommandOutput, ContextError> {
        let root = self.source_tree(EXAMPLE_LIBRARY)?;
        let mut maven = self.services.maven(root);
        if options.skip_tests {
            maven = maven.skip_tests();
        }

        let args = ["clean".to_string(), "install".to_string()]
            .into_iter()
            .chain(options.arguments());
        let output = maven.execute(args).await?;
        info!(elapsed = ?output.elapsed, "Built example library");
        Ok(output)
    }

    /// Directory of a project produced by the library's generator
    ///
    /// Fails when the project was not generated.
    pub async fn generated_project(&self, project: &str) -> Result<PathBuf, ContextError> {
        let dir = self
            .source_tree(EXAMPLE_LIBRARY)?
            .join(GENERATED_PROJECTS_DIR)
            .join(project);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(ContextError::MissingSource(format!("{} is not a directory", dir.display()))),
            Err(_) => Err(ContextError::MissingSource(format!(
                "project {project} was not generated (no {})",
                dir.display()
            ))),
        }
    }

    /// `mvn clean install -DskipTests` in a generated project
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn build_generated_project(&self, project: &str) -> Result<CommandOutput, ContextError> {
        let dir = self.generated_project(project).await?;
        match self
            .services
            .maven(&dir)
            .skip_tests()
            .execute(["clean", "install"])
            .await
        {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!(project, error = %e, "Maven build of generated project failed");
                Err(e.into())
            }
        }
    }

    /// Create a binary build for `project` and upload its `target` folder
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn build_binary_from_generated(
        &mut self,
        runtime: Runtime,
        project: &str,
        options: &BinaryBuildOptions,
    ) -> Result<KogitoBuild, ContextError> {
        let target = self.generated_project(project).await?.join("target");
        if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(ContextError::MissingSource(format!(
                "project {project} has not been built (no {})",
                target.display()
            )));
        }

        let image = self.image(ImageRole::runtime(options.native))?;
        let build = binary_build_resource(&self.namespace, project, runtime, &image, options);
        let stored = self.apply_recorded(&build).await?;

        self.services
            .oc()
            .execute([
                "start-build".to_string(),
                format!("{project}-builder"),
                format!("--from-dir={}", target.display()),
                "-n".to_string(),
                self.namespace.clone(),
            ])
            .await?;
        info!(project, "Uploaded binary build input");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Services;
    use super::*;
    use crate::command::Command;
    use crate::config::RunConfig;
    use crate::gateway::{MemoryCluster, Verb};
    use crate::source::MemoryRemote;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;

    fn remote() -> MemoryRemote {
        MemoryRemote::new()
            .branch("main")
            .file("pom.xml", "<project/>")
            .file("kie-assets-library-generate/target/dmn-quarkus/pom.xml", "<project/>")
    }

    /// A stand-in tool that logs its arguments into `log`
    fn recorder(dir: &Path, log: &str) -> Command {
        let script = dir.join(format!("{log}.sh"));
        std::fs::write(&script, format!("echo \"$@\" >> {}\n", dir.join(log).display())).unwrap();
        Command::new("/bin/sh").arg(script.display().to_string())
    }

    async fn context(scripts: &Path, cluster: Arc<MemoryCluster>) -> ScenarioContext {
        let services = Services::new(RunConfig::default(), cluster)
            .unwrap()
            .with_cloner(Arc::new(remote()))
            .with_maven(recorder(scripts, "mvn.log"))
            .with_oc(recorder(scripts, "oc.log"));
        let mut ctx = ScenarioContext::new(Arc::new(services), "library", []);
        ctx.setup().await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_library_build_flow() {
        let scripts = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let mut ctx = context(scripts.path(), cluster.clone()).await;

        let tree = ctx.clone_example_library().await.unwrap();
        assert!(tree.starts_with(ctx.workspace()));
        assert!(tree.join("pom.xml").is_file());

        let options = MavenOptions {
            profile: vec!["dmn".to_string()],
            skip_tests: true,
            ..Default::default()
        };
        ctx.build_example_library(&options).await.unwrap();
        ctx.build_generated_project("dmn-quarkus").await.unwrap();

        let log = std::fs::read_to_string(scripts.path().join("mvn.log")).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], "-DskipTests clean install -Pdmn");
        assert_eq!(lines[1], "-DskipTests clean install");
    }

    #[tokio::test]
    async fn test_missing_generated_project() {
        let scripts = tempfile::tempdir().unwrap();
        let mut ctx = context(scripts.path(), Arc::new(MemoryCluster::new())).await;

        assert!(matches!(
            ctx.build_generated_project("dmn-quarkus").await.unwrap_err(),
            ContextError::MissingSource(_)
        ));

        ctx.clone_example_library().await.unwrap();
        let err = ctx.generated_project("process-springboot").await.unwrap_err();
        assert!(err.to_string().contains("process-springboot was not generated"));
    }

    #[tokio::test]
    async fn test_binary_build_uploads_target_folder() {
        let scripts = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let mut ctx = context(scripts.path(), cluster.clone()).await;
        let tree = ctx.clone_example_library().await.unwrap();

        let err = ctx
            .build_binary_from_generated(Runtime::Quarkus, "dmn-quarkus", &BinaryBuildOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("has not been built"));

        std::fs::create_dir_all(tree.join(GENERATED_PROJECTS_DIR).join("dmn-quarkus/target")).unwrap();
        let build = ctx
            .build_binary_from_generated(Runtime::Quarkus, "dmn-quarkus", &BinaryBuildOptions::default())
            .await
            .unwrap();
        assert_eq!(build.spec.r#type, "Binary");
        assert!(build.spec.runtime_image.as_deref().unwrap_or_default().contains("runtime-jvm"));
        assert_eq!(cluster.calls_matching(Verb::Create, "KogitoBuild").len(), 1);

        let log = std::fs::read_to_string(scripts.path().join("oc.log")).unwrap();
        assert!(log.starts_with("start-build dmn-quarkus-builder --from-dir="));
        assert!(log.trim_end().ends_with(&format!("-n {}", ctx.namespace())));
    }

    #[tokio::test]
    async fn test_native_binary_build_uses_native_runtime_image() {
        let scripts = tempfile::tempdir().unwrap();
        let cluster = Arc::new(MemoryCluster::new());
        let mut ctx = context(scripts.path(), cluster.clone()).await;
        let tree = ctx.clone_example_library().await.unwrap();
        std::fs::create_dir_all(tree.join(GENERATED_PROJECTS_DIR).join("dmn-quarkus/target")).unwrap();

        let options = BinaryBuildOptions {
            native: true,
            env: BTreeMap::from([("QUARKUS_PROFILE".to_string(), "prod".to_string())]),
        };
        let build = ctx
            .build_binary_from_generated(Runtime::Quarkus, "dmn-quarkus", &options)
            .await
            .unwrap();

        assert!(build.spec.native);
        assert!(build.spec.runtime_image.as_deref().unwrap_or_default().contains("runtime-native"));
        assert_eq!(build.spec.env[0].name, "QUARKUS_PROFILE");
    }
}
