//! Example asset library phrases

use super::{RegistryError, StepFuture, StepRegistry};
use crate::context::ScenarioContext;
use crate::workload::{BinaryBuildOptions, MavenOptions, Runtime};

pub(super) fn register(registry: &mut StepRegistry) -> Result<(), RegistryError> {
    registry
        .step("Project kie-asset-library is cloned", clone_library)?
        .step_with_table("Project kie-asset-library is built by maven with configuration:", build_library)?
        .step(r#"Project "([^"]*)" is generated in temporary folder"#, generated)?
        .step(r#"Project "([^"]*)" is built from temporary folder by maven"#, build_generated)?
        .step_with_table(
            r#"Build binary (quarkus|springboot) service "([^"]*)" from kie-asset-library target folder"#,
            binary_build,
        )?;
    Ok(())
}

fn clone_library(ctx: &mut ScenarioContext) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.clone_example_library().await?;
        Ok(())
    })
}

fn build_library(ctx: &mut ScenarioContext, options: MavenOptions) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.build_example_library(&options).await?;
        Ok(())
    })
}

fn generated(ctx: &mut ScenarioContext, project: String) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.generated_project(&project).await?;
        Ok(())
    })
}

fn build_generated(ctx: &mut ScenarioContext, project: String) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.build_generated_project(&project).await?;
        Ok(())
    })
}

fn binary_build(
    ctx: &mut ScenarioContext,
    runtime: Runtime,
    project: String,
    options: BinaryBuildOptions,
) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.build_binary_from_generated(runtime, &project, &options).await?;
        Ok(())
    })
}
