//! Workload deployment and assertion phrases

use super::{minutes, RegistryError, StepError, StepFuture, StepRegistry};
use crate::context::ScenarioContext;
use crate::image::{ImageRef, ImageRole};
use crate::olm::DependencyOperator;
use crate::workload::{BuildOptions, Runtime, RuntimeOptions, SupportingServiceOptions};

pub(super) fn register(registry: &mut StepRegistry) -> Result<(), RegistryError> {
    registry
        .step_with_table(r#"Deploy (quarkus|springboot) runtime "([^"]*)""#, deploy_runtime)?
        .step_with_table(
            r#"Start remote build "([^"]*)" for (quarkus|springboot) project "([^"]*)""#,
            remote_build,
        )?
        .step_with_table(
            r#"Deploy supporting service "([^"]*)" of type "([^"]*)""#,
            supporting_service,
        )?
        .step(
            r#"Bind infra "([^"]*)" to (Infinispan|Kafka|Keycloak|MongoDB) instance "([^"]*)""#,
            bind_infra,
        )?
        .step(
            r#"Runtime "([^"]*)" has (\d+) pods? running within (\d+) minutes?"#,
            runtime_pods,
        )?
        .step(
            r#"Supporting service "([^"]*)" has (\d+) pods? running within (\d+) minutes?"#,
            supporting_service_pods,
        )?
        .step(r#"Build "([^"]*)" completes successfully within (\d+) minutes?"#, build_complete)?
        .step(
            r#"Service "([^"]*)" responds at path "([^"]*)" within (\d+) minutes?"#,
            service_responds,
        )?
        .step(r#"Infra "([^"]*)" is ready within (\d+) minutes?"#, infra_ready)?
        .step(
            r#"Scenario uses (builder|runtime-jvm|runtime-native|operator) image "([^"]*)""#,
            image_override,
        )?;
    Ok(())
}

fn deploy_runtime(
    ctx: &mut ScenarioContext,
    runtime: Runtime,
    name: String,
    options: RuntimeOptions,
) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.deploy_runtime(&name, runtime, &options).await?;
        Ok(())
    })
}

fn remote_build(
    ctx: &mut ScenarioContext,
    name: String,
    runtime: Runtime,
    project: String,
    options: BuildOptions,
) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.start_remote_build(&name, runtime, &project, &options).await?;
        Ok(())
    })
}

fn supporting_service(
    ctx: &mut ScenarioContext,
    name: String,
    service_type: String,
    options: SupportingServiceOptions,
) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.deploy_supporting_service(&name, &service_type, &options).await?;
        Ok(())
    })
}

fn bind_infra(
    ctx: &mut ScenarioContext,
    name: String,
    operator: DependencyOperator,
    instance: String,
) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.bind_infra(&name, operator, &instance).await?;
        Ok(())
    })
}

fn runtime_pods(ctx: &mut ScenarioContext, name: String, pods: usize, within: u64) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.wait_runtime_pods(&name, pods, minutes(within)).await?;
        Ok(())
    })
}

fn supporting_service_pods(ctx: &mut ScenarioContext, name: String, pods: usize, within: u64) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.wait_supporting_service_pods(&name, pods, minutes(within)).await?;
        Ok(())
    })
}

fn build_complete(ctx: &mut ScenarioContext, name: String, within: u64) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.wait_build_complete(&name, minutes(within)).await?;
        Ok(())
    })
}

fn service_responds(ctx: &mut ScenarioContext, name: String, path: String, within: u64) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.wait_service_responds(&name, &path, minutes(within)).await?;
        Ok(())
    })
}

fn infra_ready(ctx: &mut ScenarioContext, name: String, within: u64) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.wait_infra_ready(&name, minutes(within)).await?;
        Ok(())
    })
}

fn image_override(ctx: &mut ScenarioContext, role: ImageRole, image: String) -> StepFuture<'_> {
    Box::pin(async move {
        let image = ImageRef::parse(&image).map_err(|e| StepError::from(e).context("image override"))?;
        ctx.override_image(role, image);
        Ok(())
    })
}
