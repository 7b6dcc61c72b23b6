//! Operator installation phrases

use super::{minutes, RegistryError, StepFuture, StepRegistry};
use crate::context::ScenarioContext;
use crate::olm::DependencyOperator;

pub(super) fn register(registry: &mut StepRegistry) -> Result<(), RegistryError> {
    registry
        .step("Kogito operator is deployed", kogito_operator)?
        .step("Kogito operator is deployed cluster wide", kogito_operator_cluster_wide)?
        .step("(Infinispan|Kafka|Keycloak|MongoDB) operator is deployed", dependency_operator)?
        .step(r"Kogito Operator should be installed within (\d+) minutes?", kogito_operator_within)?
        .step(r#"Custom catalog with image "([^"]*)" is installed"#, custom_catalog)?;
    Ok(())
}

fn kogito_operator(ctx: &mut ScenarioContext) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.deploy_kogito_operator(false).await?;
        Ok(())
    })
}

fn kogito_operator_cluster_wide(ctx: &mut ScenarioContext) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.deploy_kogito_operator(true).await?;
        Ok(())
    })
}

fn dependency_operator(ctx: &mut ScenarioContext, operator: DependencyOperator) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.deploy_dependency_operator(operator).await?;
        Ok(())
    })
}

fn kogito_operator_within(ctx: &mut ScenarioContext, count: u64) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.wait_kogito_operator(minutes(count)).await?;
        Ok(())
    })
}

fn custom_catalog(ctx: &mut ScenarioContext, image: String) -> StepFuture<'_> {
    Box::pin(async move {
        ctx.install_custom_catalog(&image).await?;
        Ok(())
    })
}
