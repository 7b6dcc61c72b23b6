//! Integration tests using the #[kogito_bdd::test] macro

use std::time::Duration;

#[allow(unused_imports)] // Used in macro-expanded function signatures
use kogito_bdd::context::ScenarioContext;
use kogito_bdd::workload::{Runtime, RuntimeOptions};

/// The macro:
/// - Sets up a scenario namespace and workspace
/// - Injects the context as `ctx`
/// - Tears down on success, keeps the namespace on failure
#[kogito_bdd::test(tags = "smoke")]
#[ignore] // Requires real cluster with the operator catalog
async fn test_macro_deploys_runtime(ctx: ScenarioContext) {
    assert!(ctx.has_tag("smoke"));
    ctx.deploy_kogito_operator(false)
        .await
        .expect("Should install the operator");

    let runtime = ctx
        .deploy_runtime("example", Runtime::Quarkus, &RuntimeOptions::default())
        .await
        .expect("Should apply the runtime");
    assert_eq!(runtime.metadata.namespace.as_deref(), Some(ctx.namespace()));

    ctx.wait_runtime_pods("example", 1, Duration::from_secs(600))
        .await
        .expect("Runtime should come up");
}

/// Errors returned from the body fail the test like panics
#[kogito_bdd::test]
#[ignore] // Requires real cluster and network access
async fn test_macro_with_result(ctx: ScenarioContext) -> Result<(), Box<dyn std::error::Error>> {
    let tree = ctx.clone_example_library().await?;
    assert!(tree.starts_with(ctx.workspace()));
    Ok(())
}

/// Without ctx the macro is a plain async test
#[kogito_bdd::test]
async fn test_macro_without_ctx() {
    let namespace = kogito_bdd::context::namespace_for("Macro without ctx");
    assert!(namespace.starts_with("macro-without-ctx-"));
}
