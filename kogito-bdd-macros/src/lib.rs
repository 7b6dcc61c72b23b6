//! Proc macros for kogito-bdd
//!
//! Provides `#[kogito_bdd::test]` for writing scenarios as plain Rust tests.

use proc_macro::TokenStream;
use quote::quote;
use syn::{FnArg, ItemFn, LitStr, Pat, PatType, ReturnType};

/// Attribute macro for scenario tests against a live cluster.
///
/// Connects to the cluster of the current kubeconfig, sets up a
/// `ScenarioContext` named after the test and injects it as `ctx`.
///
/// # Example
///
/// ```ignore
/// use kogito_bdd::context::ScenarioContext;
///
/// #[kogito_bdd::test(tags = "product")]
/// async fn test_runtime_comes_up(ctx: ScenarioContext) {
///     ctx.deploy_kogito_operator(false).await.unwrap();
///     ctx.deploy_runtime("example", Runtime::Quarkus, &RuntimeOptions::default()).await.unwrap();
///     ctx.wait_runtime_pods("example", 1, Duration::from_secs(600)).await.unwrap();
/// }
/// ```
///
/// # With Result Return Type
///
/// ```ignore
/// #[kogito_bdd::test]
/// async fn test_with_result(ctx: ScenarioContext) -> Result<(), Box<dyn std::error::Error>> {
///     ctx.clone_example_library().await?;
///     Ok(())
/// }
/// ```
///
/// # What it does
///
/// 1. Connect with `RunConfig::default()` and set up the context
/// 2. Run the body
/// 3. On success: tear the scenario down
/// 4. On failure: print diagnostics, tear down but keep the namespace
///
/// # Environment Variables
///
/// - `KOGITO_BDD_KEEP_ALL=true` - Skip teardown even on success
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut tags: Option<LitStr> = None;
    let parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("tags") {
            tags = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported kogito_bdd::test argument, expected `tags`"))
        }
    });
    syn::parse_macro_input!(attr with parser);

    let input_fn = syn::parse_macro_input!(item as ItemFn);
    let tags = tags.map(|t| split_tags(&t.value())).unwrap_or_default();
    test_impl(&input_fn, &tags).into()
}

/// Tags from `"a, @b c"`
fn split_tags(input: &str) -> Vec<String> {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|t| t.trim_start_matches('@'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Check if a function has a parameter named "ctx"
fn has_ctx_param(input_fn: &ItemFn) -> bool {
    input_fn.sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(PatType { pat, .. }) = arg {
            if let Pat::Ident(ident) = pat.as_ref() {
                return ident.ident == "ctx";
            }
        }
        false
    })
}

/// Check if a function has an explicit return type (e.g., `-> Result<...>`)
fn has_result_return(input_fn: &ItemFn) -> bool {
    matches!(&input_fn.sig.output, ReturnType::Type(..))
}

/// Inner implementation that works with `proc_macro2` types for testability
fn test_impl(input_fn: &ItemFn, tags: &[String]) -> proc_macro2::TokenStream {
    let fn_name = &input_fn.sig.ident;
    let fn_block = &input_fn.block;
    let fn_vis = &input_fn.vis;
    let fn_attrs = &input_fn.attrs;

    if !has_ctx_param(input_fn) {
        return quote! {
            #(#fn_attrs)*
            #[tokio::test]
            #fn_vis async fn #fn_name() {
                #fn_block
            }
        };
    }

    let scenario = fn_name.to_string();
    let output = &input_fn.sig.output;
    let body = if has_result_return(input_fn) {
        quote! {
            __kogito_bdd_body(&mut ctx).await.map_err(|e| format!("{}", e))
        }
    } else {
        quote! {
            __kogito_bdd_body(&mut ctx).await;
            Ok::<(), String>(())
        }
    };

    quote! {
        #(#fn_attrs)*
        #[tokio::test]
        #fn_vis async fn #fn_name() {
            use futures::FutureExt;
            use std::panic::AssertUnwindSafe;

            async fn __kogito_bdd_body(ctx: &mut kogito_bdd::context::ScenarioContext) #output #fn_block

            kogito_bdd::telemetry::init_logging();
            let services = kogito_bdd::context::Services::connect(kogito_bdd::config::RunConfig::default())
                .await
                .unwrap_or_else(|e| panic!("Failed to connect: {}", e));
            let mut ctx = kogito_bdd::context::ScenarioContext::new(
                std::sync::Arc::new(services),
                #scenario,
                [#(#tags.to_string()),*],
            );
            ctx.setup()
                .await
                .unwrap_or_else(|e| panic!("Failed to set up scenario: {}", e));

            let outcome = AssertUnwindSafe(async { #body })
            .catch_unwind()
            .await;

            match outcome {
                Ok(Ok(())) => {
                    if std::env::var("KOGITO_BDD_KEEP_ALL").is_ok() {
                        eprintln!("[kogito-bdd] KOGITO_BDD_KEEP_ALL set - keeping namespace: {}", ctx.namespace());
                    } else {
                        let report = ctx.teardown(false).await;
                        for issue in &report.issues {
                            eprintln!("[kogito-bdd] Warning: teardown: {}", issue);
                        }
                    }
                }
                failed => {
                    let diagnostics = kogito_bdd::diagnostics::Diagnostics::collect(
                        ctx.gateway(),
                        ctx.scenario(),
                        ctx.namespace(),
                    )
                    .await
                    .kept(true);
                    eprintln!("{}", diagnostics);
                    ctx.teardown(true).await;

                    match failed {
                        Err(panic) => std::panic::resume_unwind(panic),
                        Ok(Err(message)) => panic!("{}", message),
                        Ok(Ok(())) => unreachable!(),
                    }
                }
            }
        }
    }
}
