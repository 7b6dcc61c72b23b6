//! Eventual assertions over workload resources
//!
//! Each check is one [`wait_until`] over a composite predicate: the custom
//! resource's reported status first, then whatever it points at (pods, an
//! exposed URL). A `Failed` condition or a failed build ends the wait early.

use k8s_openapi::api::core::v1::Pod;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{ContextError, ScenarioContext};
use crate::crd::{
    find_condition, has_condition, summarize_conditions, Condition, KogitoBuild, KogitoInfra, KogitoRuntime,
    KogitoSupportingService, CONDITION_CONFIGURED, CONDITION_FAILED,
};
use crate::gateway::{labels, Gateway, Object};
use crate::wait::{wait_until, PollError, ResourceState};

/// Whether `pod` is running with every container ready
pub fn pod_running(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    let containers = status.container_statuses.as_deref().unwrap_or_default();
    status.phase.as_deref() == Some("Running") && !containers.is_empty() && containers.iter().all(|c| c.ready)
}

fn failed(conditions: &[Condition]) -> Option<PollError> {
    let condition = find_condition(conditions, CONDITION_FAILED).filter(|c| c.is_true())?;
    Some(PollError::fatal(
        condition
            .message
            .clone()
            .unwrap_or_else(|| summarize_conditions(conditions)),
    ))
}

/// Poll until exactly `expected` pods labelled `app=<name>` run, after the
/// service resource itself exists and has not failed
async fn service_pods<K: Object>(
    gateway: &Gateway,
    namespace: &str,
    name: &str,
    expected: usize,
    conditions: impl Fn(&K) -> Vec<Condition>,
) -> Result<bool, PollError> {
    let Some(service) = gateway.fetch_by_key::<K>(Some(namespace), name).await? else {
        return Err(PollError::transient(format!("{} {name} not found", K::kind(&()))));
    };
    if let Some(err) = failed(&conditions(&service)) {
        return Err(err);
    }

    let pods: Vec<Pod> = gateway
        .list_with_labels(Some(namespace), &labels([("app", name)]))
        .await?;
    let running = pods.iter().filter(|p| pod_running(p)).count();
    if running == expected {
        return Ok(true);
    }
    let mut state = format!("{running}/{expected} pods running ({} total)", pods.len());
    let pending: Vec<String> = pods
        .iter()
        .filter(|p| !pod_running(p))
        .map(ResourceState::state_description)
        .collect();
    if !pending.is_empty() {
        state = format!("{state}; {}", pending.join("; "));
    }
    Err(PollError::transient(state))
}

impl ScenarioContext {
    /// Wait until runtime `name` has exactly `expected` running pods
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_runtime_pods(&self, name: &str, expected: usize, timeout: Duration) -> Result<(), ContextError> {
        let (gateway, namespace) = (self.gateway(), self.namespace());
        wait_until(format!("runtime {name} has {expected} pods running"), timeout, move || async move {
            service_pods::<KogitoRuntime>(gateway, namespace, name, expected, |r| {
                r.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default()
            })
            .await
        })
        .interval(self.config().poll_interval)
        .cancel_on(self.services.cancel_token())
        .await_condition()
        .await?;
        Ok(())
    }

    /// Wait until supporting service `name` has exactly `expected` running pods
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_supporting_service_pods(
        &self,
        name: &str,
        expected: usize,
        timeout: Duration,
    ) -> Result<(), ContextError> {
        let (gateway, namespace) = (self.gateway(), self.namespace());
        wait_until(
            format!("supporting service {name} has {expected} pods running"),
            timeout,
            move || async move {
                service_pods::<KogitoSupportingService>(gateway, namespace, name, expected, |s| {
                    s.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default()
                })
                .await
            },
        )
        .interval(self.config().poll_interval)
        .cancel_on(self.services.cancel_token())
        .await_condition()
        .await?;
        Ok(())
    }

    /// Wait until build `name` reports a complete platform build
    ///
    /// A failed, errored or cancelled platform build fails immediately.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_build_complete(&self, name: &str, timeout: Duration) -> Result<(), ContextError> {
        let (gateway, namespace) = (self.gateway(), self.namespace());
        wait_until(format!("build {name} completes"), timeout, move || async move {
            let Some(build) = gateway.fetch_by_key::<KogitoBuild>(Some(namespace), name).await? else {
                return Err(PollError::transient(format!("KogitoBuild {name} not found")));
            };
            let status = build.status.unwrap_or_default();
            let unsuccessful = status.builds.unsuccessful();
            if !unsuccessful.is_empty() {
                return Err(PollError::fatal(format!("builds {} did not succeed", unsuccessful.join(", "))));
            }
            if !status.builds.complete.is_empty() {
                return Ok(true);
            }
            Err(PollError::transient(status.builds.summary()))
        })
        .interval(self.config().poll_interval)
        .cancel_on(self.services.cancel_token())
        .await_condition()
        .await?;
        Ok(())
    }

    /// Wait until a GET to `path` on the service's external URL returns 2xx
    ///
    /// `name` may be a runtime or a supporting service.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_service_responds(&self, name: &str, path: &str, timeout: Duration) -> Result<(), ContextError> {
        let (gateway, namespace, probe) = (self.gateway(), self.namespace(), self.services.probe());
        wait_until(format!("service {name} responds at {path}"), timeout, move || async move {
            let status = match gateway.fetch_by_key::<KogitoRuntime>(Some(namespace), name).await? {
                Some(runtime) => runtime.status,
                None => gateway
                    .fetch_by_key::<KogitoSupportingService>(Some(namespace), name)
                    .await?
                    .and_then(|s| s.status),
            };
            let Some(base) = status.and_then(|s| s.external_uri).filter(|u| !u.is_empty()) else {
                return Err(PollError::transient(format!("{name} exposes no URL yet")));
            };

            let url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
            match probe.get(&url).await {
                Ok(code) if (200..300).contains(&code) => Ok(true),
                Ok(code) => Err(PollError::transient(format!("GET {url} returned {code}"))),
                Err(e) => Err(PollError::transient(format!("GET {url}: {e}"))),
            }
        })
        .interval(self.config().poll_interval)
        .cancel_on(self.services.cancel_token())
        .await_condition()
        .await?;
        Ok(())
    }

    /// Wait until infra binding `name` reports `Configured`
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn wait_infra_ready(&self, name: &str, timeout: Duration) -> Result<(), ContextError> {
        let (gateway, namespace) = (self.gateway(), self.namespace());
        wait_until(format!("infra {name} configured"), timeout, move || async move {
            let Some(infra) = gateway.fetch_by_key::<KogitoInfra>(Some(namespace), name).await? else {
                return Err(PollError::transient(format!("KogitoInfra {name} not found")));
            };
            let conditions = infra.status.map(|s| s.conditions).unwrap_or_default();
            if let Some(err) = failed(&conditions) {
                return Err(err);
            }
            if has_condition(&conditions, CONDITION_CONFIGURED) {
                return Ok(true);
            }
            debug!(infra = name, "Infra not configured yet");
            Err(PollError::transient(summarize_conditions(&conditions)))
        })
        .interval(self.config().poll_interval)
        .cancel_on(self.services.cancel_token())
        .await_condition()
        .await?;
        Ok(())
    }
}
