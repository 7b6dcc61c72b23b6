//! Operator installation from a scenario

use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{ContextError, OperatorInstall, ScenarioContext};
use crate::config::Platform;
use crate::olm::{DependencyOperator, OperatorCatalog, SubscriptionId, OPERATOR_UNDER_TEST};

impl ScenarioContext {
    /// Catalog used for operators the run did not provide a bundle for
    fn public_catalog(&self) -> OperatorCatalog {
        match self.config().platform {
            Platform::OpenShift => OperatorCatalog::community(self.services.olm().marketplace_namespace()),
            Platform::Kubernetes => OperatorCatalog::operator_hub(),
        }
    }

    /// Install the operator under test and wait for it to run
    ///
    /// With a configured catalog image the run-wide custom catalog is used;
    /// it is removed by label when the run finishes. Cluster-wide
    /// subscriptions are removed the same way, so only namespaced ones are
    /// recorded for teardown.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn deploy_kogito_operator(&mut self, cluster_wide: bool) -> Result<SubscriptionId, ContextError> {
        let olm = self.services.olm().clone();
        let catalog = match self.config().operator_catalog_image.clone() {
            Some(image) => {
                olm.create_test_catalog(&image).await?;
                olm.wait_catalog_ready(self.config().timeouts.catalog).await?;
                OperatorCatalog::custom(olm.marketplace_namespace())
            }
            None => self.public_catalog(),
        };
        let channel = self.config().operator_channel.clone();

        let id = if cluster_wide {
            olm.install_cluster_wide(OPERATOR_UNDER_TEST, &channel, &catalog).await?
        } else {
            let id = olm
                .install_namespaced(&self.namespace, OPERATOR_UNDER_TEST, &channel, &catalog)
                .await?;
            self.record_operator(id.clone());
            id
        };

        self.kogito_operator = Some(OperatorInstall {
            namespace: id.namespace.clone(),
            catalog,
        });
        self.wait_kogito_operator(self.config().timeouts.operator).await?;
        Ok(id)
    }

    /// Wait for the operator under test, wherever this scenario installed it
    pub async fn wait_kogito_operator(&self, timeout: Duration) -> Result<(), ContextError> {
        let install = self.kogito_operator.clone().unwrap_or_else(|| OperatorInstall {
            namespace: self.namespace.clone(),
            catalog: match &self.config().operator_catalog_image {
                Some(_) => OperatorCatalog::custom(self.services.olm().marketplace_namespace()),
                None => self.public_catalog(),
            },
        });

        self.services
            .olm()
            .wait_running(&install.namespace, OPERATOR_UNDER_TEST, &install.catalog, timeout)
            .await?;
        info!(namespace = %install.namespace, "Kogito operator running");
        Ok(())
    }

    /// Install a dependency operator into the scenario namespace and wait for it
    #[instrument(skip(self), fields(namespace = %self.namespace, operator = %operator))]
    pub async fn deploy_dependency_operator(
        &mut self,
        operator: DependencyOperator,
    ) -> Result<SubscriptionId, ContextError> {
        let olm = self.services.olm().clone();
        let catalog = self.public_catalog();

        let id = olm
            .install_namespaced(&self.namespace, operator.package(), operator.channel(), &catalog)
            .await?;
        self.record_operator(id.clone());

        olm.wait_running(&self.namespace, operator.package(), &catalog, operator.timeout(self.config()))
            .await?;
        Ok(id)
    }

    /// Install a custom catalog for this scenario only
    ///
    /// A catalog already present (from the run or an earlier scenario) is
    /// reused and left alone at teardown.
    #[instrument(skip(self))]
    pub async fn install_custom_catalog(&mut self, image: &str) -> Result<(), ContextError> {
        let olm = self.services.olm().clone();
        if olm.create_test_catalog(image).await? {
            self.on_teardown("custom catalog", |services| async move {
                services
                    .olm()
                    .delete_test_catalog()
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            });
        } else {
            warn!(image, "Custom catalog already present, reusing it");
        }
        olm.wait_catalog_ready(self.config().timeouts.catalog).await?;
        Ok(())
    }
}
