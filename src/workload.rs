//! Workload options and the resources built from them
//!
//! Each option struct is what a step table decodes into. The builders turn
//! options plus resolved images into the custom resources the operator
//! reconciles; they do not touch the cluster.

use async_trait::async_trait;
use kube::api::ObjectMeta;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::crd::{
    env_vars, GitSource, InfraResource, KogitoBuild, KogitoBuildSpec, KogitoInfra, KogitoInfraSpec,
    KogitoRuntime, KogitoRuntimeSpec, KogitoSupportingService, KogitoSupportingServiceSpec,
    BUILD_TYPE_BINARY, BUILD_TYPE_REMOTE_SOURCE,
};
use crate::image::ImageRef;
use crate::olm::DependencyOperator;
use crate::steps::table::{OptionField, TableOptions};

/// Application runtime of a Kogito service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runtime {
    Quarkus,
    SpringBoot,
}

impl Runtime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Runtime::Quarkus => "quarkus",
            Runtime::SpringBoot => "springboot",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quarkus" => Ok(Runtime::Quarkus),
            "springboot" | "spring-boot" => Ok(Runtime::SpringBoot),
            other => Err(format!("unknown runtime '{other}' (expected quarkus or springboot)")),
        }
    }
}

/// Table options of "Deploy <runtime> runtime"
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RuntimeOptions {
    /// Explicit image; otherwise the runtime role is resolved
    pub image: Option<String>,
    pub replicas: Option<i64>,
    pub native: bool,
    pub env: BTreeMap<String, String>,
    pub label: BTreeMap<String, String>,
    pub config: BTreeMap<String, String>,
    pub infra: Vec<String>,
}

impl TableOptions for RuntimeOptions {
    const FIELDS: &'static [OptionField] = &[
        OptionField::text("image"),
        OptionField::int("replicas"),
        OptionField::flag("native"),
        OptionField::nested("env"),
        OptionField::nested("label"),
        OptionField::nested("config"),
        OptionField::repeated("infra"),
    ];
}

/// Table options of "Start remote build"
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BuildOptions {
    pub git_uri: Option<String>,
    pub git_reference: Option<String>,
    pub native: bool,
    pub maven_mirror_url: Option<String>,
    pub env: BTreeMap<String, String>,
}

impl TableOptions for BuildOptions {
    const FIELDS: &'static [OptionField] = &[
        OptionField::text("git-uri"),
        OptionField::text("git-reference"),
        OptionField::flag("native"),
        OptionField::text("maven-mirror-url"),
        OptionField::nested("env"),
    ];
}

/// Table options of "Build binary ... from kie-asset-library target folder"
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BinaryBuildOptions {
    pub native: bool,
    pub env: BTreeMap<String, String>,
}

impl TableOptions for BinaryBuildOptions {
    const FIELDS: &'static [OptionField] = &[OptionField::flag("native"), OptionField::nested("env")];
}

/// Table options of "Deploy supporting service"
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SupportingServiceOptions {
    pub replicas: Option<i64>,
    pub image: Option<String>,
    pub infra: Vec<String>,
}

impl TableOptions for SupportingServiceOptions {
    const FIELDS: &'static [OptionField] = &[
        OptionField::int("replicas"),
        OptionField::text("image"),
        OptionField::repeated("infra"),
    ];
}

/// Table options of a maven build of a local project
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MavenOptions {
    pub profile: Vec<String>,
    pub native: bool,
    pub options: Vec<String>,
    pub skip_tests: bool,
}

impl TableOptions for MavenOptions {
    const FIELDS: &'static [OptionField] = &[
        OptionField::repeated("profile"),
        OptionField::flag("native"),
        OptionField::repeated("options"),
        OptionField::flag("skip-tests"),
    ];
}

impl MavenOptions {
    /// Arguments after the goals
    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.profile.is_empty() {
            args.push(format!("-P{}", self.profile.join(",")));
        }
        if self.native {
            args.push("-Dnative".to_string());
        }
        args.extend(self.options.iter().cloned());
        args
    }
}

fn meta(namespace: &str, name: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: (!labels.is_empty()).then(|| labels.clone()),
        ..Default::default()
    }
}

fn replicas(value: Option<i64>) -> Option<i32> {
    value.map(|n| n.clamp(0, i64::from(i32::MAX)) as i32)
}

pub fn runtime_resource(
    namespace: &str,
    name: &str,
    runtime: Runtime,
    image: &ImageRef,
    options: &RuntimeOptions,
) -> KogitoRuntime {
    KogitoRuntime {
        metadata: meta(namespace, name, &options.label),
        spec: KogitoRuntimeSpec {
            runtime: runtime.to_string(),
            replicas: replicas(options.replicas),
            image: Some(image.to_string()),
            env: env_vars(&options.env),
            config: options.config.clone(),
            infra: options.infra.clone(),
        },
        status: None,
    }
}

/// Images and source a build runs with, resolved by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInputs {
    pub builder_image: ImageRef,
    pub runtime_image: ImageRef,
    pub git_uri: String,
    pub git_reference: String,
    pub maven_mirror_url: Option<String>,
}

pub fn remote_build_resource(
    namespace: &str,
    name: &str,
    runtime: Runtime,
    project: &str,
    inputs: &BuildInputs,
    options: &BuildOptions,
) -> KogitoBuild {
    KogitoBuild {
        metadata: meta(namespace, name, &BTreeMap::new()),
        spec: KogitoBuildSpec {
            r#type: BUILD_TYPE_REMOTE_SOURCE.to_string(),
            runtime: runtime.to_string(),
            native: options.native,
            git_source: Some(GitSource {
                uri: inputs.git_uri.clone(),
                reference: Some(inputs.git_reference.clone()).filter(|r| !r.is_empty()),
                context_dir: Some(project.to_string()).filter(|p| !p.is_empty()),
            }),
            maven_mirror_url: inputs.maven_mirror_url.clone(),
            build_image: Some(inputs.builder_image.to_string()),
            runtime_image: Some(inputs.runtime_image.to_string()),
            env: env_vars(&options.env),
        },
        status: None,
    }
}

pub fn binary_build_resource(
    namespace: &str,
    name: &str,
    runtime: Runtime,
    runtime_image: &ImageRef,
    options: &BinaryBuildOptions,
) -> KogitoBuild {
    KogitoBuild {
        metadata: meta(namespace, name, &BTreeMap::new()),
        spec: KogitoBuildSpec {
            r#type: BUILD_TYPE_BINARY.to_string(),
            runtime: runtime.to_string(),
            native: options.native,
            runtime_image: Some(runtime_image.to_string()),
            env: env_vars(&options.env),
            ..Default::default()
        },
        status: None,
    }
}

pub fn supporting_service_resource(
    namespace: &str,
    name: &str,
    service_type: &str,
    options: &SupportingServiceOptions,
) -> KogitoSupportingService {
    KogitoSupportingService {
        metadata: meta(namespace, name, &BTreeMap::new()),
        spec: KogitoSupportingServiceSpec {
            service_type: service_type.to_string(),
            replicas: replicas(options.replicas),
            image: options.image.clone(),
            infra: options.infra.clone(),
        },
        status: None,
    }
}

pub fn infra_resource(namespace: &str, name: &str, operator: DependencyOperator, instance: &str) -> KogitoInfra {
    let (api_version, kind) = operator.instance_api();
    KogitoInfra {
        metadata: meta(namespace, name, &BTreeMap::new()),
        spec: KogitoInfraSpec {
            resource: Some(InfraResource {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                name: instance.to_string(),
                namespace: None,
            }),
        },
        status: None,
    }
}

/// HTTP check used by "responds at path" assertions
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// Status code of a GET to `url`; `Err` for connection-level failures
    async fn get(&self, url: &str) -> Result<u16, String>;
}

/// [`HttpProbe`] backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    pub fn new(request_timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, url: &str) -> Result<u16, String> {
        self.client
            .get(url)
            .send()
            .await
            .map(|response| response.status().as_u16())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::table::DataTable;

    fn image() -> ImageRef {
        ImageRef::parse("quay.io/kiegroup/kogito-runtime-jvm:2.0.0").unwrap()
    }

    #[test]
    fn test_runtime_options_from_table() {
        let table = DataTable::new(vec![
            vec!["replicas".into(), "2".into()],
            vec!["native".into(), "disabled".into()],
            vec!["env".into(), "JAVA_OPTS".into(), "-Xmx1g".into()],
            vec!["label".into(), "team".into(), "bdd".into()],
            vec!["infra".into(), "kafka-infra".into()],
        ]);
        let options = RuntimeOptions::from_table(&table).unwrap();
        let resource = runtime_resource("s1", "example", Runtime::Quarkus, &image(), &options);

        assert_eq!(resource.spec.runtime, "quarkus");
        assert_eq!(resource.spec.replicas, Some(2));
        assert_eq!(resource.spec.image.as_deref(), Some("quay.io/kiegroup/kogito-runtime-jvm:2.0.0"));
        assert_eq!(resource.spec.env[0].name, "JAVA_OPTS");
        assert_eq!(resource.spec.infra, vec!["kafka-infra"]);
        assert_eq!(resource.metadata.labels.unwrap()["team"], "bdd");
    }

    #[test]
    fn test_maven_arguments() {
        let options = MavenOptions::from_table(&DataTable::from([
            ["profile", "dmn"],
            ["profile", "process"],
            ["native", "true"],
            ["options", "-Dversion.org.kie=1.0"],
        ]))
        .unwrap();
        assert_eq!(
            options.arguments(),
            vec!["-Pdmn,process", "-Dnative", "-Dversion.org.kie=1.0"]
        );
        assert!(!options.skip_tests);
    }

    #[test]
    fn test_remote_build_points_at_project_dir() {
        let inputs = BuildInputs {
            builder_image: ImageRef::parse("quay.io/kiegroup/kogito-builder:2.0.0").unwrap(),
            runtime_image: image(),
            git_uri: "https://github.com/kiegroup/kogito-examples".into(),
            git_reference: "main".into(),
            maven_mirror_url: None,
        };
        let build = remote_build_resource(
            "s1",
            "example",
            Runtime::SpringBoot,
            "process-springboot-example",
            &inputs,
            &BuildOptions::default(),
        );
        assert_eq!(build.spec.r#type, "RemoteSource");
        assert_eq!(build.spec.runtime, "springboot");
        let source = build.spec.git_source.unwrap();
        assert_eq!(source.context_dir.as_deref(), Some("process-springboot-example"));
        assert_eq!(source.reference.as_deref(), Some("main"));
    }

    #[test]
    fn test_infra_binds_dependency_instance() {
        let infra = infra_resource("s1", "kafka", DependencyOperator::Kafka, "my-kafka");
        let resource = infra.spec.resource.unwrap();
        assert_eq!(resource.kind, "Kafka");
        assert_eq!(resource.api_version, "kafka.strimzi.io/v1beta2");
        assert_eq!(resource.name, "my-kafka");
    }

    #[test]
    fn test_runtime_parsing() {
        assert_eq!("quarkus".parse::<Runtime>().unwrap(), Runtime::Quarkus);
        assert_eq!("springboot".parse::<Runtime>().unwrap(), Runtime::SpringBoot);
        assert!("micronaut".parse::<Runtime>().is_err());
    }
}
