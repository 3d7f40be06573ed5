//! Desired-state generation for a [`SolrCloud`].
//!
//! [`generate_artifacts`] is synchronous and performs no I/O: everything it
//! needs from the cluster (coordination status, persisted secrets, provided
//! config maps) arrives through a [`ClusterSnapshot`], and the caller applies
//! what comes out.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, PodSpec, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::ObjectMeta;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::crds::cloud::{SolrCloud, SolrCloudStatus};
use crate::error::GenerateError;

pub mod addressability;
pub mod backup;
pub mod configmap;
pub mod ingress;
pub mod labels;
pub mod overrides;
pub mod security;
pub mod services;
pub mod statefulset;
pub mod storage;
pub mod tls;
pub mod zookeeper;

pub const CLIENT_PORT_NAME: &str = "solr-client";
pub const SOLR_CONTAINER: &str = "solrcloud-node";

/// Secrets already persisted for a cluster, as observed by the caller
#[derive(Debug, Clone, Default)]
pub struct PersistedSecrets {
    pub basic_auth: Option<Secret>,
    pub bootstrap: Option<Secret>,
    /// The secret named by `solrSecurity.basicAuthSecret`, when one is configured
    pub user_basic_auth: Option<Secret>,
}

/// A user supplied config map holding `solr.xml`, `log4j2.xml` or both.
/// Each digest is present only when the config map carries that file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProvidedConfig {
    pub config_map: String,
    pub solr_xml_digest: Option<String>,
    pub log_xml_digest: Option<String>,
}

impl ProvidedConfig {
    pub fn has_solr_xml(&self) -> bool {
        self.solr_xml_digest.is_some()
    }
}

/// Everything the engine reads besides the resource itself
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub status: SolrCloudStatus,
    pub secrets: PersistedSecrets,
    /// Host name to IP, added to every pod's hosts file
    pub host_aliases: BTreeMap<String, String>,
    pub provided_config: Option<ProvidedConfig>,
    pub tls_cert_digest: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedArtifacts {
    pub stateful_set: StatefulSet,
    pub config_map: ConfigMap,
    pub common_service: Service,
    pub headless_service: Service,
    pub node_services: Vec<Service>,
    pub ingress: Option<Ingress>,
    pub basic_auth_secret: Option<Secret>,
    pub bootstrap_secret: Option<Secret>,
    /// Secrets were produced in this pass and must be created, not replaced
    pub secrets_generated: bool,
}

/// Derive every object a cluster needs from its spec and the observed snapshot.
pub fn generate_artifacts<R: Rng + ?Sized>(
    cloud: &SolrCloud,
    snapshot: &ClusterSnapshot,
    rng: &mut R,
) -> Result<GeneratedArtifacts, GenerateError> {
    let security = security::bootstrap(cloud, &snapshot.secrets, rng)?;
    let bindings = backup::bind_all(&cloud.spec.backup_repositories)?;
    let solr_xml = configmap::solr_xml(&bindings);
    let config_map = configmap::config_map(cloud, &solr_xml);

    let mut stateful_set =
        statefulset::assemble(cloud, snapshot, &bindings, security.as_ref(), &solr_xml);
    if let Some(tls) = &cloud.spec.solr_tls {
        stateful_set = tls::with_tls(stateful_set, tls, snapshot.tls_cert_digest.as_deref())?;
    }
    stateful_set = tls::with_secure_probes(stateful_set, cloud);
    if let Some(pod_options) = &cloud.spec.custom_solr_kube_options.pod_options {
        stateful_set = overrides::apply(stateful_set, pod_options);
    }

    let (basic_auth_secret, bootstrap_secret, secrets_generated) = match security {
        Some(s) => (s.basic_auth, s.bootstrap, s.generated),
        None => (None, None, false),
    };
    let artifacts = GeneratedArtifacts {
        stateful_set,
        config_map,
        common_service: services::common_service(cloud),
        headless_service: services::headless_service(cloud),
        node_services: services::node_services(cloud),
        ingress: ingress::ingress(cloud),
        basic_auth_secret,
        bootstrap_secret,
        secrets_generated,
    };
    debug!(
        cloud = %cloud.metadata.name.as_deref().unwrap_or_default(),
        node_services = artifacts.node_services.len(),
        ingress = artifacts.ingress.is_some(),
        "generated artifacts"
    );
    Ok(artifacts)
}

pub fn owner_ref(cloud: &SolrCloud) -> OwnerReference {
    OwnerReference {
        api_version: "solr.operator.dev/v1beta1".into(),
        kind: "SolrCloud".into(),
        name: cloud.metadata.name.clone().unwrap_or_default(),
        uid: cloud.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata of a generated object, owned by `cloud` and living in its namespace
pub fn object_meta(
    cloud: &SolrCloud,
    name: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: cloud.metadata.namespace.clone(),
        labels: Some(labels),
        annotations: (!annotations.is_empty()).then_some(annotations),
        owner_references: Some(vec![owner_ref(cloud)]),
        ..Default::default()
    }
}

/// Hex SHA-256 of `content`, recorded in annotations to trigger rollouts
pub fn digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn pod_spec_mut(sts: &mut StatefulSet) -> Option<&mut PodSpec> {
    sts.spec.as_mut()?.template.spec.as_mut()
}

pub(crate) fn main_container_mut(pod: &mut PodSpec) -> Option<&mut Container> {
    pod.containers.iter_mut().find(|c| c.name == SOLR_CONTAINER)
}

/// Insert `vars` ahead of SOLR_OPTS, which has to stay last so it can
/// reference every other variable.
pub(crate) fn insert_env_before_opts(container: &mut Container, vars: Vec<EnvVar>) {
    let env = container.env.get_or_insert_with(Vec::new);
    let at = env
        .iter()
        .position(|e| e.name == "SOLR_OPTS")
        .unwrap_or(env.len());
    env.splice(at..at, vars);
}
