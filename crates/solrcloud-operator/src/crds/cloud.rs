use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, EnvVar, HostPathVolumeSource, PersistentVolumeClaimSpec,
    SecretKeySelector,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::backup::BackupRepository;
use super::options::CustomKubeOptions;

/// Value of the `technology` label carried by every object generated for a SolrCloud.
pub const TECHNOLOGY: &str = "solr-cloud";

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[kube(
    group = "solr.operator.dev",
    version = "v1beta1",
    kind = "SolrCloud",
    plural = "solrclouds",
    namespaced,
    status = "SolrCloudStatus",
    shortname = "solr"
)]
#[serde(rename_all = "camelCase")]
pub struct SolrCloudSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub solr_image: ContainerImage,
    /// Minimal image used by the volume preparation init container
    #[serde(default = "ContainerImage::busybox")]
    pub busy_box_image: ContainerImage,
    #[serde(default)]
    pub storage_options: StorageOptions,
    #[serde(default)]
    pub solr_addressability: AddressabilityOptions,
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
    pub zookeeper_ref: Option<ZookeeperRef>,
    /// Heap settings, e.g. "-Xms1g -Xmx2g"
    #[serde(default)]
    pub solr_java_mem: String,
    #[serde(default = "default_log_level")]
    pub solr_log_level: String,
    #[serde(default, rename = "solrGCTune")]
    pub solr_gc_tune: String,
    /// Extra JVM options appended to SOLR_OPTS
    #[serde(default)]
    pub solr_opts: String,
    pub solr_tls: Option<TlsOptions>,
    pub solr_security: Option<SecurityOptions>,
    #[serde(default)]
    pub backup_repositories: Vec<BackupRepository>,
    #[serde(default)]
    pub custom_solr_kube_options: CustomKubeOptions,
}

fn default_replicas() -> i32 {
    3
}
fn default_log_level() -> String {
    "INFO".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImage {
    pub repository: String,
    pub tag: String,
    pub pull_policy: Option<String>,
    /// Name of an image pull secret for this image
    pub image_pull_secret: Option<String>,
}

impl Default for ContainerImage {
    fn default() -> Self {
        Self {
            repository: "library/solr".into(),
            tag: "8.11".into(),
            pull_policy: None,
            image_pull_secret: None,
        }
    }
}

impl ContainerImage {
    fn busybox() -> Self {
        Self {
            repository: "library/busybox".into(),
            tag: "1.36.1-glibc".into(),
            pull_policy: None,
            image_pull_secret: None,
        }
    }

    pub fn image_name(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageOptions {
    pub persistent_storage: Option<PersistentStorage>,
    pub ephemeral_storage: Option<EphemeralStorage>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentStorage {
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    #[serde(default)]
    pub persistent_volume_claim_template: PersistentVolumeClaimTemplate,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, JsonSchema, PartialEq, Eq)]
pub enum ReclaimPolicy {
    #[default]
    Retain,
    Delete,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimTemplate {
    #[serde(default)]
    pub metadata: TemplateMeta,
    #[serde(default)]
    pub spec: PersistentVolumeClaimSpec,
}

/// The subset of object metadata a user may set on a claim template
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMeta {
    pub name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralStorage {
    pub host_path: Option<HostPathVolumeSource>,
    pub empty_dir: Option<EmptyDirVolumeSource>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressabilityOptions {
    pub external: Option<ExternalAddressability>,
    #[serde(default = "default_pod_port")]
    pub pod_port: i32,
    #[serde(default = "default_common_service_port")]
    pub common_service_port: i32,
    /// Cluster DNS domain, appended to internal host names when set
    pub kube_domain: Option<String>,
}

impl Default for AddressabilityOptions {
    fn default() -> Self {
        Self {
            external: None,
            pod_port: default_pod_port(),
            common_service_port: default_common_service_port(),
            kube_domain: None,
        }
    }
}

fn default_pod_port() -> i32 {
    8983
}
fn default_common_service_port() -> i32 {
    80
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAddressability {
    pub method: ExternalMethod,
    /// Advertise the external per-node address inside the cluster state
    #[serde(default)]
    pub use_external_address: bool,
    #[serde(default)]
    pub hide_common: bool,
    #[serde(default)]
    pub hide_nodes: bool,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub additional_domain_names: Vec<String>,
    pub node_port_override: Option<i32>,
    /// Secret holding the certificate used to terminate TLS at the ingress
    pub ingress_tls_termination_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, JsonSchema, PartialEq, Eq)]
pub enum ExternalMethod {
    Ingress,
    ExternalDNS,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStrategy {
    #[serde(default)]
    pub method: UpdateMethod,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, JsonSchema, PartialEq, Eq)]
pub enum UpdateMethod {
    /// Rollouts are driven by the operator, pod by pod
    #[default]
    Managed,
    /// Rollouts are delegated to the StatefulSet rolling update
    StatefulSet,
    Manual,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperRef {
    /// An externally managed ensemble
    pub connection_info: Option<ZookeeperConnectionInfo>,
    /// An ensemble provisioned by the cooperating zookeeper controller
    pub provided: Option<ProvidedZookeeper>,
}

impl ZookeeperRef {
    /// ACL credentials for all-access and read-only digests, in that order
    pub fn acls(&self) -> (Option<&ZookeeperAcl>, Option<&ZookeeperAcl>) {
        if let Some(info) = &self.connection_info {
            (info.acl.as_ref(), info.read_only_acl.as_ref())
        } else if let Some(provided) = &self.provided {
            (provided.acl.as_ref(), provided.read_only_acl.as_ref())
        } else {
            (None, None)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperConnectionInfo {
    pub internal_connection_string: String,
    pub external_connection_string: Option<String>,
    pub chroot: Option<String>,
    pub acl: Option<ZookeeperAcl>,
    pub read_only_acl: Option<ZookeeperAcl>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvidedZookeeper {
    pub chroot: Option<String>,
    pub replicas: Option<i32>,
    pub acl: Option<ZookeeperAcl>,
    pub read_only_acl: Option<ZookeeperAcl>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperAcl {
    pub secret: String,
    pub username_key: String,
    pub password_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    /// PKCS12 keystore held in a secret
    pub pkcs12_secret: Option<SecretKeySelector>,
    pub key_store_password_secret: Option<SecretKeySelector>,
    pub trust_store_secret: Option<SecretKeySelector>,
    pub trust_store_password_secret: Option<SecretKeySelector>,
    /// Keystore material mounted into the pod by an external agent
    #[serde(rename = "mountedTLSDir")]
    pub mounted_tls_dir: Option<MountedTlsDirectory>,
    #[serde(default)]
    pub client_auth: ClientAuth,
    #[serde(default)]
    pub verify_client_hostname: bool,
    #[serde(default)]
    pub check_peer_name: bool,
    /// Let the server pick up renewed certificates without a restart
    #[serde(default)]
    pub hot_reload: bool,
    #[serde(default)]
    pub restart_on_tls_secret_update: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MountedTlsDirectory {
    pub path: String,
    #[serde(default = "default_keystore_file")]
    pub keystore_file: String,
    #[serde(default = "default_keystore_password_file")]
    pub keystore_password_file: String,
    pub truststore_file: Option<String>,
    pub truststore_password_file: Option<String>,
}

fn default_keystore_file() -> String {
    "keystore.p12".into()
}
fn default_keystore_password_file() -> String {
    "keystore-password".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, JsonSchema, PartialEq, Eq)]
pub enum ClientAuth {
    #[default]
    None,
    Want,
    Need,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityOptions {
    /// Existing secret of type kubernetes.io/basic-auth; disables bootstrapping
    pub basic_auth_secret: Option<String>,
    #[serde(default)]
    pub probes_require_auth: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SolrCloudStatus {
    pub zookeeper_connection_info: Option<ZookeeperConnectionStatus>,
    pub internal_common_address: Option<String>,
    pub external_common_address: Option<String>,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperConnectionStatus {
    pub internal_connection_string: String,
    pub external_connection_string: Option<String>,
    pub chroot: Option<String>,
}

impl SolrCloud {
    fn base_name(&self) -> String {
        self.metadata.name.clone().unwrap_or_default()
    }

    pub fn stateful_set_name(&self) -> String {
        format!("{}-solrcloud", self.base_name())
    }

    pub fn headless_service_name(&self) -> String {
        format!("{}-solrcloud-headless", self.base_name())
    }

    pub fn common_service_name(&self) -> String {
        format!("{}-solrcloud-common", self.base_name())
    }

    pub fn config_map_name(&self) -> String {
        format!("{}-solrcloud-configmap", self.base_name())
    }

    pub fn ingress_name(&self) -> String {
        format!("{}-solrcloud-common", self.base_name())
    }

    pub fn basic_auth_secret_name(&self) -> String {
        match self
            .spec
            .solr_security
            .as_ref()
            .and_then(|s| s.basic_auth_secret.as_ref())
        {
            Some(name) => name.clone(),
            None => format!("{}-solrcloud-basic-auth", self.base_name()),
        }
    }

    pub fn security_bootstrap_secret_name(&self) -> String {
        format!("{}-solrcloud-security-bootstrap", self.base_name())
    }

    /// Names of the pods the workload will run, in ordinal order
    pub fn pod_names(&self) -> Vec<String> {
        let sts = self.stateful_set_name();
        (0..self.spec.replicas.max(0))
            .map(|i| format!("{}-{}", sts, i))
            .collect()
    }

    /// Labels identifying this cluster instance, also used as pod selector
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (String::from("solr-cloud"), self.base_name()),
            (String::from("technology"), TECHNOLOGY.to_string()),
        ])
    }

    pub fn url_scheme(&self) -> &'static str {
        if self.spec.solr_tls.is_some() {
            "https"
        } else {
            "http"
        }
    }

    pub fn custom_env(&self) -> &[EnvVar] {
        self.spec
            .custom_solr_kube_options
            .pod_options
            .as_ref()
            .map(|p| p.env_variables.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_fields() {
        let spec: SolrCloudSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.solr_log_level, "INFO");
        assert_eq!(spec.solr_addressability.pod_port, 8983);
        assert_eq!(spec.solr_addressability.common_service_port, 80);
        assert_eq!(spec.update_strategy.method, UpdateMethod::Managed);
        assert_eq!(spec.busy_box_image.repository, "library/busybox");
    }

    #[test]
    fn derived_names_share_the_cluster_prefix() {
        let spec: SolrCloudSpec =
            serde_json::from_value(serde_json::json!({"replicas": 2})).unwrap();
        let cloud = SolrCloud::new("search", spec);
        assert_eq!(cloud.stateful_set_name(), "search-solrcloud");
        assert_eq!(cloud.headless_service_name(), "search-solrcloud-headless");
        assert_eq!(cloud.common_service_name(), "search-solrcloud-common");
        assert_eq!(cloud.config_map_name(), "search-solrcloud-configmap");
        assert_eq!(
            cloud.pod_names(),
            vec!["search-solrcloud-0", "search-solrcloud-1"]
        );
        assert_eq!(cloud.basic_auth_secret_name(), "search-solrcloud-basic-auth");
    }
}
