use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, Lifecycle, LocalObjectReference, PodSecurityContext, Probe,
    ResourceRequirements, Toleration, Volume, VolumeMount,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// User overrides, scoped per generated object kind
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomKubeOptions {
    pub pod_options: Option<PodOptions>,
    pub stateful_set_options: Option<StatefulSetOptions>,
    pub common_service_options: Option<MetaOptions>,
    pub headless_service_options: Option<MetaOptions>,
    pub node_service_options: Option<MetaOptions>,
    pub config_map_options: Option<ConfigMapOptions>,
    pub ingress_options: Option<IngressOptions>,
}

/// Labels and annotations merged over the generated defaults
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetaOptions {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetOptions {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// "Parallel" or "OrderedReady"
    pub pod_management_policy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapOptions {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Existing config map carrying a custom log4j2.xml
    pub provided_config_map: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressOptions {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub ingress_class_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodOptions {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub affinity: Option<Affinity>,
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub volumes: Vec<AdditionalVolume>,
    pub pod_security_context: Option<PodSecurityContext>,
    #[serde(default)]
    pub env_variables: Vec<EnvVar>,
    pub tolerations: Option<Vec<Toleration>>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub liveness_probe: Option<Probe>,
    pub readiness_probe: Option<Probe>,
    pub startup_probe: Option<Probe>,
    pub lifecycle: Option<Lifecycle>,
    pub priority_class_name: Option<String>,
    #[serde(default)]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    #[serde(default)]
    pub init_containers: Vec<Container>,
    #[serde(default)]
    pub sidecar_containers: Vec<Container>,
    pub service_account_name: Option<String>,
    pub termination_grace_period_seconds: Option<i64>,
}

impl PodOptions {
    /// HTTP paths of user supplied probes: readiness, liveness, startup
    pub fn custom_probe_paths(&self) -> Vec<String> {
        [
            &self.readiness_probe,
            &self.liveness_probe,
            &self.startup_probe,
        ]
        .into_iter()
        .flatten()
        .filter_map(|p| p.http_get.as_ref().and_then(|h| h.path.clone()))
        .collect()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalVolume {
    /// Volume added to the pod as-is
    pub volume: Volume,
    /// When set, mounted into the main container under the volume's name
    pub default_container_mount: Option<VolumeMount>,
}
