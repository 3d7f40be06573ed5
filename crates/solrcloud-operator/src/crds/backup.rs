use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, HostPathVolumeSource, NFSVolumeSource,
    PersistentVolumeClaimVolumeSource, SecretKeySelector,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A backup repository declaration. Exactly one provider block must be set.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupRepository {
    /// Repository name as referenced from backup and restore requests
    pub name: String,
    pub gcs: Option<GcsRepository>,
    pub s3: Option<S3Repository>,
    pub volume: Option<VolumeRepository>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcsRepository {
    pub bucket: String,
    /// Secret key holding the service account JSON key
    pub gcs_credential_secret: SecretKeySelector,
    pub base_location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3Repository {
    pub region: String,
    pub bucket: String,
    pub endpoint: Option<String>,
    pub proxy_url: Option<String>,
    pub credentials: Option<S3Credentials>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3Credentials {
    pub access_key_id_secret: Option<SecretKeySelector>,
    pub secret_access_key_secret: Option<SecretKeySelector>,
    pub session_token_secret: Option<SecretKeySelector>,
    /// Secret key holding an AWS shared credentials file
    pub credentials_file_secret: Option<SecretKeySelector>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRepository {
    pub source: RepositoryVolumeSource,
    /// Sub-directory of the mount used as repository location
    pub directory: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryVolumeSource {
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,
    pub nfs: Option<NFSVolumeSource>,
    pub host_path: Option<HostPathVolumeSource>,
    pub empty_dir: Option<EmptyDirVolumeSource>,
}
