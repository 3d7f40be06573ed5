//! Bindings that make declared backup repositories usable by the search nodes.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, KeyToPath, SecretKeySelector, SecretVolumeSource, Volume, VolumeMount,
};

use super::storage::DATA_MOUNT_PATH;
use super::zookeeper::plain_env;
use crate::crds::backup::{BackupRepository, GcsRepository, S3Repository, VolumeRepository};
use crate::error::GenerateError;

const GCS_LIBS: &[&str] = &["/opt/solr/contrib/gcs-repository/lib", "/opt/solr/dist"];
const S3_LIBS: &[&str] = &["/opt/solr/contrib/s3-repository/lib", "/opt/solr/dist"];
const GCS_KEY_FILE: &str = "service-account-key.json";
const S3_CREDENTIALS_FILE: &str = "credentials";

/// Provider of a declared repository
#[derive(Debug, Clone, Copy)]
pub enum RepositoryKind<'a> {
    Gcs(&'a GcsRepository),
    S3(&'a S3Repository),
    Volume(&'a VolumeRepository),
}

impl<'a> RepositoryKind<'a> {
    pub fn of(repo: &'a BackupRepository) -> Result<Self, GenerateError> {
        match (&repo.gcs, &repo.s3, &repo.volume) {
            (Some(gcs), None, None) => Ok(Self::Gcs(gcs)),
            (None, Some(s3), None) => Ok(Self::S3(s3)),
            (None, None, Some(volume)) => Ok(Self::Volume(volume)),
            _ => Err(GenerateError::UnrecognizedBackupRepository {
                name: repo.name.clone(),
            }),
        }
    }
}

/// Everything one repository contributes to the workload and solr.xml
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryBinding {
    pub volume: Option<Volume>,
    pub mount: Option<VolumeMount>,
    pub env: Vec<EnvVar>,
    pub xml: String,
    pub libs: &'static [&'static str],
    /// Mount needs its ownership fixed before the server starts
    pub managed: bool,
}

pub fn volume_name(repo: &BackupRepository) -> String {
    format!("backup-repository-{}", repo.name)
}

pub fn mount_path(repo: &BackupRepository) -> String {
    format!("{}/backup-restore/{}", DATA_MOUNT_PATH, repo.name)
}

pub fn bind(repo: &BackupRepository) -> Result<RepositoryBinding, GenerateError> {
    let binding = match RepositoryKind::of(repo)? {
        RepositoryKind::Gcs(gcs) => bind_gcs(repo, gcs),
        RepositoryKind::S3(s3) => bind_s3(repo, s3),
        RepositoryKind::Volume(volume) => bind_volume(repo, volume),
    };
    Ok(binding)
}

fn secret_volume(repo: &BackupRepository, selector: &SecretKeySelector, file: &str) -> Volume {
    Volume {
        name: volume_name(repo),
        secret: Some(SecretVolumeSource {
            secret_name: Some(selector.name.clone()),
            items: Some(vec![KeyToPath {
                key: selector.key.clone(),
                path: file.into(),
                mode: None,
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn bind_gcs(repo: &BackupRepository, gcs: &GcsRepository) -> RepositoryBinding {
    let mount = format!("{}/gcscredential", mount_path(repo));
    let xml = format!(
        r#"<repository name="{}" class="org.apache.solr.gcs.GCSBackupRepository">
    <str name="gcsBucket">{}</str>
    <str name="gcsCredentialPath">{}/{}</str>
    <str name="location">{}</str>
</repository>"#,
        repo.name,
        gcs.bucket,
        mount,
        GCS_KEY_FILE,
        gcs.base_location.as_deref().unwrap_or("/")
    );
    RepositoryBinding {
        volume: Some(secret_volume(repo, &gcs.gcs_credential_secret, GCS_KEY_FILE)),
        mount: Some(VolumeMount {
            name: volume_name(repo),
            mount_path: mount,
            read_only: Some(true),
            ..Default::default()
        }),
        env: Vec::new(),
        xml,
        libs: GCS_LIBS,
        managed: false,
    }
}

fn bind_s3(repo: &BackupRepository, s3: &S3Repository) -> RepositoryBinding {
    let mut xml = format!(
        r#"<repository name="{}" class="org.apache.solr.s3.S3BackupRepository">
    <str name="s3.bucket.name">{}</str>
    <str name="s3.region">{}</str>"#,
        repo.name, s3.bucket, s3.region
    );
    if let Some(endpoint) = &s3.endpoint {
        xml.push_str(&format!("\n    <str name=\"s3.endpoint\">{}</str>", endpoint));
    }
    if let Some(proxy) = &s3.proxy_url {
        xml.push_str(&format!("\n    <str name=\"s3.proxy.url\">{}</str>", proxy));
    }
    xml.push_str("\n</repository>");

    let mut env = Vec::new();
    let mut volume = None;
    let mut mount = None;
    if let Some(creds) = &s3.credentials {
        let keyed = [
            ("AWS_ACCESS_KEY_ID", &creds.access_key_id_secret),
            ("AWS_SECRET_ACCESS_KEY", &creds.secret_access_key_secret),
            ("AWS_SESSION_TOKEN", &creds.session_token_secret),
        ];
        for (name, selector) in keyed {
            if let Some(selector) = selector {
                env.push(EnvVar {
                    name: name.into(),
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(selector.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
        }
        if let Some(file) = &creds.credentials_file_secret {
            let path = format!("{}/s3credential", mount_path(repo));
            env.push(plain_env(
                "AWS_SHARED_CREDENTIALS_FILE",
                &format!("{}/{}", path, S3_CREDENTIALS_FILE),
            ));
            volume = Some(secret_volume(repo, file, S3_CREDENTIALS_FILE));
            mount = Some(VolumeMount {
                name: volume_name(repo),
                mount_path: path,
                read_only: Some(true),
                ..Default::default()
            });
        }
    }
    RepositoryBinding {
        volume,
        mount,
        env,
        xml,
        libs: S3_LIBS,
        managed: false,
    }
}

fn bind_volume(repo: &BackupRepository, vol: &VolumeRepository) -> RepositoryBinding {
    let source = &vol.source;
    let path = mount_path(repo);
    let xml = format!(
        r#"<repository name="{}" class="org.apache.solr.core.backup.repository.LocalFileSystemRepository">
    <str name="location">{}/{}</str>
</repository>"#,
        repo.name,
        path,
        vol.directory.as_deref().unwrap_or("backups")
    );
    RepositoryBinding {
        volume: Some(Volume {
            name: volume_name(repo),
            persistent_volume_claim: source.persistent_volume_claim.clone(),
            nfs: source.nfs.clone(),
            host_path: source.host_path.clone(),
            empty_dir: source.empty_dir.clone(),
            ..Default::default()
        }),
        mount: Some(VolumeMount {
            name: volume_name(repo),
            mount_path: path,
            ..Default::default()
        }),
        env: Vec::new(),
        xml,
        libs: &[],
        managed: true,
    }
}

/// Bindings of all repositories, in declaration order
pub fn bind_all(repos: &[BackupRepository]) -> Result<Vec<RepositoryBinding>, GenerateError> {
    repos.iter().map(bind).collect()
}

/// solr.xml section for the given bindings.
///
/// Library paths are deduplicated and both libraries and repository
/// fragments are sorted, so declaration order never changes the output.
pub fn solr_xml_section(bindings: &[RepositoryBinding]) -> String {
    if bindings.is_empty() {
        return String::new();
    }
    let libs: BTreeSet<&str> = bindings.iter().flat_map(|b| b.libs.iter().copied()).collect();
    let mut fragments: Vec<&str> = bindings.iter().map(|b| b.xml.as_str()).collect();
    fragments.sort_unstable();

    let lib_xml = if libs.is_empty() {
        String::new()
    } else {
        format!(
            "<str name=\"sharedLib\">{}</str>",
            libs.into_iter().collect::<Vec<_>>().join(",")
        )
    };
    format!(
        "{}\n  <backup>\n{}\n  </backup>",
        lib_xml,
        fragments.join("\n")
    )
}
