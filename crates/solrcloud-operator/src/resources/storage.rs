use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSetPersistentVolumeClaimRetentionPolicy;
use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, PersistentVolumeClaim, Volume};

use super::labels;
use crate::crds::cloud::{EphemeralStorage, PersistentStorage, ReclaimPolicy, SolrCloud, TECHNOLOGY};

/// Name of the data volume, and of the claim template unless the user names it.
pub const DATA_VOLUME: &str = "data";
pub const DATA_MOUNT_PATH: &str = "/var/solr/data";

pub const PVC_TECHNOLOGY_LABEL: &str = "solr.operator.dev/technology";
pub const PVC_STORAGE_LABEL: &str = "solr.operator.dev/storage";
pub const PVC_INSTANCE_LABEL: &str = "solr.operator.dev/instance";

/// Where the data directory of each pod lives
#[derive(Debug, Clone, PartialEq)]
pub enum DataStorage {
    Persistent {
        claim: PersistentVolumeClaim,
        retention: StatefulSetPersistentVolumeClaimRetentionPolicy,
    },
    Ephemeral(Volume),
}

impl DataStorage {
    /// Name the main container mounts the data directory under
    pub fn volume_name(&self) -> String {
        match self {
            DataStorage::Persistent { claim, .. } => claim
                .metadata
                .name
                .clone()
                .unwrap_or_else(|| DATA_VOLUME.to_string()),
            DataStorage::Ephemeral(volume) => volume.name.clone(),
        }
    }
}

pub fn resolve(cloud: &SolrCloud) -> DataStorage {
    let options = &cloud.spec.storage_options;
    match &options.persistent_storage {
        Some(persistent) => persistent_claim(cloud, persistent),
        None => DataStorage::Ephemeral(ephemeral_volume(options.ephemeral_storage.as_ref())),
    }
}

fn persistent_claim(cloud: &SolrCloud, persistent: &PersistentStorage) -> DataStorage {
    let template = &persistent.persistent_volume_claim_template;
    let mut spec = template.spec.clone();
    if spec.access_modes.as_ref().is_none_or(|m| m.is_empty()) {
        spec.access_modes = Some(vec!["ReadWriteOnce".into()]);
    }
    if spec.volume_mode.is_none() {
        spec.volume_mode = Some("Filesystem".into());
    }

    let internal = BTreeMap::from([
        (PVC_TECHNOLOGY_LABEL.to_string(), TECHNOLOGY.to_string()),
        (PVC_STORAGE_LABEL.to_string(), DATA_VOLUME.to_string()),
        (
            PVC_INSTANCE_LABEL.to_string(),
            cloud.metadata.name.clone().unwrap_or_default(),
        ),
    ]);
    // Internal claim labels sit underneath the template's own.
    let claim_labels = labels::merge(&internal, &template.metadata.labels);
    let claim_annotations = template.metadata.annotations.clone();

    let name = template
        .metadata
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DATA_VOLUME.to_string());

    let claim = PersistentVolumeClaim {
        metadata: kube::core::ObjectMeta {
            name: Some(name),
            labels: Some(claim_labels),
            annotations: (!claim_annotations.is_empty()).then_some(claim_annotations),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    };
    let when_deleted = match persistent.reclaim_policy {
        ReclaimPolicy::Delete => "Delete",
        ReclaimPolicy::Retain => "Retain",
    };
    DataStorage::Persistent {
        claim,
        retention: StatefulSetPersistentVolumeClaimRetentionPolicy {
            when_deleted: Some(when_deleted.into()),
            when_scaled: Some("Retain".into()),
        },
    }
}

fn ephemeral_volume(ephemeral: Option<&EphemeralStorage>) -> Volume {
    let mut volume = Volume {
        name: DATA_VOLUME.into(),
        ..Default::default()
    };
    match ephemeral {
        Some(EphemeralStorage {
            host_path: Some(host_path),
            empty_dir: None,
        }) => volume.host_path = Some(host_path.clone()),
        Some(EphemeralStorage {
            empty_dir: Some(empty_dir),
            ..
        }) => {
            volume.empty_dir = Some(EmptyDirVolumeSource {
                medium: empty_dir.medium.clone(),
                size_limit: empty_dir.size_limit.clone(),
            })
        }
        _ => volume.empty_dir = Some(EmptyDirVolumeSource::default()),
    }
    volume
}
