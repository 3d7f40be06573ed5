//! Assembly of the search node workload before TLS and user overrides.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, ExecAction,
    HTTPGetAction, HostAlias, KeyToPath, Lifecycle, LifecycleHandler, LocalObjectReference,
    ObjectFieldSelector, PodSecurityContext, PodSpec, PodTemplateSpec, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;

use super::addressability::Addressability;
use super::backup::RepositoryBinding;
use super::configmap::{LOG_XML_KEY, SOLR_XML_KEY};
use super::security::{
    DEFAULT_PROBE_PATH, PASSWORD_KEY, SECURITY_JSON_KEY, SecurityArtifacts, USERNAME_KEY,
};
use super::storage::{self, DATA_MOUNT_PATH, DataStorage};
use super::zookeeper::{self, ENSURE_CHROOT_CMD, ZkEnvironment, plain_env, secret_env};
use super::{
    CLIENT_PORT_NAME, ClusterSnapshot, ProvidedConfig, SOLR_CONTAINER, digest, labels,
    object_meta,
};
use crate::crds::cloud::{SolrCloud, UpdateMethod};

pub const SOLR_XML_VOLUME: &str = "solr-xml";
pub const LOG_XML_VOLUME: &str = "log4j2-xml";
pub const SOLR_XML_DIGEST_ANNOTATION: &str = "solr.operator.dev/solrXmlDigest";
pub const LOG_XML_DIGEST_ANNOTATION: &str = "solr.operator.dev/logXmlDigest";
pub const ZK_CONNECTION_STRING_ANNOTATION: &str = "solr.operator.dev/zkConnectionString";

/// User and group the search server runs as
pub const SOLR_UID: i64 = 8983;
const DEFAULT_TERMINATION_GRACE: i64 = 60;
const DEFAULT_POD_MANAGEMENT_POLICY: &str = "Parallel";
const READ_ONLY_MODE: i32 = 0o444;

const SET_URL_SCHEME_CMD: &str = "/opt/solr/server/scripts/cloud-scripts/zkcli.sh -zkhost ${ZK_HOST} -cmd clusterprop -name urlScheme -val https; ";
const UPLOAD_SECURITY_JSON_CMD: &str = "ZK_SECURITY_JSON=$(/opt/solr/server/scripts/cloud-scripts/zkcli.sh -zkhost ${ZK_HOST} -cmd get /security.json); \
if [ ${#ZK_SECURITY_JSON} -lt 3 ]; then echo $SECURITY_JSON > /tmp/security.json; \
/opt/solr/server/scripts/cloud-scripts/zkcli.sh -zkhost ${ZK_HOST} -cmd putfile /security.json /tmp/security.json; echo \"put security.json in ZK\"; fi";

/// Build the workload for `cloud` from its resolved parts.
pub fn assemble(
    cloud: &SolrCloud,
    snapshot: &ClusterSnapshot,
    bindings: &[RepositoryBinding],
    security: Option<&SecurityArtifacts>,
    solr_xml: &str,
) -> StatefulSet {
    let spec = &cloud.spec;
    let pod_options = spec.custom_solr_kube_options.pod_options.as_ref();
    let sts_options = spec.custom_solr_kube_options.stateful_set_options.as_ref();
    let addr = Addressability::new(cloud);
    let pod_port = addr.pod_port();
    let zk = zookeeper::resolve(cloud, &snapshot.status);
    let data = storage::resolve(cloud);

    let provided = snapshot.provided_config.as_ref();
    let provided_solr_xml = provided.filter(|p| p.has_solr_xml());

    let (sts_labels, sts_annotations) = labels::object_meta_maps(
        cloud,
        &[],
        BTreeMap::from([(
            ZK_CONNECTION_STRING_ANNOTATION.to_string(),
            zk.connection.connection_string.clone(),
        )]),
        sts_options.map(|o| &o.labels),
        sts_options.map(|o| &o.annotations),
    );
    let solr_xml_digest = provided_solr_xml
        .and_then(|p| p.solr_xml_digest.clone())
        .unwrap_or_else(|| digest(solr_xml.as_bytes()));
    let mut pod_annotations =
        BTreeMap::from([(SOLR_XML_DIGEST_ANNOTATION.to_string(), solr_xml_digest)]);
    if let Some(log_digest) = provided.and_then(|p| p.log_xml_digest.as_ref()) {
        pod_annotations.insert(LOG_XML_DIGEST_ANNOTATION.into(), log_digest.clone());
    }
    let (pod_labels, pod_annotations) = labels::object_meta_maps(
        cloud,
        &[],
        pod_annotations,
        pod_options.map(|o| &o.labels),
        pod_options.map(|o| &o.annotations),
    );

    let termination_grace = pod_options
        .and_then(|o| o.termination_grace_period_seconds)
        .unwrap_or(DEFAULT_TERMINATION_GRACE);

    let mut volumes = vec![Volume {
        name: SOLR_XML_VOLUME.into(),
        config_map: Some(ConfigMapVolumeSource {
            name: provided_solr_xml
                .map(|p| p.config_map.clone())
                .unwrap_or_else(|| cloud.config_map_name()),
            items: Some(vec![key_to_path(SOLR_XML_KEY)]),
            default_mode: Some(READ_ONLY_MODE),
            ..Default::default()
        }),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: data.volume_name(),
        mount_path: DATA_MOUNT_PATH.into(),
        ..Default::default()
    }];
    let (claim_templates, retention) = match &data {
        DataStorage::Persistent { claim, retention } => {
            (Some(vec![claim.clone()]), Some(retention.clone()))
        }
        DataStorage::Ephemeral(volume) => {
            volumes.push(volume.clone());
            (None, None)
        }
    };
    for binding in bindings {
        if let (Some(volume), Some(mount)) = (&binding.volume, &binding.mount) {
            volumes.push(volume.clone());
            mounts.push(mount.clone());
        }
    }

    let mut env = vec![
        plain_env("SOLR_JAVA_MEM", &spec.solr_java_mem),
        plain_env("SOLR_HOME", DATA_MOUNT_PATH),
        plain_env("SOLR_PORT", &pod_port.to_string()),
        plain_env("SOLR_NODE_PORT", &addr.node_port().to_string()),
        EnvVar {
            name: "POD_HOSTNAME".into(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: Some("v1".into()),
                    field_path: "metadata.name".into(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        plain_env("SOLR_HOST", &addr.advertised_node_host("$(POD_HOSTNAME)")),
        plain_env("SOLR_LOG_LEVEL", &spec.solr_log_level),
        plain_env("GC_TUNE", &spec.solr_gc_tune),
        plain_env(
            "SOLR_STOP_WAIT",
            &termination_grace.saturating_sub(5).max(0).to_string(),
        ),
    ];
    env.extend(zk.env.iter().cloned());
    if let Some(security) = security {
        env.extend(basic_auth_env(&security.basic_auth_secret_name));
    }
    env.extend(bindings.iter().flat_map(|b| b.env.iter().cloned()));
    env.extend(cloud.custom_env().iter().cloned());
    if let Some(provided) = provided.filter(|p| p.log_xml_digest.is_some()) {
        let (mount, var) = log_config_mount(provided, &mut volumes);
        mounts.push(mount);
        env.push(var);
    }
    env.push(plain_env("SOLR_OPTS", &solr_opts(cloud, &zk, true)));

    let default_probe = |initial_delay, period| Probe {
        http_get: Some(HTTPGetAction {
            path: Some(format!("/solr{}", DEFAULT_PROBE_PATH)),
            port: IntOrString::Int(pod_port),
            scheme: Some("HTTP".into()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(1),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    };

    let solr = Container {
        name: SOLR_CONTAINER.into(),
        image: Some(spec.solr_image.image_name()),
        image_pull_policy: spec.solr_image.pull_policy.clone(),
        ports: Some(vec![ContainerPort {
            container_port: pod_port,
            name: Some(CLIENT_PORT_NAME.into()),
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        liveness_probe: Some(default_probe(20, 10)),
        readiness_probe: Some(default_probe(15, 5)),
        volume_mounts: Some(mounts),
        env: Some(env),
        lifecycle: Some(Lifecycle {
            post_start: zk.ensure_chroot_command().map(exec_handler),
            pre_stop: Some(exec_handler(vec![
                "solr".into(),
                "stop".into(),
                "-p".into(),
                pod_port.to_string(),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut init_containers = vec![volume_prep_container(cloud, &data, bindings)];
    if let Some(setup) = zk_setup_container(cloud, &zk, security) {
        init_containers.push(setup);
    }

    let mut image_pull_secrets: Vec<LocalObjectReference> = pod_options
        .map(|o| o.image_pull_secrets.clone())
        .unwrap_or_default();
    if let Some(secret) = &spec.solr_image.image_pull_secret {
        image_pull_secrets.push(LocalObjectReference {
            name: secret.clone(),
        });
    }

    let host_aliases: Vec<HostAlias> = snapshot
        .host_aliases
        .iter()
        .map(|(host, ip)| HostAlias {
            hostnames: Some(vec![host.clone()]),
            ip: ip.clone(),
        })
        .collect();

    let update_strategy = match spec.update_strategy.method {
        UpdateMethod::StatefulSet => "RollingUpdate",
        UpdateMethod::Managed | UpdateMethod::Manual => "OnDelete",
    };
    let pod_management_policy = sts_options
        .and_then(|o| o.pod_management_policy.clone())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_POD_MANAGEMENT_POLICY.into());

    StatefulSet {
        metadata: object_meta(
            cloud,
            cloud.stateful_set_name(),
            sts_labels,
            sts_annotations,
        ),
        spec: Some(StatefulSetSpec {
            selector: LabelSelector {
                match_labels: Some(cloud.selector_labels()),
                ..Default::default()
            },
            service_name: Some(cloud.headless_service_name()),
            replicas: Some(spec.replicas),
            pod_management_policy: Some(pod_management_policy),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some(update_strategy.into()),
                rolling_update: None,
            }),
            persistent_volume_claim_retention_policy: retention,
            volume_claim_templates: claim_templates,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: (!pod_annotations.is_empty()).then_some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    termination_grace_period_seconds: Some(termination_grace),
                    security_context: Some(PodSecurityContext {
                        fs_group: Some(SOLR_UID),
                        ..Default::default()
                    }),
                    volumes: Some(volumes),
                    init_containers: Some(init_containers),
                    host_aliases: (!host_aliases.is_empty()).then_some(host_aliases),
                    containers: vec![solr],
                    image_pull_secrets: (!image_pull_secrets.is_empty())
                        .then_some(image_pull_secrets),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn key_to_path(key: &str) -> KeyToPath {
    KeyToPath {
        key: key.into(),
        path: key.into(),
        mode: None,
    }
}

fn exec_handler(command: Vec<String>) -> LifecycleHandler {
    LifecycleHandler {
        exec: Some(ExecAction {
            command: Some(command),
        }),
        ..Default::default()
    }
}

/// SOLR_OPTS: the advertised port, the ACL marker, then the user's options
fn solr_opts(cloud: &SolrCloud, zk: &ZkEnvironment, with_host_port: bool) -> String {
    let mut opts = Vec::new();
    if with_host_port {
        opts.push("-DhostPort=$(SOLR_NODE_PORT)");
    }
    opts.extend(zk.solr_opt);
    if !cloud.spec.solr_opts.is_empty() {
        opts.push(&cloud.spec.solr_opts);
    }
    opts.join(" ")
}

fn basic_auth_env(secret: &str) -> Vec<EnvVar> {
    vec![
        secret_env("BASIC_AUTH_USER", secret, USERNAME_KEY),
        secret_env("BASIC_AUTH_PASS", secret, PASSWORD_KEY),
        plain_env("SOLR_AUTH_TYPE", "basic"),
        plain_env(
            "SOLR_AUTHENTICATION_OPTS",
            "-Dbasicauth=$(BASIC_AUTH_USER):$(BASIC_AUTH_PASS)",
        ),
    ]
}

/// The provided log config is mounted in a directory named after its config
/// map, since /var/solr itself cannot be a mount point. When the same config
/// map also supplies solr.xml, the file joins the existing solr-xml volume.
fn log_config_mount(
    provided: &ProvidedConfig,
    volumes: &mut Vec<Volume>,
) -> (VolumeMount, EnvVar) {
    let mount_path = format!("/var/solr/{}", provided.config_map);
    let shared = volumes
        .iter_mut()
        .filter(|_| provided.has_solr_xml())
        .find(|v| v.name == SOLR_XML_VOLUME)
        .and_then(|v| v.config_map.as_mut());
    let volume_name = match shared {
        Some(source) => {
            source
                .items
                .get_or_insert_with(Vec::new)
                .push(key_to_path(LOG_XML_KEY));
            SOLR_XML_VOLUME
        }
        None => {
            volumes.push(Volume {
                name: LOG_XML_VOLUME.into(),
                config_map: Some(ConfigMapVolumeSource {
                    name: provided.config_map.clone(),
                    items: Some(vec![key_to_path(LOG_XML_KEY)]),
                    default_mode: Some(READ_ONLY_MODE),
                    ..Default::default()
                }),
                ..Default::default()
            });
            LOG_XML_VOLUME
        }
    };
    let var = plain_env("LOG4J_PROPS", &format!("{}/{}", mount_path, LOG_XML_KEY));
    let mount = VolumeMount {
        name: volume_name.into(),
        mount_path,
        ..Default::default()
    };
    (mount, var)
}

/// Copies solr.xml into the data directory and hands managed backup mounts
/// to the server user.
fn volume_prep_container(
    cloud: &SolrCloud,
    data: &DataStorage,
    bindings: &[RepositoryBinding],
) -> Container {
    let mut mounts = vec![
        VolumeMount {
            name: SOLR_XML_VOLUME.into(),
            mount_path: "/tmp".into(),
            ..Default::default()
        },
        VolumeMount {
            name: data.volume_name(),
            mount_path: "/tmp-config".into(),
            ..Default::default()
        },
    ];
    let mut commands = vec!["cp /tmp/solr.xml /tmp-config/solr.xml".to_string()];
    for binding in bindings.iter().filter(|b| b.managed) {
        if let Some(mount) = &binding.mount {
            commands.push(format!(
                "chown -R {}:{} {}",
                SOLR_UID, SOLR_UID, mount.mount_path
            ));
            mounts.push(mount.clone());
        }
    }
    let image = &cloud.spec.busy_box_image;
    Container {
        name: "cp-solr-xml".into(),
        image: Some(image.image_name()),
        image_pull_policy: image.pull_policy.clone(),
        command: Some(vec!["sh".into(), "-c".into(), commands.join(" && ")]),
        volume_mounts: Some(mounts),
        ..Default::default()
    }
}

/// One-off coordination setup: the https url scheme under TLS and the
/// initial security.json. `None` when neither is needed.
fn zk_setup_container(
    cloud: &SolrCloud,
    zk: &ZkEnvironment,
    security: Option<&SecurityArtifacts>,
) -> Option<Container> {
    let mut env = zk.env.clone();
    let opts = solr_opts(cloud, zk, false);
    if !opts.is_empty() {
        env.push(plain_env("SOLR_OPTS", &opts));
    }

    let mut cmd = String::new();
    if cloud.spec.solr_tls.is_some() {
        cmd.push_str(ENSURE_CHROOT_CMD);
        cmd.push_str("; ");
        cmd.push_str(SET_URL_SCHEME_CMD);
    }
    if security.is_some_and(|s| s.bootstrap.is_some()) {
        env.push(secret_env(
            "SECURITY_JSON",
            &cloud.security_bootstrap_secret_name(),
            SECURITY_JSON_KEY,
        ));
        if cmd.is_empty() {
            cmd.push_str(ENSURE_CHROOT_CMD);
            cmd.push_str("; ");
        }
        cmd.push_str(UPLOAD_SECURITY_JSON_CMD);
    }
    if cmd.is_empty() {
        return None;
    }

    let image = &cloud.spec.solr_image;
    Some(Container {
        name: "setup-zk".into(),
        image: Some(image.image_name()),
        image_pull_policy: image.pull_policy.clone(),
        command: Some(vec!["sh".into(), "-c".into(), cmd]),
        env: Some(env),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        ..Default::default()
    })
}
