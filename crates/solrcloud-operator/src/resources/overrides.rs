//! Final layer of user pod overrides. Every step is a no-op when its option
//! is unset and wins over computed defaults when it is set.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Container, PodSpec, Probe, VolumeMount};

use super::{main_container_mut, pod_spec_mut};
use crate::crds::options::PodOptions;

type PodOverride = fn(&mut PodSpec, &PodOptions);
type ContainerOverride = fn(&mut Container, &PodOptions);

const CONTAINER_OVERRIDES: &[ContainerOverride] = &[
    resources,
    lifecycle,
    startup_probe,
    liveness_probe,
    readiness_probe,
];

const POD_OVERRIDES: &[PodOverride] = &[
    service_account,
    affinity,
    security_context,
    tolerations,
    node_selector,
    priority_class,
    extra_volumes,
    init_containers,
    sidecar_containers,
];

pub fn apply(mut sts: StatefulSet, options: &PodOptions) -> StatefulSet {
    if let Some(pod) = pod_spec_mut(&mut sts) {
        if let Some(container) = main_container_mut(pod) {
            for step in CONTAINER_OVERRIDES {
                step(container, options);
            }
        }
        for step in POD_OVERRIDES {
            step(pod, options);
        }
    }
    sts
}

fn resources(container: &mut Container, options: &PodOptions) {
    if let Some(res) = &options.resources
        && (res.limits.is_some() || res.requests.is_some())
    {
        container.resources = Some(res.clone());
    }
}

fn lifecycle(container: &mut Container, options: &PodOptions) {
    if options.lifecycle.is_some() {
        container.lifecycle = options.lifecycle.clone();
    }
}

/// Seeded from the liveness probe, with a longer timeout and more failures
/// tolerated while the node starts.
fn startup_probe(container: &mut Container, options: &PodOptions) {
    let Some(custom) = &options.startup_probe else {
        return;
    };
    let mut base = container.liveness_probe.clone().unwrap_or_default();
    base.timeout_seconds = Some(30);
    base.failure_threshold = Some(15);
    container.startup_probe = Some(customize_probe(&base, custom));
}

fn liveness_probe(container: &mut Container, options: &PodOptions) {
    if let (Some(base), Some(custom)) = (&container.liveness_probe, &options.liveness_probe) {
        container.liveness_probe = Some(customize_probe(base, custom));
    }
}

fn readiness_probe(container: &mut Container, options: &PodOptions) {
    if let (Some(base), Some(custom)) = (&container.readiness_probe, &options.readiness_probe) {
        container.readiness_probe = Some(customize_probe(base, custom));
    }
}

/// Fields set on `custom` replace those of `base`; a custom handler replaces
/// the whole handler.
pub fn customize_probe(base: &Probe, custom: &Probe) -> Probe {
    let mut probe = base.clone();
    probe.initial_delay_seconds = custom.initial_delay_seconds.or(probe.initial_delay_seconds);
    probe.timeout_seconds = custom.timeout_seconds.or(probe.timeout_seconds);
    probe.period_seconds = custom.period_seconds.or(probe.period_seconds);
    probe.success_threshold = custom.success_threshold.or(probe.success_threshold);
    probe.failure_threshold = custom.failure_threshold.or(probe.failure_threshold);
    probe.termination_grace_period_seconds = custom
        .termination_grace_period_seconds
        .or(probe.termination_grace_period_seconds);
    if custom.exec.is_some()
        || custom.http_get.is_some()
        || custom.tcp_socket.is_some()
        || custom.grpc.is_some()
    {
        probe.exec = custom.exec.clone();
        probe.http_get = custom.http_get.clone();
        probe.tcp_socket = custom.tcp_socket.clone();
        probe.grpc = custom.grpc.clone();
    }
    probe
}

fn service_account(pod: &mut PodSpec, options: &PodOptions) {
    if let Some(name) = options.service_account_name.as_ref().filter(|n| !n.is_empty()) {
        pod.service_account_name = Some(name.clone());
    }
}

fn affinity(pod: &mut PodSpec, options: &PodOptions) {
    if options.affinity.is_some() {
        pod.affinity = options.affinity.clone();
    }
}

fn security_context(pod: &mut PodSpec, options: &PodOptions) {
    if options.pod_security_context.is_some() {
        pod.security_context = options.pod_security_context.clone();
    }
}

fn tolerations(pod: &mut PodSpec, options: &PodOptions) {
    if options.tolerations.is_some() {
        pod.tolerations = options.tolerations.clone();
    }
}

fn node_selector(pod: &mut PodSpec, options: &PodOptions) {
    if options.node_selector.is_some() {
        pod.node_selector = options.node_selector.clone();
    }
}

fn priority_class(pod: &mut PodSpec, options: &PodOptions) {
    if let Some(name) = options.priority_class_name.as_ref().filter(|n| !n.is_empty()) {
        pod.priority_class_name = Some(name.clone());
    }
}

fn extra_volumes(pod: &mut PodSpec, options: &PodOptions) {
    let mut mounts = Vec::new();
    for extra in &options.volumes {
        if let Some(mount) = &extra.default_container_mount {
            mounts.push(VolumeMount {
                name: extra.volume.name.clone(),
                ..mount.clone()
            });
        }
        pod.volumes
            .get_or_insert_with(Vec::new)
            .push(extra.volume.clone());
    }
    if !mounts.is_empty()
        && let Some(container) = main_container_mut(pod)
    {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .extend(mounts);
    }
}

fn init_containers(pod: &mut PodSpec, options: &PodOptions) {
    if !options.init_containers.is_empty() {
        pod.init_containers
            .get_or_insert_with(Vec::new)
            .extend(options.init_containers.iter().cloned());
    }
}

fn sidecar_containers(pod: &mut PodSpec, options: &PodOptions) {
    pod.containers
        .extend(options.sidecar_containers.iter().cloned());
}

#[cfg(test)]
mod tests_overrides {
    use super::*;
    use crate::resources::SOLR_CONTAINER;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{HTTPGetAction, PodTemplateSpec};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn workload() -> StatefulSet {
        let probe = Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/solr/admin/info/system".into()),
                port: IntOrString::Int(8983),
                ..Default::default()
            }),
            initial_delay_seconds: Some(20),
            timeout_seconds: Some(1),
            period_seconds: Some(10),
            failure_threshold: Some(3),
            ..Default::default()
        };
        StatefulSet {
            spec: Some(StatefulSetSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: SOLR_CONTAINER.into(),
                            liveness_probe: Some(probe.clone()),
                            readiness_probe: Some(probe),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn options(value: serde_json::Value) -> PodOptions {
        serde_json::from_value(value).unwrap()
    }

    fn pod(sts: &StatefulSet) -> &PodSpec {
        sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn empty_options_change_nothing() {
        let sts = apply(workload(), &options(serde_json::json!({})));
        assert_eq!(sts, workload());
    }

    #[test]
    fn startup_probe_is_seeded_from_liveness() {
        let sts = apply(
            workload(),
            &options(serde_json::json!({"startupProbe": {"periodSeconds": 7}})),
        );
        let startup = pod(&sts).containers[0].startup_probe.clone().unwrap();
        assert_eq!(startup.timeout_seconds, Some(30));
        assert_eq!(startup.failure_threshold, Some(15));
        assert_eq!(startup.period_seconds, Some(7));
        assert_eq!(startup.initial_delay_seconds, Some(20));
        assert!(startup.http_get.is_some());
    }

    #[test]
    fn custom_handler_replaces_default() {
        let sts = apply(
            workload(),
            &options(serde_json::json!({"livenessProbe": {
                "tcpSocket": {"port": 8983},
                "timeoutSeconds": 4
            }})),
        );
        let liveness = pod(&sts).containers[0].liveness_probe.clone().unwrap();
        assert!(liveness.http_get.is_none());
        assert!(liveness.tcp_socket.is_some());
        assert_eq!(liveness.timeout_seconds, Some(4));
        assert_eq!(liveness.initial_delay_seconds, Some(20));
    }

    #[test]
    fn pod_fields_and_extra_containers() {
        let sts = apply(
            workload(),
            &options(serde_json::json!({
                "serviceAccountName": "search",
                "priorityClassName": "high",
                "nodeSelector": {"disk": "ssd"},
                "volumes": [{
                    "volume": {"name": "scratch", "emptyDir": {}},
                    "defaultContainerMount": {"name": "ignored", "mountPath": "/scratch"}
                }],
                "initContainers": [{"name": "warmup"}],
                "sidecarContainers": [{"name": "exporter"}]
            })),
        );
        let pod = pod(&sts);
        assert_eq!(pod.service_account_name.as_deref(), Some("search"));
        assert_eq!(pod.priority_class_name.as_deref(), Some("high"));
        assert_eq!(pod.node_selector.as_ref().unwrap()["disk"], "ssd");
        assert_eq!(pod.volumes.as_ref().unwrap()[0].name, "scratch");
        let mount = &pod.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, "scratch");
        assert_eq!(mount.mount_path, "/scratch");
        assert_eq!(pod.init_containers.as_ref().unwrap()[0].name, "warmup");
        assert_eq!(pod.containers[1].name, "exporter");
    }
}
