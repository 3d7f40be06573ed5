use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::addressability::{Addressability, EXTERNAL_DNS_HOSTNAME};
use super::{CLIENT_PORT_NAME, labels, object_meta};
use crate::crds::cloud::SolrCloud;
use crate::crds::options::MetaOptions;

fn client_port(port: i32) -> ServicePort {
    ServicePort {
        name: Some(CLIENT_PORT_NAME.into()),
        port,
        protocol: Some("TCP".into()),
        target_port: Some(IntOrString::String(CLIENT_PORT_NAME.into())),
        ..Default::default()
    }
}

fn dns_annotation(hostnames: Option<String>) -> BTreeMap<String, String> {
    hostnames
        .map(|h| BTreeMap::from([(EXTERNAL_DNS_HOSTNAME.to_string(), h)]))
        .unwrap_or_default()
}

fn build(
    cloud: &SolrCloud,
    name: String,
    service_type: &str,
    base_annotations: BTreeMap<String, String>,
    options: Option<&MetaOptions>,
    spec: ServiceSpec,
) -> Service {
    let (labels, annotations) = labels::object_meta_maps(
        cloud,
        &[("service-type", service_type)],
        base_annotations,
        options.map(|o| &o.labels),
        options.map(|o| &o.annotations),
    );
    Service {
        metadata: object_meta(cloud, name, labels, annotations),
        spec: Some(spec),
        ..Default::default()
    }
}

/// Load-balanced entry point for the whole cluster
pub fn common_service(cloud: &SolrCloud) -> Service {
    let addr = Addressability::new(cloud);
    build(
        cloud,
        cloud.common_service_name(),
        "common",
        dns_annotation(addr.common_dns_hostnames()),
        cloud.spec.custom_solr_kube_options.common_service_options.as_ref(),
        ServiceSpec {
            ports: Some(vec![client_port(addr.common_service_port())]),
            selector: Some(cloud.selector_labels()),
            ..Default::default()
        },
    )
}

/// Headless service giving every pod a stable DNS name, ready or not
pub fn headless_service(cloud: &SolrCloud) -> Service {
    let addr = Addressability::new(cloud);
    build(
        cloud,
        cloud.headless_service_name(),
        "headless",
        dns_annotation(addr.headless_dns_hostnames()),
        cloud.spec.custom_solr_kube_options.headless_service_options.as_ref(),
        ServiceSpec {
            ports: Some(vec![client_port(addr.node_port())]),
            selector: Some(cloud.selector_labels()),
            cluster_ip: Some("None".into()),
            publish_not_ready_addresses: Some(true),
            ..Default::default()
        },
    )
}

/// One service per pod, targeted by the per-pod ingress rules
pub fn node_services(cloud: &SolrCloud) -> Vec<Service> {
    let addr = Addressability::new(cloud);
    if !addr.uses_individual_node_services() {
        return Vec::new();
    }
    cloud
        .pod_names()
        .into_iter()
        .map(|pod| {
            let mut selector = cloud.selector_labels();
            selector.insert("statefulset.kubernetes.io/pod-name".into(), pod.clone());
            build(
                cloud,
                pod,
                "external",
                BTreeMap::new(),
                cloud.spec.custom_solr_kube_options.node_service_options.as_ref(),
                ServiceSpec {
                    ports: Some(vec![client_port(addr.node_port())]),
                    selector: Some(selector),
                    publish_not_ready_addresses: Some(true),
                    ..Default::default()
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests_services {
    use super::*;
    use crate::crds::cloud::SolrCloudSpec;

    fn cloud(spec: serde_json::Value) -> SolrCloud {
        let mut c = SolrCloud::new("foo", serde_json::from_value::<SolrCloudSpec>(spec).unwrap());
        c.metadata.namespace = Some("ns".into());
        c
    }

    #[test]
    fn headless_publishes_unready_pods() {
        let svc = headless_service(&cloud(serde_json::json!({})));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));
        assert_eq!(spec.ports.unwrap()[0].port, 8983);
        let labels = svc.metadata.labels.unwrap();
        assert_eq!(labels["service-type"], "headless");
        assert_eq!(labels["technology"], "solr-cloud");
        assert!(svc.metadata.annotations.is_none());
    }

    #[test]
    fn common_service_merges_custom_options() {
        let svc = common_service(&cloud(serde_json::json!({
            "customSolrKubeOptions": {"commonServiceOptions": {
                "labels": {"team": "search", "service-type": "mine"},
                "annotations": {"a": "b"}
            }}
        })));
        let labels = svc.metadata.labels.unwrap();
        assert_eq!(labels["team"], "search");
        assert_eq!(labels["service-type"], "common");
        assert_eq!(svc.metadata.annotations.unwrap()["a"], "b");
        let spec = svc.spec.unwrap();
        assert_eq!(spec.ports.unwrap()[0].port, 80);
        assert!(!spec.selector.unwrap().contains_key("service-type"));
    }

    #[test]
    fn node_services_only_for_ingress_nodes() {
        let internal = cloud(serde_json::json!({}));
        assert!(node_services(&internal).is_empty());

        let exposed = cloud(serde_json::json!({"replicas": 2, "solrAddressability": {"external": {
            "method": "Ingress", "domainName": "a.com"
        }}}));
        let services = node_services(&exposed);
        assert_eq!(services.len(), 2);
        assert_eq!(services[1].metadata.name.as_deref(), Some("foo-solrcloud-1"));
        let selector = services[1].spec.as_ref().unwrap().selector.clone().unwrap();
        assert_eq!(selector["statefulset.kubernetes.io/pod-name"], "foo-solrcloud-1");
    }
}
