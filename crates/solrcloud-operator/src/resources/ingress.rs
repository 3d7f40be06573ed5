use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{Ingress, IngressSpec, IngressTLS};

use super::addressability::Addressability;
use super::{labels, object_meta};
use crate::crds::cloud::{ExternalMethod, SolrCloud};

pub const BACKEND_PROTOCOL: &str = "nginx.ingress.kubernetes.io/backend-protocol";
pub const SSL_REDIRECT: &str = "nginx.ingress.kubernetes.io/ssl-redirect";

/// Ingress routing the common and per-pod hosts.
///
/// Returns `None` unless ingress exposure is requested with at least one
/// domain and at least one rule to route.
pub fn ingress(cloud: &SolrCloud) -> Option<Ingress> {
    let addr = Addressability::new(cloud);
    let ext = addr.external()?;
    if ext.method != ExternalMethod::Ingress {
        return None;
    }
    let (rules, hosts) = addr.ingress_rules(&cloud.pod_names());
    if rules.is_empty() {
        return None;
    }

    let mut tls = Vec::new();
    if let Some(secret) = cloud
        .spec
        .solr_tls
        .as_ref()
        .and_then(|t| t.pkcs12_secret.as_ref())
    {
        tls.push(IngressTLS {
            secret_name: Some(secret.name.clone()),
            hosts: None,
        });
    }
    if let Some(secret) = ext
        .ingress_tls_termination_secret
        .as_ref()
        .filter(|s| !s.is_empty())
    {
        tls.push(IngressTLS {
            secret_name: Some(secret.clone()),
            hosts: Some(hosts),
        });
    }

    let options = cloud.spec.custom_solr_kube_options.ingress_options.as_ref();
    let (labels, mut annotations) = labels::object_meta_maps(
        cloud,
        &[],
        BTreeMap::new(),
        options.map(|o| &o.labels),
        options.map(|o| &o.annotations),
    );
    let backend = if cloud.spec.solr_tls.is_some() {
        "HTTPS"
    } else {
        "HTTP"
    };
    annotations
        .entry(BACKEND_PROTOCOL.into())
        .or_insert_with(|| backend.into());
    if !tls.is_empty() {
        annotations
            .entry(SSL_REDIRECT.into())
            .or_insert_with(|| "true".into());
    }

    Some(Ingress {
        metadata: object_meta(cloud, cloud.ingress_name(), labels, annotations),
        spec: Some(IngressSpec {
            ingress_class_name: options.and_then(|o| o.ingress_class_name.clone()),
            rules: Some(rules),
            tls: (!tls.is_empty()).then_some(tls),
            ..Default::default()
        }),
        ..Default::default()
    })
}
