//! Host names and ports under which the cluster and its pods are reachable.
//!
//! Three modes exist: internal only (no `external` block), external through
//! ingress rules, and external through DNS records managed by external-dns.

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend,
    ServiceBackendPort,
};

use crate::crds::cloud::{ExternalAddressability, ExternalMethod, SolrCloud};

pub const EXTERNAL_DNS_HOSTNAME: &str = "external-dns.alpha.kubernetes.io/hostname";

pub struct Addressability<'a> {
    cloud: &'a SolrCloud,
}

impl<'a> Addressability<'a> {
    pub fn new(cloud: &'a SolrCloud) -> Self {
        Self { cloud }
    }

    fn namespace(&self) -> String {
        self.cloud.metadata.namespace.clone().unwrap_or_default()
    }

    pub fn external(&self) -> Option<&'a ExternalAddressability> {
        self.cloud.spec.solr_addressability.external.as_ref()
    }

    /// Configured external domains, primary first. Blank entries are dropped.
    pub fn domains(&self) -> Vec<&'a str> {
        let Some(ext) = self.external() else {
            return Vec::new();
        };
        std::iter::once(ext.domain_name.as_str())
            .chain(ext.additional_domain_names.iter().map(String::as_str))
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .collect()
    }

    fn method(&self) -> Option<ExternalMethod> {
        self.external().map(|e| e.method)
    }

    /// External settings, only when exposure is requested and at least one domain exists
    fn exposed(&self) -> Option<&'a ExternalAddressability> {
        self.external().filter(|_| !self.domains().is_empty())
    }

    /// Whether each pod gets its own service for ingress routing
    pub fn uses_individual_node_services(&self) -> bool {
        self.exposed()
            .is_some_and(|e| e.method == ExternalMethod::Ingress && !e.hide_nodes)
    }

    pub fn pod_port(&self) -> i32 {
        self.cloud.spec.solr_addressability.pod_port
    }

    pub fn common_service_port(&self) -> i32 {
        self.cloud.spec.solr_addressability.common_service_port
    }

    /// Port the nodes advertise to each other
    pub fn node_port(&self) -> i32 {
        match self.exposed().and_then(|e| e.node_port_override) {
            Some(port) if port > 0 && self.uses_individual_node_services() => port,
            _ => self.pod_port(),
        }
    }

    fn kube_domain_suffix(&self) -> String {
        match &self.cloud.spec.solr_addressability.kube_domain {
            Some(domain) if !domain.is_empty() => format!(".svc.{}", domain),
            _ => String::new(),
        }
    }

    pub fn internal_node_host(&self, pod: &str) -> String {
        format!(
            "{}.{}.{}{}",
            pod,
            self.cloud.headless_service_name(),
            self.namespace(),
            self.kube_domain_suffix()
        )
    }

    pub fn internal_common_host(&self) -> String {
        format!(
            "{}.{}{}",
            self.cloud.common_service_name(),
            self.namespace(),
            self.kube_domain_suffix()
        )
    }

    fn dns_domain(&self, domain: &str) -> String {
        format!("{}.{}", self.namespace(), domain)
    }

    pub fn external_node_host(&self, pod: &str, domain: &str) -> String {
        match self.method() {
            Some(ExternalMethod::ExternalDNS) => format!("{}.{}", pod, self.dns_domain(domain)),
            _ => format!("{}-{}.{}", self.namespace(), pod, domain),
        }
    }

    pub fn external_common_host(&self, domain: &str) -> String {
        match self.method() {
            Some(ExternalMethod::ExternalDNS) => format!(
                "{}.{}",
                self.cloud.common_service_name(),
                self.dns_domain(domain)
            ),
            _ => format!(
                "{}-{}.{}",
                self.namespace(),
                self.cloud.common_service_name(),
                domain
            ),
        }
    }

    /// Host a pod registers itself under in the cluster state
    pub fn advertised_node_host(&self, pod: &str) -> String {
        match self.exposed() {
            Some(ext) if ext.use_external_address && !ext.hide_nodes => {
                self.external_node_host(pod, self.domains()[0])
            }
            _ if self.uses_individual_node_services() => {
                format!("{}.{}{}", pod, self.namespace(), self.kube_domain_suffix())
            }
            _ => self.internal_node_host(pod),
        }
    }

    /// Externally reachable common address of the first domain, if exposed
    pub fn external_common_address(&self) -> Option<String> {
        let ext = self.exposed()?;
        if ext.hide_common {
            return None;
        }
        Some(format!(
            "{}://{}",
            self.cloud.url_scheme(),
            self.external_common_host(self.domains()[0])
        ))
    }

    pub fn internal_common_address(&self) -> String {
        format!(
            "{}://{}:{}",
            self.cloud.url_scheme(),
            self.internal_common_host(),
            self.common_service_port()
        )
    }

    /// external-dns hostname annotation value for the common service
    pub fn common_dns_hostnames(&self) -> Option<String> {
        let ext = self.exposed()?;
        (ext.method == ExternalMethod::ExternalDNS && !ext.hide_common)
            .then(|| self.dns_domains())
    }

    /// external-dns hostname annotation value for the headless service.
    /// external-dns publishes each pod as `<pod>.<hostname>`.
    pub fn headless_dns_hostnames(&self) -> Option<String> {
        let ext = self.exposed()?;
        (ext.method == ExternalMethod::ExternalDNS && !ext.hide_nodes)
            .then(|| self.dns_domains())
    }

    /// `<namespace>.<domain>` for every domain, comma separated
    fn dns_domains(&self) -> String {
        self.domains()
            .into_iter()
            .map(|d| self.dns_domain(d))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Ingress rules for every (domain) common host and (pod, domain) node host,
    /// together with the hosts they cover, in emission order.
    pub fn ingress_rules(&self, pods: &[String]) -> (Vec<IngressRule>, Vec<String>) {
        let Some(ext) = self.exposed() else {
            return (Vec::new(), Vec::new());
        };
        let domains = self.domains();
        let mut rules = Vec::new();
        if !ext.hide_common {
            for domain in &domains {
                rules.push(rule(
                    self.external_common_host(domain),
                    self.cloud.common_service_name(),
                    self.common_service_port(),
                ));
            }
        }
        if !ext.hide_nodes {
            for pod in pods {
                for domain in &domains {
                    rules.push(rule(
                        self.external_node_host(pod, domain),
                        pod.clone(),
                        self.node_port(),
                    ));
                }
            }
        }
        let hosts = rules.iter().filter_map(|r| r.host.clone()).collect();
        (rules, hosts)
    }
}

fn rule(host: String, service: String, port: i32) -> IngressRule {
    IngressRule {
        host: Some(host),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: service,
                        port: Some(ServiceBackendPort {
                            number: Some(port),
                            name: None,
                        }),
                    }),
                    resource: None,
                },
                path: None,
                path_type: "ImplementationSpecific".into(),
            }],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::cloud::SolrCloudSpec;

    fn cloud(spec: serde_json::Value) -> SolrCloud {
        let mut c = SolrCloud::new("foo", serde_json::from_value::<SolrCloudSpec>(spec).unwrap());
        c.metadata.namespace = Some("ns".into());
        c
    }

    #[test]
    fn internal_hosts_use_headless_service() {
        let c = cloud(serde_json::json!({}));
        let a = Addressability::new(&c);
        assert_eq!(
            a.advertised_node_host("foo-solrcloud-0"),
            "foo-solrcloud-0.foo-solrcloud-headless.ns"
        );
        assert_eq!(a.node_port(), 8983);
        assert_eq!(
            a.internal_common_address(),
            "http://foo-solrcloud-common.ns:80"
        );
        assert!(a.external_common_address().is_none());
    }

    #[test]
    fn kube_domain_is_appended() {
        let c = cloud(serde_json::json!({"solrAddressability": {"kubeDomain": "cluster.local"}}));
        let a = Addressability::new(&c);
        assert_eq!(
            a.internal_node_host("p"),
            "p.foo-solrcloud-headless.ns.svc.cluster.local"
        );
    }

    #[test]
    fn ingress_rules_cover_every_domain_and_pod() {
        let c = cloud(serde_json::json!({"replicas": 3, "solrAddressability": {"external": {
            "method": "Ingress",
            "domainName": "a.com",
            "additionalDomainNames": ["b.com"],
            "useExternalAddress": true,
            "nodePortOverride": 80
        }}}));
        let a = Addressability::new(&c);
        let (rules, hosts) = a.ingress_rules(&c.pod_names());
        assert_eq!(rules.len(), 2 + 2 * 3);
        assert_eq!(hosts[0], "ns-foo-solrcloud-common.a.com");
        assert_eq!(hosts[1], "ns-foo-solrcloud-common.b.com");
        assert_eq!(hosts[2], "ns-foo-solrcloud-0.a.com");
        assert_eq!(hosts[3], "ns-foo-solrcloud-0.b.com");
        assert_eq!(a.node_port(), 80);
        assert_eq!(a.advertised_node_host("foo-solrcloud-1"), "ns-foo-solrcloud-1.a.com");
    }

    #[test]
    fn no_domains_fails_closed() {
        let c = cloud(serde_json::json!({"solrAddressability": {"external": {
            "method": "Ingress", "domainName": " "
        }}}));
        let a = Addressability::new(&c);
        let (rules, _) = a.ingress_rules(&c.pod_names());
        assert!(rules.is_empty());
        assert!(!a.uses_individual_node_services());
        assert_eq!(
            a.advertised_node_host("foo-solrcloud-0"),
            "foo-solrcloud-0.foo-solrcloud-headless.ns"
        );
    }

    #[test]
    fn dns_hostnames_respect_hidden_common() {
        let c = cloud(serde_json::json!({"solrAddressability": {"external": {
            "method": "ExternalDNS",
            "domainName": "a.com",
            "additionalDomainNames": ["b.com", "c.com"],
            "hideCommon": true
        }}}));
        let a = Addressability::new(&c);
        assert!(a.common_dns_hostnames().is_none());
        assert_eq!(
            a.headless_dns_hostnames().as_deref(),
            Some("ns.a.com,ns.b.com,ns.c.com")
        );
        assert_eq!(a.external_node_host("p", "b.com"), "p.ns.b.com");
    }

    #[test]
    fn common_service_dns_names_the_namespace_zone() {
        let c = cloud(serde_json::json!({"solrAddressability": {"external": {
            "method": "ExternalDNS",
            "domainName": "a.com",
            "additionalDomainNames": ["b.com"]
        }}}));
        let a = Addressability::new(&c);
        assert_eq!(a.common_dns_hostnames().as_deref(), Some("ns.a.com,ns.b.com"));
        assert_eq!(a.external_common_host("a.com"), "foo-solrcloud-common.ns.a.com");
    }
}
