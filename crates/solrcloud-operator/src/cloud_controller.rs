use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{DeleteParams, Patch, PatchParams, PostParams},
    runtime::controller::{Action, Controller},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Duration;
use tracing::{debug, error, info};

use crate::{
    config::OperatorConfig,
    crds::cloud::{ExternalMethod, SolrCloud, SolrCloudStatus},
    error::ReconcileError,
    resources::{
        self, ClusterSnapshot, PersistedSecrets, ProvidedConfig,
        addressability::Addressability,
        configmap::{LOG_XML_KEY, SOLR_XML_KEY},
        zookeeper,
    },
};

#[derive(Clone)]
pub struct Ctx {
    pub client: Client,
    pub config: OperatorConfig,
}

pub fn controller(client: Client, config: &OperatorConfig) -> Controller<SolrCloud> {
    let (clouds, workloads): (Api<SolrCloud>, Api<StatefulSet>) = match &config.watch_namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client)),
    };
    Controller::new(clouds, Default::default())
        .owns(workloads, Default::default())
        .shutdown_on_signal()
}

pub async fn reconcile(cloud: Arc<SolrCloud>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    let name = cloud.name_any();
    let ns = cloud
        .namespace()
        .ok_or_else(|| anyhow::anyhow!("SolrCloud {} has no namespace", name))?;

    // Generated objects are owned by the cluster and collected with it.
    if cloud.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let status = observed_status(&cloud)?;
    let snapshot = take_snapshot(&ctx.client, &ns, &cloud, status).await?;
    let artifacts = resources::generate_artifacts(&cloud, &snapshot, &mut rand::rng())?;

    if artifacts.secrets_generated {
        for secret in [&artifacts.basic_auth_secret, &artifacts.bootstrap_secret]
            .into_iter()
            .flatten()
        {
            create_if_absent(&ctx.client, &ns, secret).await?;
        }
    }

    let manager = ctx.config.field_manager.as_str();
    apply(&ctx.client, &ns, &artifacts.config_map, manager).await?;
    apply(&ctx.client, &ns, &artifacts.common_service, manager).await?;
    apply(&ctx.client, &ns, &artifacts.headless_service, manager).await?;
    for svc in &artifacts.node_services {
        apply(&ctx.client, &ns, svc, manager).await?;
    }
    apply(&ctx.client, &ns, &artifacts.stateful_set, manager).await?;
    match &artifacts.ingress {
        Some(ingress) => apply(&ctx.client, &ns, ingress, manager).await?,
        None => delete_if_present::<Ingress>(&ctx.client, &ns, &cloud.ingress_name()).await?,
    }

    let workloads: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
    let observed = workloads
        .get_opt(&cloud.stateful_set_name())
        .await?
        .and_then(|s| s.status);
    let addr = Addressability::new(&cloud);
    let status = SolrCloudStatus {
        zookeeper_connection_info: snapshot.status.zookeeper_connection_info.clone(),
        internal_common_address: Some(addr.internal_common_address()),
        external_common_address: addr.external_common_address(),
        replicas: observed.as_ref().map(|s| s.replicas).unwrap_or_default(),
        ready_replicas: observed
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or_default(),
        message: None,
    };
    let clouds: Api<SolrCloud> = Api::namespaced(ctx.client.clone(), &ns);
    let _ = clouds
        .patch_status(
            &name,
            &PatchParams::apply(manager),
            &Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await?;

    debug!(cloud = %name, namespace = %ns, "reconciled");
    Ok(Action::requeue(ctx.config.requeue))
}

pub fn error_policy(_cloud: Arc<SolrCloud>, err: &ReconcileError, _ctx: Arc<Ctx>) -> Action {
    error!(error = ?err, "reconcile failed");
    Action::requeue(Duration::from_secs(30))
}

/// Status with the coordination connection the nodes should use: the one
/// declared on the resource, else the one the zookeeper controller published.
fn observed_status(cloud: &SolrCloud) -> Result<SolrCloudStatus, ReconcileError> {
    let current = cloud.status.clone().unwrap_or_default();
    let connection = zookeeper::declared_connection(cloud)
        .or_else(|| current.zookeeper_connection_info.clone())
        .filter(|c| !c.internal_connection_string.trim().is_empty())
        .ok_or_else(|| ReconcileError::ZookeeperNotReady(cloud.name_any()))?;
    Ok(SolrCloudStatus {
        zookeeper_connection_info: Some(connection),
        ..current
    })
}

async fn take_snapshot(
    client: &Client,
    ns: &str,
    cloud: &SolrCloud,
    status: SolrCloudStatus,
) -> Result<ClusterSnapshot, ReconcileError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), ns);
    let mut persisted = PersistedSecrets::default();
    if let Some(security) = &cloud.spec.solr_security {
        match &security.basic_auth_secret {
            Some(user_secret) => persisted.user_basic_auth = secrets.get_opt(user_secret).await?,
            None => {
                persisted.basic_auth = secrets.get_opt(&cloud.basic_auth_secret_name()).await?;
                persisted.bootstrap = secrets
                    .get_opt(&cloud.security_bootstrap_secret_name())
                    .await?;
            }
        }
    }

    let mut provided_config = None;
    if let Some(provided) = cloud
        .spec
        .custom_solr_kube_options
        .config_map_options
        .as_ref()
        .and_then(|o| o.provided_config_map.as_ref())
    {
        let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), ns);
        provided_config = config_maps
            .get_opt(provided)
            .await?
            .and_then(|cm| cm.data)
            .and_then(|data| provided_config_of(provided, &data));
    }

    let mut tls_cert_digest = None;
    if let Some(keystore) = cloud
        .spec
        .solr_tls
        .as_ref()
        .filter(|t| t.restart_on_tls_secret_update)
        .and_then(|t| t.pkcs12_secret.as_ref())
    {
        tls_cert_digest = secrets
            .get_opt(&keystore.name)
            .await?
            .and_then(|s| s.data)
            .and_then(|data| data.get(&keystore.key).map(|b| resources::digest(&b.0)));
    }

    let mut host_aliases = BTreeMap::new();
    let addr = Addressability::new(cloud);
    if addr
        .external()
        .is_some_and(|e| e.method == ExternalMethod::Ingress && e.use_external_address)
    {
        let ingresses: Api<Ingress> = Api::namespaced(client.clone(), ns);
        if let Some(ingress) = ingresses.get_opt(&cloud.ingress_name()).await? {
            host_aliases = ingress_host_aliases(cloud, &ingress);
        }
    }

    Ok(ClusterSnapshot {
        status,
        secrets: persisted,
        host_aliases,
        provided_config,
        tls_cert_digest,
    })
}

/// Digests of the files a user config map supplies; `None` when it holds neither.
fn provided_config_of(name: &str, data: &BTreeMap<String, String>) -> Option<ProvidedConfig> {
    let file_digest = |key: &str| data.get(key).map(|content| resources::digest(content.as_bytes()));
    let config = ProvidedConfig {
        config_map: name.to_string(),
        solr_xml_digest: file_digest(SOLR_XML_KEY),
        log_xml_digest: file_digest(LOG_XML_KEY),
    };
    (config.solr_xml_digest.is_some() || config.log_xml_digest.is_some()).then_some(config)
}

/// Pods advertising their external address must resolve it to the ingress
/// from inside the cluster too.
fn ingress_host_aliases(cloud: &SolrCloud, ingress: &Ingress) -> BTreeMap<String, String> {
    let ip = ingress
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|entries| entries.iter().find_map(|e| e.ip.clone()));
    let Some(ip) = ip else {
        return BTreeMap::new();
    };
    let addr = Addressability::new(cloud);
    let Some(domain) = addr.domains().first().copied() else {
        return BTreeMap::new();
    };
    cloud
        .pod_names()
        .iter()
        .map(|pod| (addr.external_node_host(pod, domain), ip.clone()))
        .collect()
}

async fn apply<K>(client: &Client, ns: &str, obj: &K, manager: &str) -> Result<(), ReconcileError>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Serialize
        + DeserializeOwned
        + Clone
        + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), ns);
    let params = PatchParams::apply(manager).force();
    let _ = api.patch(&obj.name_any(), &params, &Patch::Apply(obj)).await?;
    Ok(())
}

/// Credentials are written once; an existing secret is never replaced.
async fn create_if_absent(client: &Client, ns: &str, secret: &Secret) -> Result<(), ReconcileError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), ns);
    match secrets.create(&PostParams::default(), secret).await {
        Ok(_) => {
            info!(secret = %secret.name_any(), namespace = %ns, "created secret");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn delete_if_present<K>(client: &Client, ns: &str, name: &str) -> Result<(), ReconcileError>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + DeserializeOwned
        + Clone
        + Debug,
{
    let api: Api<K> = Api::namespaced(client.clone(), ns);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::cloud::{SolrCloudSpec, ZookeeperConnectionStatus};
    use k8s_openapi::api::networking::v1::{
        IngressLoadBalancerIngress, IngressLoadBalancerStatus, IngressStatus,
    };

    fn cloud(spec: serde_json::Value) -> SolrCloud {
        let mut c = SolrCloud::new("foo", serde_json::from_value::<SolrCloudSpec>(spec).unwrap());
        c.metadata.namespace = Some("ns".into());
        c
    }

    #[test]
    fn declared_connection_wins_over_published_status() {
        let mut c = cloud(serde_json::json!({"zookeeperRef": {"connectionInfo": {
            "internalConnectionString": "zk-a:2181", "chroot": "/a"
        }}}));
        c.status = Some(SolrCloudStatus {
            zookeeper_connection_info: Some(ZookeeperConnectionStatus {
                internal_connection_string: "zk-b:2181".into(),
                ..Default::default()
            }),
            ready_replicas: 2,
            ..Default::default()
        });
        let status = observed_status(&c).unwrap();
        let conn = status.zookeeper_connection_info.unwrap();
        assert_eq!(conn.internal_connection_string, "zk-a:2181");
        assert_eq!(status.ready_replicas, 2);
    }

    #[test]
    fn provided_ensemble_waits_for_published_status() {
        let mut c = cloud(serde_json::json!({"zookeeperRef": {"provided": {}}}));
        assert!(matches!(
            observed_status(&c),
            Err(ReconcileError::ZookeeperNotReady(ref n)) if n == "foo"
        ));
        c.status = Some(SolrCloudStatus {
            zookeeper_connection_info: Some(ZookeeperConnectionStatus {
                internal_connection_string: "foo-zk-client:2181".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert!(observed_status(&c).is_ok());
    }

    #[test]
    fn provided_config_map_digests_each_file() {
        let data = BTreeMap::from([
            ("solr.xml".to_string(), "<solr/>".to_string()),
            ("other".to_string(), "x".to_string()),
        ]);
        let config = provided_config_of("custom", &data).unwrap();
        assert_eq!(config.config_map, "custom");
        assert_eq!(config.solr_xml_digest, Some(resources::digest(b"<solr/>")));
        assert!(config.log_xml_digest.is_none());

        let unrelated = BTreeMap::from([("other".to_string(), "x".to_string())]);
        assert!(provided_config_of("custom", &unrelated).is_none());
    }

    #[test]
    fn host_aliases_point_external_node_names_at_ingress() {
        let c = cloud(serde_json::json!({"replicas": 2, "solrAddressability": {"external": {
            "method": "Ingress", "domainName": "a.com", "useExternalAddress": true
        }}}));
        let ingress = Ingress {
            status: Some(IngressStatus {
                load_balancer: Some(IngressLoadBalancerStatus {
                    ingress: Some(vec![IngressLoadBalancerIngress {
                        ip: Some("10.1.2.3".into()),
                        ..Default::default()
                    }]),
                }),
            }),
            ..Default::default()
        };
        let aliases = ingress_host_aliases(&c, &ingress);
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases["ns-foo-solrcloud-0.a.com"], "10.1.2.3");

        assert!(ingress_host_aliases(&c, &Ingress::default()).is_empty());
    }
}
