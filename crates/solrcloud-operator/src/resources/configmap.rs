use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use super::backup::{RepositoryBinding, solr_xml_section};
use super::{labels, object_meta};
use crate::crds::cloud::SolrCloud;

pub const SOLR_XML_KEY: &str = "solr.xml";
pub const LOG_XML_KEY: &str = "log4j2.xml";

const SOLR_XML_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<solr>
  <solrcloud>
    <str name="host">${host:}</str>
    <int name="hostPort">${hostPort:80}</int>
    <str name="hostContext">${hostContext:solr}</str>
    <bool name="genericCoreNodeNames">${genericCoreNodeNames:true}</bool>
    <int name="zkClientTimeout">${zkClientTimeout:30000}</int>
    <int name="distribUpdateSoTimeout">${distribUpdateSoTimeout:600000}</int>
    <int name="distribUpdateConnTimeout">${distribUpdateConnTimeout:60000}</int>
    <str name="zkCredentialsProvider">${zkCredentialsProvider:org.apache.solr.common.cloud.DefaultZkCredentialsProvider}</str>
    <str name="zkACLProvider">${zkACLProvider:org.apache.solr.common.cloud.DefaultZkACLProvider}</str>
  </solrcloud>
  <shardHandlerFactory name="shardHandlerFactory"
    class="HttpShardHandlerFactory">
    <int name="socketTimeout">${socketTimeout:600000}</int>
    <int name="connTimeout">${connTimeout:60000}</int>
  </shardHandlerFactory>
"#;

/// Startup document with the backup section of `bindings` substituted in
pub fn solr_xml(bindings: &[RepositoryBinding]) -> String {
    format!("{}  {}\n</solr>\n", SOLR_XML_HEAD, solr_xml_section(bindings))
}

pub fn config_map(cloud: &SolrCloud, solr_xml: &str) -> ConfigMap {
    let options = cloud.spec.custom_solr_kube_options.config_map_options.as_ref();
    let (labels, annotations) = labels::object_meta_maps(
        cloud,
        &[],
        BTreeMap::new(),
        options.map(|o| &o.labels),
        options.map(|o| &o.annotations),
    );
    ConfigMap {
        metadata: object_meta(cloud, cloud.config_map_name(), labels, annotations),
        data: Some(BTreeMap::from([(
            SOLR_XML_KEY.to_string(),
            solr_xml.to_string(),
        )])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::backup::BackupRepository;
    use crate::crds::cloud::SolrCloudSpec;
    use crate::resources::backup::bind_all;

    #[test]
    fn template_without_repositories_has_no_backup_section() {
        let xml = solr_xml(&[]);
        assert!(xml.starts_with("<?xml"));
        assert!(!xml.contains("<backup>"));
        assert!(xml.ends_with("</solr>\n"));
    }

    #[test]
    fn repositories_are_embedded() {
        let repos: Vec<BackupRepository> = serde_json::from_value(serde_json::json!([
            {"name": "local", "volume": {"source": {"emptyDir": {}}}}
        ]))
        .unwrap();
        let xml = solr_xml(&bind_all(&repos).unwrap());
        assert!(xml.contains("<backup>"));
        assert!(xml.contains(r#"<repository name="local""#));
    }

    #[test]
    fn config_map_carries_document_and_labels() {
        let mut cloud = SolrCloud::new(
            "foo",
            serde_json::from_value::<SolrCloudSpec>(serde_json::json!({
                "customSolrKubeOptions": {"configMapOptions": {"labels": {"x": "y"}}}
            }))
            .unwrap(),
        );
        cloud.metadata.namespace = Some("ns".into());
        let cm = config_map(&cloud, "<solr/>");
        assert_eq!(cm.metadata.name.as_deref(), Some("foo-solrcloud-configmap"));
        assert_eq!(cm.metadata.namespace.as_deref(), Some("ns"));
        let labels = cm.metadata.labels.unwrap();
        assert_eq!(labels["x"], "y");
        assert_eq!(labels["solr-cloud"], "foo");
        assert_eq!(cm.data.unwrap()[SOLR_XML_KEY], "<solr/>");
    }
}
