use kube::core::CustomResourceExt;
use solrcloud_operator::crds::cloud::SolrCloud;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&SolrCloud::crd())?);
    Ok(())
}
