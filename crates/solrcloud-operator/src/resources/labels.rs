use std::collections::BTreeMap;

use crate::crds::cloud::SolrCloud;

type Map = BTreeMap<String, String>;

/// Layer `overrides` on top of `base`; keys present in both take the override value.
pub fn merge(base: &Map, overrides: &Map) -> Map {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Resolve the labels and annotations of a generated object.
///
/// Internal labels form the base layer, the cluster resource's own labels
/// come next and the object-kind override wins over both. Keys of the
/// internal base are reserved and always keep their internal value.
/// Annotations follow the same layering without reserved keys.
pub fn normalize(
    base_labels: &Map,
    base_annotations: &Map,
    override_labels: Option<&Map>,
    override_annotations: Option<&Map>,
    global_labels: Option<&Map>,
) -> (Map, Map) {
    let empty = Map::new();
    let mut labels = merge(
        &merge(base_labels, global_labels.unwrap_or(&empty)),
        override_labels.unwrap_or(&empty),
    );
    labels.extend(base_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    let annotations = merge(base_annotations, override_annotations.unwrap_or(&empty));
    (labels, annotations)
}

/// Labels and annotations for an object of `cloud`, with `extra` internal labels
/// and the kind-specific override layer.
pub fn object_meta_maps(
    cloud: &SolrCloud,
    extra: &[(&str, &str)],
    base_annotations: Map,
    override_labels: Option<&Map>,
    override_annotations: Option<&Map>,
) -> (Map, Map) {
    let mut base = cloud.selector_labels();
    base.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    normalize(
        &base,
        &base_annotations,
        override_labels,
        override_annotations,
        cloud.metadata.labels.as_ref(),
    )
}
