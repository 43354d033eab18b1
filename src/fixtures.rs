//! Objects the run submits: the LimitRange under test and its probe pods

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, LimitRange, LimitRangeItem, LimitRangeSpec, Pod, PodSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use limitrange_common::resources::{requirements, ResourceList};

/// Name of the LimitRange created by the scenario
pub const LIMIT_RANGE_NAME: &str = "limit-range";

/// Label key carrying the LimitRange's own name, used as its list/watch selector
pub const POLICY_LABEL_KEY: &str = "name";

/// Name of the single container in every test pod
pub const TEST_CONTAINER_NAME: &str = "pause";

/// Labels put on a LimitRange so it can be selected by name
pub fn policy_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(POLICY_LABEL_KEY.to_string(), name.to_string())])
}

/// Build a LimitRange with a single rule.
///
/// Empty lists are left out of the rule rather than sent as empty maps.
pub fn new_limit_range(
    name: &str,
    limit_type: &str,
    min: ResourceList,
    max: ResourceList,
    default: ResourceList,
    default_request: ResourceList,
    max_limit_request_ratio: ResourceList,
) -> LimitRange {
    LimitRange {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(policy_labels(name)),
            ..Default::default()
        },
        spec: Some(LimitRangeSpec {
            limits: vec![LimitRangeItem {
                type_: limit_type.to_string(),
                min: non_empty(min),
                max: non_empty(max),
                default: non_empty(default),
                default_request: non_empty(default_request),
                max_limit_request_ratio: non_empty(max_limit_request_ratio),
            }],
        }),
    }
}

/// The first (and only) rule of a LimitRange built by [`new_limit_range`]
pub fn first_rule(limit_range: &LimitRange) -> Option<&LimitRangeItem> {
    limit_range.spec.as_ref().and_then(|spec| spec.limits.first())
}

/// Mutable access to the first rule, for updates
pub fn first_rule_mut(limit_range: &mut LimitRange) -> Option<&mut LimitRangeItem> {
    limit_range
        .spec
        .as_mut()
        .and_then(|spec| spec.limits.first_mut())
}

/// Build a single-container pod with the given requests and limits.
///
/// Empty lists are omitted, as in a manifest that does not mention them.
pub fn new_test_pod(
    name: &str,
    image: &str,
    requests: ResourceList,
    limits: ResourceList,
) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: TEST_CONTAINER_NAME.to_string(),
                image: Some(image.to_string()),
                resources: Some(requirements(requests, limits)),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn non_empty(list: ResourceList) -> Option<ResourceList> {
    (!list.is_empty()).then_some(list)
}
