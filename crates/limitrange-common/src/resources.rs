//! Resource list and requirement construction

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// CPU resource name
pub const RESOURCE_CPU: &str = "cpu";
/// Memory resource name
pub const RESOURCE_MEMORY: &str = "memory";
/// Ephemeral storage resource name
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";

/// Resource kind → quantity, the shape of `requests`, `limits`, `min`, `max`, ...
pub type ResourceList = BTreeMap<String, Quantity>;

/// Build a resource list from cpu, memory, and ephemeral-storage strings.
///
/// An empty string leaves that resource out of the list entirely; it is never
/// recorded as zero.
pub fn resource_list(cpu: &str, memory: &str, ephemeral_storage: &str) -> ResourceList {
    [
        (RESOURCE_CPU, cpu),
        (RESOURCE_MEMORY, memory),
        (RESOURCE_EPHEMERAL_STORAGE, ephemeral_storage),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .map(|(name, value)| (name.to_string(), Quantity(value.to_string())))
    .collect()
}

/// Build container requirements from request and limit lists.
///
/// Empty lists become `None`, the same as a manifest that omits the field.
pub fn requirements(requests: ResourceList, limits: ResourceList) -> ResourceRequirements {
    ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    }
}

/// Requests of a container, treating an absent map as empty
pub fn requests_of(reqs: &ResourceRequirements) -> ResourceList {
    reqs.requests.clone().unwrap_or_default()
}

/// Limits of a container, treating an absent map as empty
pub fn limits_of(reqs: &ResourceRequirements) -> ResourceList {
    reqs.limits.clone().unwrap_or_default()
}

/// Render a list as `cpu=100m memory=200Mi` for log lines
pub fn describe(list: &ResourceList) -> String {
    if list.is_empty() {
        return "{}".to_string();
    }
    list.iter()
        .map(|(name, q)| format!("{}={}", name, q.0))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_three_resources() {
        let list = resource_list("50m", "100Mi", "100Gi");
        assert_eq!(list.len(), 3);
        assert_eq!(list[RESOURCE_CPU].0, "50m");
        assert_eq!(list[RESOURCE_MEMORY].0, "100Mi");
        assert_eq!(list[RESOURCE_EPHEMERAL_STORAGE].0, "100Gi");
    }

    #[test]
    fn test_empty_string_omits_resource() {
        let list = resource_list("", "150Mi", "150Gi");
        assert!(!list.contains_key(RESOURCE_CPU));
        assert_eq!(list.len(), 2);

        let list = resource_list("300m", "", "");
        assert_eq!(list.len(), 1);
        assert_eq!(list[RESOURCE_CPU].0, "300m");

        assert!(resource_list("", "", "").is_empty());
    }

    #[test]
    fn test_requirements_drop_empty_lists() {
        let reqs = requirements(ResourceList::new(), ResourceList::new());
        assert!(reqs.requests.is_none());
        assert!(reqs.limits.is_none());

        let reqs = requirements(resource_list("10m", "", ""), ResourceList::new());
        assert_eq!(requests_of(&reqs).len(), 1);
        assert!(limits_of(&reqs).is_empty());
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&ResourceList::new()), "{}");
        assert_eq!(
            describe(&resource_list("100m", "200Mi", "")),
            "cpu=100m memory=200Mi"
        );
    }
}
