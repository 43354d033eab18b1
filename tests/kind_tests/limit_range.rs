//! Cluster stories for LimitRange defaulting and admission
//!
//! Each story creates a LimitRange in its own namespace and checks what the
//! API server does with pods submitted under it.

use k8s_openapi::api::core::v1::{LimitRange, Pod};
use kube::api::{Api, PostParams, WatchParams};
use kube::Client;

use limitrange_common::compare::equal_resource_requirements;
use limitrange_common::defaulting::LIMIT_TYPE_CONTAINER;
use limitrange_common::kube_utils::{is_admission_rejection, label_selector};
use limitrange_common::resources::{requirements, resource_list, ResourceList};
use limitrange_common::wait::{wait_for_watch_event, EventType};
use limitrange_conformance::config::ConformanceConfig;
use limitrange_conformance::fixtures::{new_limit_range, new_test_pod, policy_labels, LIMIT_RANGE_NAME};
use limitrange_conformance::scenario;

use super::helpers::{ensure_test_cluster, TestNamespace};

// =============================================================================
// Test Fixtures
// =============================================================================

const POD_IMAGE: &str = "registry.k8s.io/pause:3.10";

/// The rule every story starts from
fn sample_limit_range() -> LimitRange {
    new_limit_range(
        LIMIT_RANGE_NAME,
        LIMIT_TYPE_CONTAINER,
        resource_list("50m", "100Mi", "100Gi"),
        resource_list("500m", "500Mi", "500Gi"),
        resource_list("500m", "500Mi", "500Gi"),
        resource_list("100m", "200Mi", "200Gi"),
        ResourceList::new(),
    )
}

async fn create_sample_limit_range(client: &Client, namespace: &str) -> Api<LimitRange> {
    let api: Api<LimitRange> = Api::namespaced(client.clone(), namespace);
    api.create(&PostParams::default(), &sample_limit_range())
        .await
        .expect("failed to create LimitRange");
    api
}

// =============================================================================
// Defaulting Stories
// =============================================================================

/// Story: A pod that states no requirements gets the LimitRange defaults
///
/// Expected behavior:
/// - requests come from defaultRequest
/// - limits come from default
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_pod_without_requirements_gets_defaults() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let ns = TestNamespace::create(&client, "defaults")
        .await
        .expect("failed to create namespace");
    create_sample_limit_range(&client, ns.name()).await;

    let pods: Api<Pod> = Api::namespaced(client.clone(), ns.name());
    let created = pods
        .create(
            &PostParams::default(),
            &new_test_pod("pod-empty", POD_IMAGE, ResourceList::new(), ResourceList::new()),
        )
        .await
        .expect("pod without requirements should be admitted");

    let resources = created.spec.unwrap().containers[0]
        .resources
        .clone()
        .unwrap_or_default();
    let expected = requirements(
        resource_list("100m", "200Mi", "200Gi"),
        resource_list("500m", "500Mi", "500Gi"),
    );
    let result = equal_resource_requirements(&expected, &resources);

    ns.cleanup().await;
    result.expect("pod should carry the LimitRange defaults");
}

/// Story: A limit without a request sets the request, not defaultRequest
///
/// The cpu limit of 300m becomes the cpu request too; memory and storage
/// keep their requests and get the default limits.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_limit_without_request_wins_over_default_request() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let ns = TestNamespace::create(&client, "partial")
        .await
        .expect("failed to create namespace");
    create_sample_limit_range(&client, ns.name()).await;

    let pods: Api<Pod> = Api::namespaced(client.clone(), ns.name());
    let created = pods
        .create(
            &PostParams::default(),
            &new_test_pod(
                "pod-partial",
                POD_IMAGE,
                resource_list("", "150Mi", "150Gi"),
                resource_list("300m", "", ""),
            ),
        )
        .await
        .expect("pod with partial requirements should be admitted");

    let resources = created.spec.unwrap().containers[0]
        .resources
        .clone()
        .unwrap_or_default();
    let expected = requirements(
        resource_list("300m", "150Mi", "150Gi"),
        resource_list("300m", "500Mi", "500Gi"),
    );
    let result = equal_resource_requirements(&expected, &resources);

    ns.cleanup().await;
    result.expect("cpu request should follow the cpu limit");
}

// =============================================================================
// Admission Stories
// =============================================================================

/// Story: Pods outside [min, max] are refused and never stored
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_out_of_range_pods_are_refused() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let ns = TestNamespace::create(&client, "bounds")
        .await
        .expect("failed to create namespace");
    create_sample_limit_range(&client, ns.name()).await;

    let pods: Api<Pod> = Api::namespaced(client.clone(), ns.name());
    let below = pods
        .create(
            &PostParams::default(),
            &new_test_pod(
                "pod-below-min",
                POD_IMAGE,
                resource_list("10m", "50Mi", "50Gi"),
                ResourceList::new(),
            ),
        )
        .await;
    let above = pods
        .create(
            &PostParams::default(),
            &new_test_pod(
                "pod-above-max",
                POD_IMAGE,
                resource_list("600m", "600Mi", "600Gi"),
                ResourceList::new(),
            ),
        )
        .await;
    let stored = pods.get_opt("pod-below-min").await;

    ns.cleanup().await;
    match below {
        Err(e) => assert!(is_admission_rejection(&e), "unexpected error: {}", e),
        Ok(_) => panic!("pod below min should be refused"),
    }
    match above {
        Err(e) => assert!(is_admission_rejection(&e), "unexpected error: {}", e),
        Ok(_) => panic!("pod above max should be refused"),
    }
    assert!(stored.expect("get should succeed").is_none());
}

// =============================================================================
// Lifecycle Stories
// =============================================================================

/// Story: A watch opened before creation sees the LimitRange arrive
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_watch_observes_creation() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let ns = TestNamespace::create(&client, "watch")
        .await
        .expect("failed to create namespace");

    let api: Api<LimitRange> = Api::namespaced(client.clone(), ns.name());
    let selector = label_selector(&policy_labels(LIMIT_RANGE_NAME));
    let params = WatchParams::default().labels(&selector);
    let events = api.watch(&params, "0").await.expect("failed to open watch");
    api.create(&PostParams::default(), &sample_limit_range())
        .await
        .expect("failed to create LimitRange");

    let observed = wait_for_watch_event(
        events,
        LIMIT_RANGE_NAME,
        EventType::Added,
        ConformanceConfig::default().watch_timeout(),
    )
    .await;

    ns.cleanup().await;
    let observed = observed.expect("ADDED event should arrive");
    assert_eq!(observed.metadata.name.as_deref(), Some(LIMIT_RANGE_NAME));
}

/// Story: The whole scenario passes end to end
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_full_scenario_passes() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let config = ConformanceConfig {
        namespace_prefix: "lr-kind-full".to_string(),
        ..Default::default()
    };
    scenario::run(client, &config)
        .await
        .expect("scenario should pass");
}
