//! The LimitRange conformance scenario
//!
//! One LimitRange with a single `Container` rule is created in a fresh
//! namespace, then probed with pods:
//!
//! 1. the LimitRange is created and its `Added` watch event observed
//! 2. pods without (or with partial) requirements get the rule's defaults
//! 3. pods below `min` or above `max` are refused
//! 4. after lowering `min`, a previously refused pod is admitted while the
//!    over-`max` pod is still refused
//! 5. after deleting the LimitRange, the over-`max` pod is admitted
//!
//! Expected requirements are derived from the local defaulting model, and each
//! case's expected outcome is checked against the model before the cluster is
//! asked, so a broken fixture fails loudly instead of producing a false pass.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{LimitRange, LimitRangeItem, Pod, ResourceRequirements};
use kube::api::{Api, DeleteParams, ListParams, PostParams, WatchParams};
use kube::{Client, ResourceExt};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use limitrange_common::compare::{equal_resource_list, equal_resource_requirements};
use limitrange_common::defaulting::{predict_admission, LIMIT_TYPE_CONTAINER};
use limitrange_common::kube_utils::{
    delete_namespace, ensure_namespace, is_admission_rejection, label_selector,
    log_cleanup_error, wait_for_default_service_account,
};
use limitrange_common::resources::{describe, requirements, resource_list, ResourceList};
use limitrange_common::wait::{poll_until, wait_for_watch_event, EventType};

use crate::config::{run_id, ConformanceConfig};
use crate::fixtures::{
    first_rule, first_rule_mut, new_limit_range, new_test_pod, policy_labels, LIMIT_RANGE_NAME,
};
use crate::harness::StepReport;
use crate::{Error, Result};

/// Field manager and `managed-by` label value for objects this tool owns
pub const FIELD_MANAGER: &str = "limitrange-conformance";

/// Label carrying the run id on the run's namespace
pub const RUN_ID_LABEL: &str = "limitrange-conformance/run-id";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Field label used when comparing the rule's `min`
const FIELD_MIN: &str = "min";

/// Whether admission should accept a pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expectation {
    /// The pod is created and carries the defaulted requirements
    Admitted,
    /// Creation is refused with 403 or 422
    Rejected,
}

/// A probe pod and what should happen to it
#[derive(Clone, Debug)]
pub struct PodCase {
    /// Pod name, unique within the run
    pub name: &'static str,
    /// Requests as submitted
    pub requests: ResourceList,
    /// Limits as submitted
    pub limits: ResourceList,
    /// Expected admission outcome
    pub expectation: Expectation,
}

impl PodCase {
    fn new(
        name: &'static str,
        expectation: Expectation,
        requests: ResourceList,
        limits: ResourceList,
    ) -> Self {
        Self {
            name,
            requests,
            limits,
            expectation,
        }
    }

    /// Requirements exactly as submitted
    pub fn supplied(&self) -> ResourceRequirements {
        requirements(self.requests.clone(), self.limits.clone())
    }
}

/// Rule of the LimitRange as first submitted
pub fn initial_rule() -> LimitRangeItem {
    LimitRangeItem {
        type_: LIMIT_TYPE_CONTAINER.to_string(),
        min: Some(resource_list("50m", "100Mi", "100Gi")),
        max: Some(resource_list("500m", "500Mi", "500Gi")),
        default: Some(resource_list("500m", "500Mi", "500Gi")),
        default_request: Some(resource_list("100m", "200Mi", "200Gi")),
        max_limit_request_ratio: None,
    }
}

/// `min` the rule is relaxed to mid-run
pub fn relaxed_min() -> ResourceList {
    resource_list("9m", "49Mi", "49Gi")
}

/// What constrains pods once the LimitRange is gone
pub fn unconstrained_rule() -> LimitRangeItem {
    LimitRangeItem {
        type_: LIMIT_TYPE_CONTAINER.to_string(),
        ..Default::default()
    }
}

fn below_min_requests() -> ResourceList {
    resource_list("10m", "50Mi", "50Gi")
}

fn above_max_requests() -> ResourceList {
    resource_list("600m", "600Mi", "600Gi")
}

/// A pod that states nothing gets `defaultRequest` and `default`
pub fn pod_without_requirements() -> PodCase {
    PodCase::new(
        "pod-no-requirements",
        Expectation::Admitted,
        ResourceList::new(),
        ResourceList::new(),
    )
}

/// Requests for memory and storage, a limit for cpu only.
///
/// The cpu request comes from the cpu limit, not from `defaultRequest`.
pub fn pod_with_partial_requirements() -> PodCase {
    PodCase::new(
        "pod-partial-requirements",
        Expectation::Admitted,
        resource_list("", "150Mi", "150Gi"),
        resource_list("300m", "", ""),
    )
}

/// Below the initial `min`
pub fn pod_below_min() -> PodCase {
    PodCase::new(
        "pod-below-min",
        Expectation::Rejected,
        below_min_requests(),
        ResourceList::new(),
    )
}

/// Above `max` while the LimitRange exists
pub fn pod_above_max(name: &'static str) -> PodCase {
    PodCase::new(
        name,
        Expectation::Rejected,
        above_max_requests(),
        ResourceList::new(),
    )
}

/// Same requests as [`pod_below_min`], admitted once `min` is relaxed
pub fn pod_below_former_min() -> PodCase {
    PodCase::new(
        "pod-below-former-min",
        Expectation::Admitted,
        below_min_requests(),
        ResourceList::new(),
    )
}

/// Same requests as [`pod_above_max`], admitted once the LimitRange is gone
pub fn pod_above_former_max() -> PodCase {
    PodCase::new(
        "pod-above-former-max",
        Expectation::Admitted,
        above_max_requests(),
        ResourceList::new(),
    )
}

/// Check a case against the local model and return the requirements the pod
/// should end up with.
///
/// Fails when the model disagrees with the case's expected outcome.
pub fn plan_case(case: &PodCase, rule: &LimitRangeItem) -> Result<ResourceRequirements> {
    let (effective, violations) = predict_admission(&case.supplied(), rule)?;
    match (case.expectation, violations.is_empty()) {
        (Expectation::Admitted, true) => Ok(effective),
        (Expectation::Rejected, false) => {
            for v in &violations {
                debug!(pod = %case.name, resource = %v.resource, violation = %v, "Predicted violation");
            }
            Ok(effective)
        }
        (Expectation::Admitted, false) => Err(Error::assertion(format!(
            "pod {} is expected to be admitted but would violate: {}",
            case.name,
            violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        ))),
        (Expectation::Rejected, true) => Err(Error::assertion(format!(
            "pod {} is expected to be rejected but would be admitted with requests {} limits {}",
            case.name,
            describe(&effective.requests.clone().unwrap_or_default()),
            describe(&effective.limits.clone().unwrap_or_default())
        ))),
    }
}

/// Whether a LimitRange list confirms deletion: nothing matches any more, or
/// the match already carries a deletion timestamp.
fn deletion_observed(items: &[LimitRange]) -> bool {
    match items.first() {
        None => true,
        Some(lr) if lr.metadata.deletion_timestamp.is_some() => {
            debug!(limit_range = %lr.name_any(), "LimitRange has a deletion timestamp");
            true
        }
        Some(lr) => {
            debug!(limit_range = %lr.name_any(), "LimitRange still present");
            false
        }
    }
}

/// Whether `current` already serves `want` as its rule's `min`.
///
/// A mismatch means the update is not visible yet; a quantity that does not
/// parse is an error.
fn min_visible(current: &LimitRange, want: &ResourceList) -> Result<bool> {
    let observed = first_rule(current)
        .and_then(|rule| rule.min.clone())
        .unwrap_or_default();
    match equal_resource_list(FIELD_MIN, want, &observed) {
        Ok(()) => Ok(true),
        Err(e @ Error::Mismatch { .. }) => {
            debug!(reason = %e, "LimitRange update not visible yet");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn require_not_stored(name: &str, stored: Option<&Pod>) -> Result<()> {
    match stored {
        None => Ok(()),
        Some(pod) => Err(Error::assertion(format!(
            "pod {} was rejected but exists in namespace {}",
            name,
            pod.namespace().unwrap_or_default()
        ))),
    }
}

/// Run the scenario in a fresh namespace and report every step.
///
/// The namespace is removed afterwards unless `keep_namespace` is set. A
/// cleanup failure is logged and never replaces the scenario's own result.
pub async fn run(client: Client, config: &ConformanceConfig) -> Result<()> {
    config.validate()?;
    let namespace = config.namespace_name();
    let report = StepReport::new(&format!("limitrange conformance ({})", namespace));
    info!(namespace = %namespace, run_id = %run_id(), "Starting LimitRange conformance run");

    let outcome = run_steps(&client, &namespace, config, &report).await;

    if config.keep_namespace {
        info!(namespace = %namespace, "Keeping namespace");
    } else {
        let start = Instant::now();
        let cleanup = delete_namespace(&client, &namespace).await;
        if let Err(e) = &cleanup {
            log_cleanup_error(&format!("namespace {}", namespace), e);
        }
        report.record(
            &format!("Deleting namespace {}", namespace),
            start.elapsed(),
            cleanup.as_ref().err(),
        );
    }

    let summary = report.finish();
    match outcome {
        Err(e) => Err(e),
        // Only a cleanup failure can fail the summary at this point
        Ok(()) => {
            if let Err(e) = summary {
                warn!(error = %e, "Scenario passed, cleanup did not");
            }
            Ok(())
        }
    }
}

async fn run_steps(
    client: &Client,
    namespace: &str,
    config: &ConformanceConfig,
    report: &StepReport,
) -> Result<()> {
    report
        .step(
            &format!("Creating namespace {}", namespace),
            prepare_namespace(client, namespace, config),
        )
        .await?;
    LimitRangeScenario::new(client.clone(), namespace, config)
        .run(report)
        .await
}

async fn prepare_namespace(
    client: &Client,
    namespace: &str,
    config: &ConformanceConfig,
) -> Result<()> {
    let labels = BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string()),
        (RUN_ID_LABEL.to_string(), run_id().to_string()),
    ]);
    ensure_namespace(client, namespace, &labels, FIELD_MANAGER).await?;
    wait_for_default_service_account(client, namespace, config.setup_poll()).await
}

/// Scenario state bound to one namespace
pub struct LimitRangeScenario<'a> {
    namespace: String,
    limit_ranges: Api<LimitRange>,
    pods: Api<Pod>,
    config: &'a ConformanceConfig,
}

impl<'a> LimitRangeScenario<'a> {
    /// Bind the scenario to `namespace`, which must already exist
    pub fn new(client: Client, namespace: &str, config: &'a ConformanceConfig) -> Self {
        Self {
            namespace: namespace.to_string(),
            limit_ranges: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            config,
        }
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run(&self, report: &StepReport) -> Result<()> {
        let mut rule = initial_rule();
        let limit_range = new_limit_range(
            LIMIT_RANGE_NAME,
            &rule.type_,
            rule.min.clone().unwrap_or_default(),
            rule.max.clone().unwrap_or_default(),
            rule.default.clone().unwrap_or_default(),
            rule.default_request.clone().unwrap_or_default(),
            ResourceList::new(),
        );
        let selector = label_selector(&policy_labels(LIMIT_RANGE_NAME));
        let watch_params = WatchParams::default().labels(&selector);

        let version = report
            .step("Listing LimitRanges", self.require_absent(&selector))
            .await?;
        let events = report
            .step("Setting up watch", async {
                debug!(selector = %selector, resource_version = %version, "Opening LimitRange watch");
                self.limit_ranges
                    .watch(&watch_params, &version)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        report
            .step("Submitting a LimitRange", self.create_limit_range(&limit_range))
            .await?;
        report
            .step(
                "Verifying LimitRange creation was observed",
                async {
                    wait_for_watch_event::<LimitRange, _>(
                        events,
                        &format!("LimitRange {}/{}", self.namespace, LIMIT_RANGE_NAME),
                        EventType::Added,
                        self.config.watch_timeout(),
                    )
                    .await
                    .map(|_| ())
                },
            )
            .await?;
        report
            .step(
                "Fetching the LimitRange to ensure it has proper values",
                self.verify_defaults(&rule),
            )
            .await?;

        report
            .step(
                "Creating a Pod with no resource requirements",
                self.run_case(&pod_without_requirements(), &rule),
            )
            .await?;
        report
            .step(
                "Creating a Pod with partial resource requirements",
                self.run_case(&pod_with_partial_requirements(), &rule),
            )
            .await?;
        report
            .step(
                "Failing to create a Pod with less than min resources",
                self.run_case(&pod_below_min(), &rule),
            )
            .await?;
        report
            .step(
                "Failing to create a Pod with more than max resources",
                self.run_case(&pod_above_max("pod-above-max"), &rule),
            )
            .await?;

        rule.min = Some(relaxed_min());
        report
            .step("Updating a LimitRange", self.update_min(&relaxed_min()))
            .await?;
        report
            .step(
                "Verifying LimitRange updating is effective",
                self.wait_for_min(&relaxed_min()),
            )
            .await?;
        report
            .step(
                "Creating a Pod with less than former min resources",
                self.run_case(&pod_below_former_min(), &rule),
            )
            .await?;
        report
            .step(
                "Failing to create a Pod with more than max resources after update",
                self.run_case(&pod_above_max("pod-above-max-after-update"), &rule),
            )
            .await?;

        report
            .step("Deleting a LimitRange", self.delete_limit_range())
            .await?;
        report
            .step(
                "Verifying the LimitRange was deleted",
                self.wait_for_deletion(&selector),
            )
            .await?;
        report
            .step(
                "Creating a Pod with more than former max resources",
                self.run_case(&pod_above_former_max(), &unconstrained_rule()),
            )
            .await?;

        info!(namespace = %self.namespace, "LimitRange conformance scenario passed");
        Ok(())
    }

    /// Require that no matching LimitRange exists yet and return the list's
    /// resource version, so a watch started from it cannot miss the creation.
    async fn require_absent(&self, selector: &str) -> Result<String> {
        let existing = self
            .limit_ranges
            .list(&ListParams::default().labels(selector))
            .await?;
        if !existing.items.is_empty() {
            return Err(Error::assertion(format!(
                "expected no LimitRange matching {} in {}, found {}",
                selector,
                self.namespace,
                existing
                    .items
                    .iter()
                    .map(|lr| lr.name_any())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(existing
            .metadata
            .resource_version
            .unwrap_or_else(|| "0".to_string()))
    }

    async fn create_limit_range(&self, limit_range: &LimitRange) -> Result<()> {
        let created = self
            .limit_ranges
            .create(&PostParams::default(), limit_range)
            .await?;
        info!(
            limit_range = %created.name_any(),
            namespace = %self.namespace,
            "LimitRange created"
        );
        Ok(())
    }

    /// Get-after-create must return the submitted default request and limit
    async fn verify_defaults(&self, submitted: &LimitRangeItem) -> Result<()> {
        let fetched = self.limit_ranges.get(LIMIT_RANGE_NAME).await?;
        let observed = first_rule(&fetched)
            .ok_or_else(|| Error::assertion(format!("LimitRange {} has no rules", LIMIT_RANGE_NAME)))?;

        let expected = requirements(
            submitted.default_request.clone().unwrap_or_default(),
            submitted.default.clone().unwrap_or_default(),
        );
        let actual = requirements(
            observed.default_request.clone().unwrap_or_default(),
            observed.default.clone().unwrap_or_default(),
        );
        equal_resource_requirements(&expected, &actual).inspect_err(|e| {
            error!(limit_range = ?fetched, error = %e, "LimitRange does not have the submitted defaults");
        })
    }

    /// Submit a probe pod and check the outcome against its expectation
    async fn run_case(&self, case: &PodCase, rule: &LimitRangeItem) -> Result<()> {
        let expected = plan_case(case, rule)?;
        let pod = new_test_pod(
            case.name,
            &self.config.pod_image,
            case.requests.clone(),
            case.limits.clone(),
        );
        match case.expectation {
            Expectation::Admitted => self.create_and_verify_pod(&pod, &expected).await,
            Expectation::Rejected => self.expect_rejected(&pod).await,
        }
    }

    async fn create_and_verify_pod(&self, pod: &Pod, expected: &ResourceRequirements) -> Result<()> {
        let name = pod.name_any();
        self.pods.create(&PostParams::default(), pod).await?;
        info!(pod = %name, "Pod created");

        let fetched = self.pods.get(&name).await?;
        let containers = fetched
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();
        if containers.is_empty() {
            return Err(Error::assertion(format!("pod {} has no containers", name)));
        }
        for container in containers {
            let actual = container.resources.clone().unwrap_or_default();
            equal_resource_requirements(expected, &actual).inspect_err(|e| {
                error!(
                    pod = %name,
                    container = %container.name,
                    error = %e,
                    "Pod does not have the expected requirements"
                );
            })?;
        }
        Ok(())
    }

    /// A refused pod must come back as 403/422 and must not be stored
    async fn expect_rejected(&self, pod: &Pod) -> Result<()> {
        let name = pod.name_any();
        match self.pods.create(&PostParams::default(), pod).await {
            Ok(_) => return Err(Error::unexpected_admission(format!("create pod {}", name))),
            Err(e) if is_admission_rejection(&e) => {
                info!(pod = %name, reason = %e, "Pod rejected as expected");
            }
            Err(e) => return Err(e.into()),
        }
        let stored = self.pods.get_opt(&name).await?;
        require_not_stored(&name, stored.as_ref())
    }

    async fn update_min(&self, min: &ResourceList) -> Result<()> {
        let mut current = self.limit_ranges.get(LIMIT_RANGE_NAME).await?;
        let rule = first_rule_mut(&mut current)
            .ok_or_else(|| Error::assertion(format!("LimitRange {} has no rules", LIMIT_RANGE_NAME)))?;
        rule.min = Some(min.clone());
        self.limit_ranges
            .replace(LIMIT_RANGE_NAME, &PostParams::default(), &current)
            .await?;
        info!(min = %describe(min), "LimitRange min updated");
        Ok(())
    }

    /// Poll until get-after-update returns the new `min`
    async fn wait_for_min(&self, min: &ResourceList) -> Result<()> {
        let description = format!("LimitRange {} min to become {}", LIMIT_RANGE_NAME, describe(min));
        poll_until(&description, self.config.update_poll(), || {
            let api = self.limit_ranges.clone();
            let want = min.clone();
            async move {
                let current = api.get(LIMIT_RANGE_NAME).await.map_err(Error::from)?;
                min_visible(&current, &want)
            }
        })
        .await
    }

    async fn delete_limit_range(&self) -> Result<()> {
        let params = DeleteParams {
            grace_period_seconds: Some(self.config.delete_grace_period_secs),
            ..DeleteParams::default()
        };
        self.limit_ranges.delete(LIMIT_RANGE_NAME, &params).await?;
        info!(
            grace_period_secs = self.config.delete_grace_period_secs,
            "LimitRange deletion requested"
        );
        Ok(())
    }

    /// Poll until the list is empty or the object is marked for deletion
    async fn wait_for_deletion(&self, selector: &str) -> Result<()> {
        let description = format!("LimitRange {} deletion", LIMIT_RANGE_NAME);
        let params = ListParams::default().labels(selector);
        poll_until(&description, self.config.delete_poll(), || {
            let api = self.limit_ranges.clone();
            let params = params.clone();
            async move {
                let list = api.list(&params).await?;
                Ok::<bool, Error>(deletion_observed(&list.items))
            }
        })
        .await
    }
}
