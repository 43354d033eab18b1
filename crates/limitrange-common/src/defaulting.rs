//! Local model of how the API server resolves container resources under a
//! LimitRange.
//!
//! Two mutations happen before a Pod is stored:
//!
//! 1. Pod defaulting (at decode time): a resource with a limit but no request
//!    gets `request = limit`.
//! 2. LimitRange defaulting (mutating admission): resources still missing a
//!    limit get the rule's `default`, resources still missing a request get
//!    the rule's `defaultRequest`.
//!
//! Because step 1 runs first, `defaultRequest` only takes effect for resources
//! that had no limit at all. The model reproduces that order so expectations
//! are derived rather than hard-coded, and predicts which containers the
//! validating half of admission will refuse.

use k8s_openapi::api::core::v1::{LimitRangeItem, ResourceRequirements};

use crate::quantity::{parse_quantity, ParsedQuantity};
use crate::resources::{limits_of, requests_of, requirements, ResourceList};
use crate::Result;

/// `LimitRangeItem.type` value for per-container rules
pub const LIMIT_TYPE_CONTAINER: &str = "Container";
/// `LimitRangeItem.type` value for per-pod rules
pub const LIMIT_TYPE_POD: &str = "Pod";

/// Compute the requirements a container ends up with after pod defaulting and
/// LimitRange defaulting.
pub fn effective_requirements(
    supplied: &ResourceRequirements,
    item: &LimitRangeItem,
) -> ResourceRequirements {
    let mut requests = requests_of(supplied);
    let mut limits = limits_of(supplied);

    for (name, limit) in &limits {
        requests
            .entry(name.clone())
            .or_insert_with(|| limit.clone());
    }

    for (name, default) in item.default.iter().flatten() {
        limits
            .entry(name.clone())
            .or_insert_with(|| default.clone());
    }
    for (name, default) in item.default_request.iter().flatten() {
        requests
            .entry(name.clone())
            .or_insert_with(|| default.clone());
    }

    requirements(requests, limits)
}

/// A reason admission would refuse a container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// Resource kind the rule applies to
    pub resource: String,
    /// Human-readable description in the API server's wording
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Predict the constraints a container's effective requirements break.
///
/// Mirrors the LimitRange validation rules for `Container` items:
/// - `min`: a request must exist and be >= min; a limit, if present, >= min
/// - `max`: a limit must exist and be <= max; a request, if present, <= max
/// - `maxLimitRequestRatio`: both must exist and limit/request <= ratio
///
/// A request larger than its limit is reported too, since pod validation
/// refuses it before the LimitRange rules are even consulted.
pub fn admission_violations(
    effective: &ResourceRequirements,
    item: &LimitRangeItem,
) -> Result<Vec<Violation>> {
    let requests = parse_list(&requests_of(effective))?;
    let limits = parse_list(&limits_of(effective))?;
    let mut violations = Vec::new();

    for (name, request) in &requests {
        if let Some(limit) = limits.get(name) {
            if request > limit {
                violations.push(violation(
                    name,
                    format!("{} request {} must be less than or equal to {} limit {}", name, request, name, limit),
                ));
            }
        }
    }

    for (name, min) in item.min.iter().flatten() {
        let min = parse_quantity(min)?;
        match requests.get(name) {
            None => violations.push(violation(
                name,
                format!("minimum {} usage per Container is {}. No request is specified", name, min),
            )),
            Some(request) if *request < min => violations.push(violation(
                name,
                format!("minimum {} usage per Container is {}, but request is {}", name, min, request),
            )),
            Some(_) => {}
        }
        if let Some(limit) = limits.get(name).filter(|limit| **limit < min) {
            violations.push(violation(
                name,
                format!("minimum {} usage per Container is {}, but limit is {}", name, min, limit),
            ));
        }
    }

    for (name, max) in item.max.iter().flatten() {
        let max = parse_quantity(max)?;
        match limits.get(name) {
            None => violations.push(violation(
                name,
                format!("maximum {} usage per Container is {}. No limit is specified", name, max),
            )),
            Some(limit) if *limit > max => violations.push(violation(
                name,
                format!("maximum {} usage per Container is {}, but limit is {}", name, max, limit),
            )),
            Some(_) => {}
        }
        if let Some(request) = requests.get(name).filter(|request| **request > max) {
            violations.push(violation(
                name,
                format!("maximum {} usage per Container is {}, but request is {}", name, max, request),
            ));
        }
    }

    for (name, ratio) in item.max_limit_request_ratio.iter().flatten() {
        let ratio = parse_quantity(ratio)?;
        let (request, limit) = match (requests.get(name), limits.get(name)) {
            (Some(request), Some(limit)) => (request, limit),
            (None, _) => {
                violations.push(violation(
                    name,
                    format!("{} max limit to request ratio per Container is {}, but no request is specified", name, ratio),
                ));
                continue;
            }
            (_, None) => {
                violations.push(violation(
                    name,
                    format!("{} max limit to request ratio per Container is {}, but no limit is specified", name, ratio),
                ));
                continue;
            }
        };
        let exceeds = match limit.ratio_cmp(request, &ratio) {
            Some(ordering) => ordering.is_gt(),
            // A zero request makes any positive limit an unbounded ratio
            None => !limit.is_zero(),
        };
        if exceeds {
            violations.push(violation(
                name,
                format!(
                    "{} max limit to request ratio per Container is {}, but provided ratio exceeds it (limit {}, request {})",
                    name, ratio, limit, request
                ),
            ));
        }
    }

    Ok(violations)
}

/// Resolve a container against a rule: its effective requirements plus the
/// constraints they break. An empty violation list means admission should
/// accept it.
pub fn predict_admission(
    supplied: &ResourceRequirements,
    item: &LimitRangeItem,
) -> Result<(ResourceRequirements, Vec<Violation>)> {
    let effective = effective_requirements(supplied, item);
    let violations = admission_violations(&effective, item)?;
    Ok((effective, violations))
}

fn parse_list(list: &ResourceList) -> Result<std::collections::BTreeMap<String, ParsedQuantity>> {
    list.iter()
        .map(|(name, q)| Ok((name.clone(), parse_quantity(q)?)))
        .collect()
}

fn violation(resource: &str, message: String) -> Violation {
    Violation {
        resource: resource.to_string(),
        message,
    }
}
