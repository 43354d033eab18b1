//! Numeric comparison of expected and observed resource requirements

use k8s_openapi::api::core::v1::ResourceRequirements;
use tracing::debug;

use crate::quantity::parse_quantity;
use crate::resources::{describe, limits_of, requests_of, ResourceList};
use crate::{Error, Result};

/// Field label used in mismatch errors for requests
pub const FIELD_REQUESTS: &str = "requests";
/// Field label used in mismatch errors for limits
pub const FIELD_LIMITS: &str = "limits";

/// Check that two resource lists hold the same resources with numerically
/// equal quantities.
///
/// Every key on either side must exist on the other side. The first
/// disagreement is returned as [`Error::Mismatch`]; a quantity that does not
/// parse is returned as [`Error::Quantity`].
pub fn equal_resource_list(field: &str, expected: &ResourceList, actual: &ResourceList) -> Result<()> {
    for (name, want) in expected {
        match actual.get(name) {
            Some(got) if parse_quantity(want)? == parse_quantity(got)? => {}
            got => {
                return Err(Error::mismatch(
                    field,
                    name,
                    Some(want.0.as_str()),
                    got.map(|q| q.0.as_str()),
                ))
            }
        }
    }
    for (name, got) in actual {
        if !expected.contains_key(name) {
            return Err(Error::mismatch(field, name, None, Some(got.0.as_str())));
        }
    }
    Ok(())
}

/// Check that a container's requirements match what was expected, requests
/// first and then limits. Absent maps count as empty.
pub fn equal_resource_requirements(
    expected: &ResourceRequirements,
    actual: &ResourceRequirements,
) -> Result<()> {
    let (want, got) = (requests_of(expected), requests_of(actual));
    debug!(
        expected = %describe(&want),
        actual = %describe(&got),
        "Verifying requests"
    );
    equal_resource_list(FIELD_REQUESTS, &want, &got)?;

    let (want, got) = (limits_of(expected), limits_of(actual));
    debug!(
        expected = %describe(&want),
        actual = %describe(&got),
        "Verifying limits"
    );
    equal_resource_list(FIELD_LIMITS, &want, &got)
}
