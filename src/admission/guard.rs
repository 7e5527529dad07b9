//! Resource type guard.
//!
//! The gateway is registered for a single resource. A review for anything
//! else means the webhook configuration is wired wrong, so it is reported as
//! an error and never turned into an allow or deny.

use super::review::GroupVersionResource;
use crate::{Error, Result};

/// Confirm `actual` is the resource this gateway serves.
pub fn check_resource(actual: &GroupVersionResource, expected: &GroupVersionResource) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::UnexpectedResource {
            expected: expected.to_string(),
            received: actual.to_string(),
        })
    }
}
