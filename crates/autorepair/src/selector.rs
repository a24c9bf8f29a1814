//! Container selection within a pod.

use crate::error::{RepairError, Result};
use crate::instance::Instance;

/// Pick the container to run the repair in.
///
/// A pod with a single container is unambiguous, so the requested name is
/// ignored. Otherwise the requested name must match one of the pod's
/// containers exactly.
pub fn select_container(instance: &Instance, requested: &str) -> Result<String> {
    if let [only] = instance.containers.as_slice() {
        return Ok(only.clone());
    }

    instance
        .containers
        .iter()
        .find(|name| name.as_str() == requested)
        .cloned()
        .ok_or_else(|| RepairError::NoSuchContainer {
            pod: instance.name.clone(),
            requested: requested.to_string(),
        })
}
