//! Process-level resource attributes.

use std::fmt;
use std::sync::Arc;

/// Name of the service emitting telemetry.
///
/// Read once at startup and attached to every span, metric series and
/// profile upload. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentity {
    service_name: Arc<str>,
}

impl ServiceIdentity {
    pub fn new(service_name: impl Into<Arc<str>>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.service_name)
    }
}
