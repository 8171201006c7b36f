use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::Reconciler;
use crate::error::RegistryError;

/// Maps a device type to the reconciler responsible for it.
///
/// Built once at startup through [`RegistryBuilder`] and read-only afterwards.
pub struct ReconcilerRegistry {
    reconcilers: HashMap<String, Arc<dyn Reconciler>>,
}

impl ReconcilerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn lookup(&self, device_type: &str) -> Option<Arc<dyn Reconciler>> {
        self.reconcilers.get(device_type).cloned()
    }

    pub fn device_types(&self) -> Vec<&str> {
        let mut device_types: Vec<&str> = self.reconcilers.keys().map(String::as_str).collect();
        device_types.sort_unstable();
        device_types
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    reconcilers: HashMap<String, Arc<dyn Reconciler>>,
}

impl RegistryBuilder {
    /// Add a reconciler. Registering a second reconciler for the same device type fails.
    pub fn register(mut self, reconciler: Arc<dyn Reconciler>) -> Result<Self, RegistryError> {
        let device_type = reconciler.device_type().to_owned();
        if self.reconcilers.contains_key(&device_type) {
            return Err(RegistryError::DuplicateDeviceType(device_type));
        }

        info!(device_type = %device_type, "registered reconciler");
        self.reconcilers.insert(device_type, reconciler);

        Ok(self)
    }

    pub fn build(self) -> Result<ReconcilerRegistry, RegistryError> {
        if self.reconcilers.is_empty() {
            return Err(RegistryError::Empty);
        }

        Ok(ReconcilerRegistry {
            reconcilers: self.reconcilers,
        })
    }
}
