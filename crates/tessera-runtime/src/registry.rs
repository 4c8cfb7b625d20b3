//! Device discovery and the registry owning all known devices.

use crate::device::Device;
use crate::properties::PropertySource;
use std::sync::Arc;
use tessera_hal::{DEVICE_DESCRIPTOR, DeviceV1_0};

/// Service-location mechanism drivers are published through.
pub trait ServiceManager: Send + Sync {
    /// Instance names registered for `descriptor`, or `None` when the
    /// service manager cannot be reached.
    fn list_by_interface(&self, descriptor: &str) -> Option<Vec<String>>;

    /// Handle of a registered instance.
    fn get_service(&self, name: &str) -> Option<Arc<dyn DeviceV1_0>>;
}

/// A service manager over a fixed list of in-process drivers.
#[derive(Default)]
pub struct StaticServiceManager {
    services: Vec<(String, Arc<dyn DeviceV1_0>)>,
}

impl StaticServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, handle: Arc<dyn DeviceV1_0>) -> Self {
        self.services.push((name.into(), handle));
        self
    }
}

impl ServiceManager for StaticServiceManager {
    fn list_by_interface(&self, descriptor: &str) -> Option<Vec<String>> {
        if descriptor != DEVICE_DESCRIPTOR {
            return Some(Vec::new());
        }
        Some(self.services.iter().map(|(name, _)| name.clone()).collect())
    }

    fn get_service(&self, name: &str) -> Option<Arc<dyn DeviceV1_0>> {
        self.services
            .iter()
            .find(|(registered, _)| registered == name)
            .map(|(_, handle)| Arc::clone(handle))
    }
}

/// Owns every device the runtime may partition work onto.
///
/// Devices are initialized before they are added, so every device reachable
/// through the registry has its capability data in place.
pub struct DeviceRegistry {
    devices: Vec<Arc<Device>>,
    properties: Arc<dyn PropertySource>,
}

impl DeviceRegistry {
    /// An empty registry.
    pub fn new(properties: Arc<dyn PropertySource>) -> Self {
        Self {
            devices: Vec::new(),
            properties,
        }
    }

    /// Build a registry from every driver `service_manager` knows about.
    ///
    /// An unreachable service manager yields an empty registry. Devices can
    /// still be added with [`DeviceRegistry::register_device`].
    #[tracing::instrument(skip_all)]
    pub fn discover(
        service_manager: Option<&dyn ServiceManager>,
        properties: Arc<dyn PropertySource>,
    ) -> Self {
        let mut registry = Self::new(properties);

        let names = service_manager.and_then(|manager| manager.list_by_interface(DEVICE_DESCRIPTOR));
        let (Some(manager), Some(names)) = (service_manager, names) else {
            tracing::error!("Unable to reach the service manager, no devices discovered");
            return registry;
        };

        for name in names {
            tracing::debug!(device = %name, "Found interface");
            match manager.get_service(&name) {
                Some(handle) => {
                    registry.register_device(name, handle);
                }
                None => tracing::error!(device = %name, "Listed device has no handle"),
            }
        }
        tracing::debug!(count = registry.len(), "Discovery finished");
        registry
    }

    /// Create, initialize and add a device.
    ///
    /// Returns `None` if a device of that name is already registered.
    pub fn register_device(
        &mut self,
        name: impl Into<String>,
        handle: Arc<dyn DeviceV1_0>,
    ) -> Option<Arc<Device>> {
        let name = name.into();
        if self.device(&name).is_some() {
            tracing::warn!(device = %name, "Device already registered, ignoring");
            return None;
        }
        let device = Arc::new(Device::create(name, handle, self.properties.as_ref()));
        self.devices.push(Arc::clone(&device));
        Some(device)
    }

    pub fn devices(&self) -> &[Arc<Device>] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<&Arc<Device>> {
        self.devices.iter().find(|device| device.name() == name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
