//! A driver as seen by the runtime: a versioned facade plus a capability
//! snapshot taken once at initialization.

use crate::coverage::{self, CoverageMode};
use crate::properties::{self, PropertySource};
use crate::versioned::VersionedDevice;
use std::collections::BTreeSet;
use std::sync::Arc;
use tessera_hal::{
    Capabilities, DeviceV1_0, ExecutionPreference, HalVersion, Model, OperationTuple,
    PerformanceInfo,
};

/// One accelerator available to the runtime.
#[derive(Debug)]
pub struct Device {
    /// Registered name, also used for configuration keys and coverage hashing.
    name: String,
    interface: VersionedDevice,
    /// Driver declaration, copied verbatim on successful initialization.
    capabilities: Capabilities,
    /// Declared tuples left after coverage narrowing.
    supported_tuples: BTreeSet<OperationTuple>,
    coverage: CoverageMode,
    initialized: bool,
}

impl Device {
    /// Wrap a driver handle. Capabilities stay at their defaults until
    /// [`Device::initialize`] runs.
    pub fn new(name: impl Into<String>, handle: Arc<dyn DeviceV1_0>, coverage: CoverageMode) -> Self {
        Self {
            name: name.into(),
            interface: VersionedDevice::new(handle),
            capabilities: Capabilities::default(),
            supported_tuples: BTreeSet::new(),
            coverage,
            initialized: false,
        }
    }

    /// Wrap and initialize a driver handle, reading its coverage mode from `properties`.
    pub fn create(
        name: impl Into<String>,
        handle: Arc<dyn DeviceV1_0>,
        properties: &dyn PropertySource,
    ) -> Self {
        let name = name.into();
        let coverage = CoverageMode::from_value(properties::coverage_mode_value(properties, &name));
        let mut device = Self::new(name, handle, coverage);
        device.initialize();
        device
    }

    /// Query and cache the driver's capabilities.
    ///
    /// A failed query leaves the defaults in place. Only the first call has
    /// any effect.
    #[tracing::instrument(skip_all, fields(device = %self.name))]
    pub fn initialize(&mut self) {
        if self.initialized {
            tracing::warn!("Device already initialized");
            return;
        }
        self.initialized = true;

        let (status, capabilities) = self.interface.get_capabilities();
        if !status.is_ok() {
            tracing::error!(%status, "getCapabilities failed, using default capabilities");
            return;
        }

        let name_hash = coverage::name_hash(&self.name);
        self.supported_tuples = capabilities
            .supported_operation_tuples
            .iter()
            .copied()
            .filter(|tuple| self.coverage.keeps_tuple(name_hash, tuple))
            .collect();
        self.capabilities = capabilities;

        tracing::debug!(
            version = ?self.interface.version(),
            coverage = self.coverage.value(),
            declared = self.capabilities.supported_operation_tuples.len(),
            kept = self.supported_tuples.len(),
            caches_compilation = self.capabilities.caches_compilation,
            "Device initialized"
        );
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> &VersionedDevice {
        &self.interface
    }

    pub fn version(&self) -> Option<HalVersion> {
        self.interface.version()
    }

    pub fn feature_level(&self) -> i64 {
        self.interface.get_feature_level()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn coverage_mode(&self) -> CoverageMode {
        self.coverage
    }

    pub fn caches_compilation(&self) -> bool {
        self.capabilities.caches_compilation
    }

    pub fn float32_performance(&self) -> PerformanceInfo {
        self.capabilities.float32_performance
    }

    pub fn quantized8_performance(&self) -> PerformanceInfo {
        self.capabilities.quantized8_performance
    }

    pub fn relaxed_float32_to_float16_performance(&self) -> PerformanceInfo {
        self.capabilities.relaxed_float32_to_float16_performance
    }

    /// Declared tuples after coverage narrowing, sorted.
    pub fn supported_operation_tuples(&self) -> impl Iterator<Item = &OperationTuple> {
        self.supported_tuples.iter()
    }

    pub fn supports_operation_tuple(&self, tuple: &OperationTuple) -> bool {
        self.supported_tuples.contains(tuple)
    }

    /// True when support can be answered from declared tuples alone.
    pub fn has_supported_operation_tuples(&self) -> bool {
        self.coverage.uses_declared_tuples() && !self.capabilities.supported_operation_tuples.is_empty()
    }

    /// Which operations of `model` this device can run.
    ///
    /// Any driver failure reads as "nothing supported". Under occurrence
    /// parity the driver's answer can only be narrowed.
    pub fn get_supported_operations(&self, model: &Model) -> Vec<bool> {
        let count = model.operations().len();
        let (status, mut supported) = self.interface.get_supported_operations(model);
        if !status.is_ok() {
            tracing::error!(device = %self.name, %status, "getSupportedOperations failed");
            return vec![false; count];
        }

        if self.coverage == CoverageMode::OccurrenceParity {
            let name_hash = coverage::name_hash(&self.name);
            for (index, is_supported) in supported.iter_mut().enumerate() {
                if *is_supported && !coverage::keeps_occurrence(name_hash, model, index as u32) {
                    *is_supported = false;
                }
            }
        }
        supported
    }

    /// Performance figure used to rank this device for one operation.
    ///
    /// Lower is better. Quantized operands use the quantized8 figures, relaxed
    /// float models the relaxed figures, everything else float32.
    pub fn performance_for(
        &self,
        tuple: &OperationTuple,
        relaxed: bool,
        preference: ExecutionPreference,
    ) -> f32 {
        let info = if tuple.operand_type.is_quantized() {
            self.quantized8_performance()
        } else if relaxed {
            self.relaxed_float32_to_float16_performance()
        } else {
            self.float32_performance()
        };
        match preference {
            ExecutionPreference::LowPower => info.power_usage,
            ExecutionPreference::FastSingleAnswer | ExecutionPreference::SustainedSpeed => {
                info.exec_time
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_hal::{
        CapabilitiesV1_0, DeviceStatus, ErrorStatus, OperandType, OperationType,
        PreparedModelCallback, Reply,
    };

    /// Minimal V1_0 driver answering with fixed capabilities.
    struct FixedDriver {
        status: ErrorStatus,
        caps: CapabilitiesV1_0,
    }

    impl DeviceV1_0 for FixedDriver {
        fn get_capabilities(&self, reply: Reply<CapabilitiesV1_0>) {
            reply(self.status, self.caps.clone());
        }

        fn get_supported_operations(&self, model: &Model, reply: Reply<Vec<bool>>) {
            reply(self.status, vec![true; model.operations().len()]);
        }

        fn prepare_model(&self, _model: &Model, callback: Arc<PreparedModelCallback>) -> ErrorStatus {
            callback.notify(ErrorStatus::GeneralFailure, None);
            ErrorStatus::GeneralFailure
        }

        fn get_status(&self) -> DeviceStatus {
            DeviceStatus::Available
        }
    }

    fn fixed(status: ErrorStatus) -> Arc<dyn DeviceV1_0> {
        Arc::new(FixedDriver {
            status,
            caps: CapabilitiesV1_0 {
                float32_performance: PerformanceInfo::new(0.5, 2.0),
                quantized8_performance: PerformanceInfo::new(0.25, 4.0),
            },
        })
    }

    #[test]
    fn test_failed_capabilities_keep_defaults() {
        let mut device = Device::new("broken", fixed(ErrorStatus::DeviceUnavailable), CoverageMode::Full);
        device.initialize();
        assert_eq!(device.float32_performance(), PerformanceInfo::UNKNOWN);
        assert!(!device.caches_compilation());
        assert!(!device.has_supported_operation_tuples());
    }

    #[test]
    fn test_v1_0_capabilities_are_upgraded() {
        let mut device = Device::new("old", fixed(ErrorStatus::None), CoverageMode::Full);
        device.initialize();
        assert_eq!(device.version(), Some(HalVersion::V1_0));
        assert_eq!(device.feature_level(), 27);
        assert_eq!(device.float32_performance(), PerformanceInfo::new(0.5, 2.0));
        // No declared tuples before V1_2, so support must be queried per model.
        assert!(!device.has_supported_operation_tuples());
    }

    #[test]
    fn test_performance_for_preference() {
        let mut device = Device::new("old", fixed(ErrorStatus::None), CoverageMode::Full);
        device.initialize();
        let float = OperationTuple::new(OperationType::Add, OperandType::TensorFloat32);
        let quant = OperationTuple::new(OperationType::Add, OperandType::TensorQuant8Asymm);
        assert_eq!(
            device.performance_for(&float, false, ExecutionPreference::FastSingleAnswer),
            0.5
        );
        assert_eq!(device.performance_for(&float, false, ExecutionPreference::LowPower), 2.0);
        assert_eq!(
            device.performance_for(&quant, false, ExecutionPreference::SustainedSpeed),
            0.25
        );
    }

    #[test]
    fn test_failed_query_is_all_false() {
        let mut model = Model::new();
        let a = model.add_operand(tessera_hal::Operand::new(OperandType::TensorFloat32, [1]));
        let b = model.add_operand(tessera_hal::Operand::new(OperandType::TensorFloat32, [1]));
        model.add_operation(OperationType::Relu, [a], [b]).unwrap();
        model.identify_inputs_and_outputs([a], [b]).unwrap();

        let device = Device::new("broken", fixed(ErrorStatus::GeneralFailure), CoverageMode::Full);
        assert_eq!(device.get_supported_operations(&model), vec![false]);

        let device = Device::new("ok", fixed(ErrorStatus::None), CoverageMode::Full);
        assert_eq!(device.get_supported_operations(&model), vec![true]);
    }
}
