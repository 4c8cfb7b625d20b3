//! Capability declarations for each interface revision.
//!
//! Older revisions describe less. Every revision's structure converts into
//! [`Capabilities`], the latest shape, so the runtime only ever deals with one.

use crate::types::OperationTuple;

/// Estimated cost of running on a device, relative to the CPU (1.0).
///
/// Lower is better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceInfo {
    pub exec_time: f32,
    pub power_usage: f32,
}

impl PerformanceInfo {
    /// Performance of a device that never reported any.
    pub const UNKNOWN: PerformanceInfo = PerformanceInfo {
        exec_time: f32::MAX,
        power_usage: f32::MAX,
    };

    pub fn new(exec_time: f32, power_usage: f32) -> Self {
        Self {
            exec_time,
            power_usage,
        }
    }
}

impl Default for PerformanceInfo {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// Capabilities as reported by a V1_0 driver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapabilitiesV1_0 {
    pub float32_performance: PerformanceInfo,
    pub quantized8_performance: PerformanceInfo,
}

/// Capabilities as reported by a V1_1 driver.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CapabilitiesV1_1 {
    pub float32_performance: PerformanceInfo,
    pub quantized8_performance: PerformanceInfo,
    pub relaxed_float32_to_float16_performance: PerformanceInfo,
}

/// Capabilities as reported by a V1_2 driver, and the shape the runtime uses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Capabilities {
    pub float32_performance: PerformanceInfo,
    pub quantized8_performance: PerformanceInfo,
    pub relaxed_float32_to_float16_performance: PerformanceInfo,
    /// Whether the driver can save and restore compilation caches.
    pub caches_compilation: bool,
    /// Declared `(operation, operand)` pairs the driver supports.
    pub supported_operation_tuples: Vec<OperationTuple>,
}

pub type CapabilitiesV1_2 = Capabilities;

impl From<CapabilitiesV1_0> for CapabilitiesV1_1 {
    fn from(caps: CapabilitiesV1_0) -> Self {
        Self {
            float32_performance: caps.float32_performance,
            quantized8_performance: caps.quantized8_performance,
            relaxed_float32_to_float16_performance: caps.float32_performance,
        }
    }
}

impl From<CapabilitiesV1_1> for Capabilities {
    fn from(caps: CapabilitiesV1_1) -> Self {
        Self {
            float32_performance: caps.float32_performance,
            quantized8_performance: caps.quantized8_performance,
            relaxed_float32_to_float16_performance: caps.relaxed_float32_to_float16_performance,
            caches_compilation: false,
            supported_operation_tuples: Vec::new(),
        }
    }
}

impl From<CapabilitiesV1_0> for Capabilities {
    fn from(caps: CapabilitiesV1_0) -> Self {
        CapabilitiesV1_1::from(caps).into()
    }
}

impl From<&Capabilities> for CapabilitiesV1_1 {
    fn from(caps: &Capabilities) -> Self {
        Self {
            float32_performance: caps.float32_performance,
            quantized8_performance: caps.quantized8_performance,
            relaxed_float32_to_float16_performance: caps.relaxed_float32_to_float16_performance,
        }
    }
}

impl From<&Capabilities> for CapabilitiesV1_0 {
    fn from(caps: &Capabilities) -> Self {
        Self {
            float32_performance: caps.float32_performance,
            quantized8_performance: caps.quantized8_performance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unknown() {
        let caps = Capabilities::default();
        assert_eq!(caps.float32_performance, PerformanceInfo::UNKNOWN);
        assert!(!caps.caches_compilation);
        assert!(caps.supported_operation_tuples.is_empty());
    }

    #[test]
    fn test_upgrade_from_v1_0() {
        let old = CapabilitiesV1_0 {
            float32_performance: PerformanceInfo::new(0.5, 0.7),
            quantized8_performance: PerformanceInfo::new(0.2, 0.3),
        };
        let caps = Capabilities::from(old);
        assert_eq!(caps.float32_performance, PerformanceInfo::new(0.5, 0.7));
        assert_eq!(
            caps.relaxed_float32_to_float16_performance,
            PerformanceInfo::new(0.5, 0.7)
        );
        assert!(!caps.caches_compilation);
    }

    #[test]
    fn test_downgrade_keeps_performance() {
        let caps = Capabilities {
            float32_performance: PerformanceInfo::new(1.0, 2.0),
            quantized8_performance: PerformanceInfo::new(3.0, 4.0),
            relaxed_float32_to_float16_performance: PerformanceInfo::new(0.5, 0.5),
            caches_compilation: true,
            supported_operation_tuples: Vec::new(),
        };
        let v1_1 = CapabilitiesV1_1::from(&caps);
        assert_eq!(
            v1_1.relaxed_float32_to_float16_performance,
            PerformanceInfo::new(0.5, 0.5)
        );
        let v1_0 = CapabilitiesV1_0::from(&caps);
        assert_eq!(v1_0.quantized8_performance, PerformanceInfo::new(3.0, 4.0));
    }
}
