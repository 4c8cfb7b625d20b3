//! Enumerations shared by every HAL revision.
//!
//! Numeric codes match the values drivers exchange on the wire, so they are
//! stable and safe to fold into hashes or serialize into cache files.

use std::fmt;

/// Interface revision of a device or prepared model.
///
/// Ordered oldest to newest so `HalVersion::V1_0 < HalVersion::V1_2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HalVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl HalVersion {
    /// Every revision, newest first (the order a facade probes in).
    pub const NEWEST_FIRST: [HalVersion; 3] = [HalVersion::V1_2, HalVersion::V1_1, HalVersion::V1_0];

    /// Runtime feature level reported for a device implementing this revision.
    pub fn feature_level(self) -> i64 {
        match self {
            HalVersion::V1_0 => 27,
            HalVersion::V1_1 => 28,
            HalVersion::V1_2 => 29,
        }
    }
}

impl fmt::Display for HalVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HalVersion::V1_0 => "1.0",
            HalVersion::V1_1 => "1.1",
            HalVersion::V1_2 => "1.2",
        };
        f.write_str(s)
    }
}

/// Status returned by every HAL call and carried by every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorStatus {
    /// Success.
    #[default]
    None,
    /// Driver offline or busy. The caller may retry or route elsewhere.
    DeviceUnavailable,
    /// Unspecified failure, not retryable without caller intervention.
    GeneralFailure,
    /// An output buffer was too small. Resize and resubmit.
    OutputInsufficientSize,
    /// Malformed model or request.
    InvalidArgument,
}

impl ErrorStatus {
    pub fn is_ok(self) -> bool {
        self == ErrorStatus::None
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorStatus::None => "NONE",
            ErrorStatus::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            ErrorStatus::GeneralFailure => "GENERAL_FAILURE",
            ErrorStatus::OutputInsufficientSize => "OUTPUT_INSUFFICIENT_SIZE",
            ErrorStatus::InvalidArgument => "INVALID_ARGUMENT",
        };
        f.write_str(s)
    }
}

/// Liveness reported by `get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Available,
    Busy,
    Offline,
    Unknown,
}

/// Broad hardware category of a device (V1_2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Unknown = 0,
    Other = 1,
    Cpu = 2,
    Gpu = 3,
    Accelerator = 4,
}

impl DeviceType {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Hint describing how a prepared model will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionPreference {
    LowPower,
    #[default]
    FastSingleAnswer,
    SustainedSpeed,
}

/// Whether a caller wants execution timing reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeasureTiming {
    #[default]
    No,
    Yes,
}

/// Type of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperandType {
    Float32 = 0,
    Int32 = 1,
    Uint32 = 2,
    TensorFloat32 = 3,
    TensorInt32 = 4,
    TensorQuant8Asymm = 5,
    Bool = 6,
    TensorQuant16Symm = 7,
    TensorFloat16 = 8,
    TensorBool8 = 9,
    Float16 = 10,
}

impl OperandType {
    const ALL: [OperandType; 11] = [
        OperandType::Float32,
        OperandType::Int32,
        OperandType::Uint32,
        OperandType::TensorFloat32,
        OperandType::TensorInt32,
        OperandType::TensorQuant8Asymm,
        OperandType::Bool,
        OperandType::TensorQuant16Symm,
        OperandType::TensorFloat16,
        OperandType::TensorBool8,
        OperandType::Float16,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }

    /// Revision that first defined this type.
    pub fn introduced_in(self) -> HalVersion {
        match self {
            OperandType::Float32
            | OperandType::Int32
            | OperandType::Uint32
            | OperandType::TensorFloat32
            | OperandType::TensorInt32
            | OperandType::TensorQuant8Asymm => HalVersion::V1_0,
            _ => HalVersion::V1_2,
        }
    }

    pub fn is_tensor(self) -> bool {
        matches!(
            self,
            OperandType::TensorFloat32
                | OperandType::TensorInt32
                | OperandType::TensorQuant8Asymm
                | OperandType::TensorQuant16Symm
                | OperandType::TensorFloat16
                | OperandType::TensorBool8
        )
    }

    /// Size in bytes of one element.
    pub fn element_size(self) -> usize {
        match self {
            OperandType::Float32
            | OperandType::Int32
            | OperandType::Uint32
            | OperandType::TensorFloat32
            | OperandType::TensorInt32 => 4,
            OperandType::TensorQuant16Symm | OperandType::TensorFloat16 | OperandType::Float16 => 2,
            OperandType::TensorQuant8Asymm | OperandType::Bool | OperandType::TensorBool8 => 1,
        }
    }

    /// Quantized types take their performance figure from `quantized8_performance`.
    pub fn is_quantized(self) -> bool {
        matches!(
            self,
            OperandType::TensorQuant8Asymm | OperandType::TensorQuant16Symm
        )
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

macro_rules! operation_types {
    ($($name:ident = $code:literal @ $version:ident),* $(,)?) => {
        /// Type of an operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum OperationType {
            $($name = $code),*
        }

        impl OperationType {
            const ALL: &'static [OperationType] = &[$(OperationType::$name),*];

            /// Revision that first defined this operation.
            pub fn introduced_in(self) -> HalVersion {
                match self {
                    $(OperationType::$name => HalVersion::$version),*
                }
            }
        }
    };
}

operation_types! {
    Add = 0 @ V1_0,
    AveragePool2d = 1 @ V1_0,
    Concatenation = 2 @ V1_0,
    Conv2d = 3 @ V1_0,
    DepthwiseConv2d = 4 @ V1_0,
    Floor = 8 @ V1_0,
    FullyConnected = 9 @ V1_0,
    Logistic = 14 @ V1_0,
    MaxPool2d = 17 @ V1_0,
    Mul = 18 @ V1_0,
    Relu = 19 @ V1_0,
    Reshape = 22 @ V1_0,
    Softmax = 25 @ V1_0,
    Tanh = 28 @ V1_0,
    BatchToSpaceNd = 29 @ V1_1,
    Div = 30 @ V1_1,
    Mean = 31 @ V1_1,
    Pad = 32 @ V1_1,
    SpaceToBatchNd = 33 @ V1_1,
    Squeeze = 34 @ V1_1,
    StridedSlice = 35 @ V1_1,
    Sub = 36 @ V1_1,
    Transpose = 37 @ V1_1,
    Abs = 38 @ V1_2,
    ArgMax = 39 @ V1_2,
    Cast = 45 @ V1_2,
    Exp = 49 @ V1_2,
    Gather = 51 @ V1_2,
    Log = 60 @ V1_2,
    LogSoftmax = 64 @ V1_2,
    Maximum = 65 @ V1_2,
    Minimum = 66 @ V1_2,
    Neg = 67 @ V1_2,
    Pow = 70 @ V1_2,
}

impl OperationType {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A declared `(operation type, operand type)` pair a device claims to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationTuple {
    pub operation_type: OperationType,
    pub operand_type: OperandType,
}

impl OperationTuple {
    pub fn new(operation_type: OperationType, operand_type: OperandType) -> Self {
        Self {
            operation_type,
            operand_type,
        }
    }
}

impl fmt::Display for OperationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.operation_type, self.operand_type)
    }
}

/// Vendor extension advertised by a V1_2 driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub name: String,
    pub operand_types: Vec<ExtensionOperandType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionOperandType {
    pub code: u16,
    pub is_tensor: bool,
    pub byte_size: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(HalVersion::V1_0 < HalVersion::V1_1);
        assert!(HalVersion::V1_1 < HalVersion::V1_2);
        assert_eq!(HalVersion::NEWEST_FIRST[0], HalVersion::V1_2);
    }

    #[test]
    fn test_feature_levels() {
        assert_eq!(HalVersion::V1_0.feature_level(), 27);
        assert_eq!(HalVersion::V1_1.feature_level(), 28);
        assert_eq!(HalVersion::V1_2.feature_level(), 29);
    }

    #[test]
    fn test_operand_type_codes_round_trip() {
        for ty in OperandType::ALL {
            assert_eq!(OperandType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(OperandType::from_code(99), None);
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(OperationType::Add.code(), 0);
        assert_eq!(OperationType::Floor.code(), 8);
        assert_eq!(OperationType::Mul.code(), 18);
        assert_eq!(OperationType::Relu.code(), 19);
        assert_eq!(OperationType::Sub.code(), 36);
        assert_eq!(OperationType::from_code(64), Some(OperationType::LogSoftmax));
        assert_eq!(OperationType::from_code(5), None);
    }

    #[test]
    fn test_introduced_in() {
        assert_eq!(OperationType::Add.introduced_in(), HalVersion::V1_0);
        assert_eq!(OperationType::Sub.introduced_in(), HalVersion::V1_1);
        assert_eq!(OperationType::Maximum.introduced_in(), HalVersion::V1_2);
        assert_eq!(OperandType::TensorFloat16.introduced_in(), HalVersion::V1_2);
        assert_eq!(OperandType::TensorQuant8Asymm.introduced_in(), HalVersion::V1_0);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ErrorStatus::None.to_string(), "NONE");
        assert_eq!(
            ErrorStatus::OutputInsufficientSize.to_string(),
            "OUTPUT_INSUFFICIENT_SIZE"
        );
        assert!(ErrorStatus::None.is_ok());
        assert!(!ErrorStatus::GeneralFailure.is_ok());
    }
}
