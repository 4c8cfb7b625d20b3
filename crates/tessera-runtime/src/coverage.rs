//! Deterministic coverage simulation.
//!
//! A testing aid that makes a fully capable driver look partially capable, so
//! partitioning across devices can be exercised without partial drivers. Every
//! verdict is a pure function of the device name and the operation in question.

use tessera_hal::{Model, OperationTuple};

/// How a device's declared support is narrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CoverageMode {
    /// Mode 0: declared support is used as is.
    #[default]
    Full,
    /// Mode 1: keep a declared tuple only if its parity with the name hash is even.
    TupleParity,
    /// Mode 2: reserved. Behaves like [`CoverageMode::Full`].
    Reserved,
    /// Mode 3: decide per operation occurrence from a hash of its operands.
    OccurrenceParity,
}

impl CoverageMode {
    /// Interpret a configured mode value. Unknown values fall back to mode 0.
    pub fn from_value(value: i64) -> Self {
        match value {
            0 => CoverageMode::Full,
            1 => CoverageMode::TupleParity,
            2 => CoverageMode::Reserved,
            3 => CoverageMode::OccurrenceParity,
            other => {
                tracing::warn!(mode = other, "Unknown coverage mode, using 0");
                CoverageMode::Full
            }
        }
    }

    pub fn value(self) -> u32 {
        match self {
            CoverageMode::Full => 0,
            CoverageMode::TupleParity => 1,
            CoverageMode::Reserved => 2,
            CoverageMode::OccurrenceParity => 3,
        }
    }

    /// Whether support comes from the declared tuple set rather than per-model queries.
    pub fn uses_declared_tuples(self) -> bool {
        self != CoverageMode::OccurrenceParity
    }

    /// Whether a declared tuple survives narrowing.
    pub fn keeps_tuple(self, name_hash: u32, tuple: &OperationTuple) -> bool {
        match self {
            CoverageMode::TupleParity => {
                let parity =
                    tuple.operation_type.code() ^ tuple.operand_type.code() ^ name_hash;
                parity & 1 == 0
            }
            CoverageMode::Full | CoverageMode::Reserved | CoverageMode::OccurrenceParity => true,
        }
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash of a device name.
pub fn name_hash(name: &str) -> u32 {
    name.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Hash describing one operation occurrence in `model`.
///
/// Folds the name hash, the operation tuple, and for every input then output
/// operand its type, rank and dimensions. Each dimension of a constant
/// operand also folds in a 1.
pub fn occurrence_hash(name_hash: u32, model: &Model, operation: u32) -> Option<u32> {
    let tuple = model.operation_tuple(operation).ok()?;
    let op = model.operation(operation).ok()?;

    let mut hash = name_hash ^ tuple.operation_type.code() ^ tuple.operand_type.code();
    for &index in op.inputs.iter().chain(op.outputs.iter()) {
        let operand = model.operand(index).ok()?;
        hash ^= operand.operand_type.code();
        hash ^= operand.rank();
        for &dim in &operand.dimensions {
            hash ^= dim;
            if operand.is_constant() {
                hash ^= 1;
            }
        }
    }
    Some(hash)
}

/// Whether an operation occurrence keeps the support the driver reported.
pub fn keeps_occurrence(name_hash: u32, model: &Model, operation: u32) -> bool {
    occurrence_hash(name_hash, model, operation).is_some_and(|hash| hash & 1 == 0)
}
