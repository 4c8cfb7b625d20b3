//! Execution requests and their results.

use parking_lot::RwLock;
use std::sync::Arc;

/// A shared memory pool referenced by request arguments.
pub type MemoryPool = Arc<RwLock<Vec<u8>>>;

/// Create a memory pool holding `bytes`.
pub fn memory_pool(bytes: Vec<u8>) -> MemoryPool {
    Arc::new(RwLock::new(bytes))
}

/// Region of a memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataLocation {
    pub pool_index: u32,
    pub offset: u32,
    pub length: u32,
}

/// Binding of one model input or output to memory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestArgument {
    pub has_no_value: bool,
    pub location: DataLocation,
    /// Overrides the operand's dimensions when non-empty.
    pub dimensions: Vec<u32>,
}

impl RequestArgument {
    pub fn new(pool_index: u32, offset: u32, length: u32) -> Self {
        Self {
            has_no_value: false,
            location: DataLocation {
                pool_index,
                offset,
                length,
            },
            dimensions: Vec::new(),
        }
    }
}

/// Concrete input/output bindings for one execution.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub inputs: Vec<RequestArgument>,
    pub outputs: Vec<RequestArgument>,
    pub pools: Vec<MemoryPool>,
}

impl Request {
    /// Build a request with one pool per input and per output buffer.
    pub fn from_buffers(inputs: Vec<Vec<u8>>, output_lengths: &[usize]) -> Self {
        let mut request = Request::default();
        for bytes in inputs {
            let index = request.pools.len() as u32;
            request
                .inputs
                .push(RequestArgument::new(index, 0, bytes.len() as u32));
            request.pools.push(memory_pool(bytes));
        }
        for &length in output_lengths {
            let index = request.pools.len() as u32;
            request
                .outputs
                .push(RequestArgument::new(index, 0, length as u32));
            request.pools.push(memory_pool(vec![0; length]));
        }
        request
    }

    /// Copy out the bytes an argument points at.
    pub fn read(&self, argument: &RequestArgument) -> Option<Vec<u8>> {
        let pool = self.pools.get(argument.location.pool_index as usize)?;
        let pool = pool.read();
        let start = argument.location.offset as usize;
        let end = start.checked_add(argument.location.length as usize)?;
        pool.get(start..end).map(|bytes| bytes.to_vec())
    }

    /// Write `bytes` into the region an argument points at.
    ///
    /// Returns `false` when the region is out of bounds or too small.
    pub fn write(&self, argument: &RequestArgument, bytes: &[u8]) -> bool {
        if bytes.len() > argument.location.length as usize {
            return false;
        }
        let Some(pool) = self.pools.get(argument.location.pool_index as usize) else {
            return false;
        };
        let mut pool = pool.write();
        let start = argument.location.offset as usize;
        match pool.get_mut(start..start + bytes.len()) {
            Some(region) => {
                region.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Bytes currently bound to output `index`.
    pub fn output(&self, index: usize) -> Option<Vec<u8>> {
        self.read(self.outputs.get(index)?)
    }
}

/// Dimensions of one output after execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputShape {
    pub dimensions: Vec<u32>,
    /// False when the bound buffer was too small for the value.
    pub is_sufficient: bool,
}

/// Execution duration in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub time_on_device: u64,
    pub time_in_driver: u64,
}

impl Timing {
    /// Sentinel reported when timing was not measured.
    pub const UNAVAILABLE: Timing = Timing {
        time_on_device: u64::MAX,
        time_in_driver: u64::MAX,
    };

    pub fn is_available(&self) -> bool {
        *self != Self::UNAVAILABLE
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::UNAVAILABLE
    }
}
