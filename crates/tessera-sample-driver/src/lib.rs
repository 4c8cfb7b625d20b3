//! Reference in-process driver for the Tessera HAL.
//!
//! `SampleDriver` implements revisions V1_0 through V1_2. Its configuration
//! decides which revision its casts expose, what it declares in its
//! capabilities, and which statuses it reports, so the runtime can be
//! exercised against old, new and misbehaving drivers alike.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tessera_hal::{DeviceV1_0, HalVersion};
//! use tessera_sample_driver::{SampleConfig, SampleDriver};
//!
//! let driver = SampleDriver::new("sample-float", SampleConfig::default());
//! let handle: Arc<dyn DeviceV1_0> = driver;
//! assert!(handle.cast_v1_2().is_some());
//!
//! let old = SampleDriver::new("sample-old", SampleConfig::default().with_version(HalVersion::V1_0));
//! let handle: Arc<dyn DeviceV1_0> = old;
//! assert!(handle.cast_v1_1().is_none());
//! ```

pub mod cache;
mod driver;
pub mod interpreter;

pub use cache::{CacheError, CacheKey};
pub use driver::{SampleConfig, SampleDriver, SamplePreparedModel};
pub use interpreter::executable_tuples;
