//! fvrepo -- host-side offload protocol for a feature-vector repository on an
//! accelerator co-processor.
//!
//! The crate initializes a repository on the device, adds, deletes and
//! modifies feature records, and runs similarity search. Every operation is a
//! named co-processor kernel invoked with a hand-built argument buffer,
//! observed through a completion signal, and split into hardware-bounded
//! batches where the kernel requires it.
//!
//! All device access goes through [`runtime::DeviceRuntime`];
//! [`runtime::sim::SimRuntime`] is an in-process implementation.

pub mod batch;
pub mod config;
pub mod device;
pub mod error;
pub mod handles;
pub mod logging;
pub mod ops;
pub mod protocol;
pub mod runtime;
pub mod selftest;
pub mod staging;

pub use config::OffloadConfig;
pub use error::{FvError, Result};
pub use handles::{FeatureRecord, InitParams, QueryTable, RepoRange, SearchOutputs, SearchRequest, SearchResult};
pub use ops::FvRepository;
pub use protocol::{AccurateKind, SearchMode};
