// src/core/protocol/mod.rs

pub mod options;
pub mod value;
pub use options::{ExpireResolution, ScanOptions, SetFlag, SetOptions};
pub use value::Value;
