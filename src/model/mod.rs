//! Core domain types shared by every stage of the pipeline: the physical
//! column/sample contract produced by the importer and the fixed vocabulary
//! of logical roles the semantic layer binds columns to.

pub mod roles;
pub mod sample;

pub use roles::LogicalRole;
pub use sample::{DataType, DistributedSample, PhysicalColumn};
