//! Models module for the SDK
//!
//! Defines the normalized semantic model produced by a migration: tables, columns,
//! measures, hierarchies, partitions and relationships, plus the calculation records that
//! track calculated fields through translation.

pub mod calculation;
pub mod column;
pub mod data_model;
pub mod enums;
pub mod partition;
pub mod relationship;
pub mod table;

pub use calculation::{CalculationKey, CalculationRecord};
pub use column::{Column, Measure, SUMMARIZATION_SET_BY};
pub use data_model::SemanticModel;
pub use enums::*;
pub use partition::{Partition, PartitionMetadata};
pub use relationship::Relationship;
pub use table::{Hierarchy, HierarchyLevel, Table};
