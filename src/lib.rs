//! # Starling
//!
//! Governed analytics over imported spreadsheet data: columns are classified
//! and bound to a fixed vocabulary of business roles, cross-file joins are
//! detected and safety-checked, and metrics written in a tiny arithmetic DSL
//! are compiled to parameterized SQL and executed under hard resource caps
//! with a single-flight result cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        DistributedSample (columns + sampled rows)        │
//! └─────────────────────────────────────────────────────────┘
//!              │                              │
//!              ▼ [classify]                   ▼ [join]
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  Column types + roles    │   │  JoinPlan (star schema)  │
//! └──────────────────────────┘   └──────────────────────────┘
//!              │
//!              ▼ [semantic]
//! ┌─────────────────────────────────────────────────────────┐
//! │   SemanticMapping store (confirm / reject / gate)        │
//! └─────────────────────────────────────────────────────────┘
//!              │
//!              ▼ [dsl]
//! ┌─────────────────────────────────────────────────────────┐
//! │   ValidatedMetric → parameterized SQL + query hash       │
//! └─────────────────────────────────────────────────────────┘
//!              │
//!              ▼ [exec + cache]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Governed execution (caps, timeouts, single-flight)     │
//! └─────────────────────────────────────────────────────────┘
//!              │
//!              ▼ [validate]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Numeric grounding of the narrated answer               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod classify;
pub mod dsl;
pub mod exec;
pub mod join;
pub mod model;
pub mod semantic;
pub mod validate;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::{CacheError, CacheJanitor, CacheManager, CacheStatus, QueryClass};
    pub use crate::classify::{ColumnClassifier, ColumnIntel, ColumnIntelExt, DiscoveryResult};
    pub use crate::dsl::{validate_metric, MetricSql, ValidatedMetric};
    pub use crate::exec::{
        CardinalityDecision, DatasetTable, ExecError, QueryExecutor, TableCatalog, TableCatalogExt,
        ToolCall,
    };
    pub use crate::join::{FileProfile, JoinDetector, JoinPlan};
    pub use crate::model::{DataType, DistributedSample, LogicalRole, PhysicalColumn};
    pub use crate::semantic::{MappingStatus, MappingStore, SemanticMapping};
    pub use crate::validate::{validate_answer, ValidationReport};
}

pub use dsl::{validate_metric, ValidatedMetric};
pub use model::{DataType, DistributedSample, LogicalRole};
