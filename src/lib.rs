//! BI Migration SDK - workbook metadata to semantic model mapping
//!
//! Provides:
//! - Workbook document parsing and declarative attribute resolution
//! - Datasource classification, column/measure extraction and table mapping
//! - Partition and join relationship extraction
//! - Table and partition deduplication
//! - Formula translation plumbing and calculation reference resolution
//! - Relationship and table validation
//!
//! # Example
//!
//! ```rust
//! use bi_migration_sdk::{CalculationResolver, IdentityTranslator, MigrationConfig, WorkbookMigrator, XmlNode};
//!
//! let workbook = XmlNode::parse(r#"
//!     <datasource name="federated.1" caption="Orders">
//!       <connection class="sqlserver" server="db" dbname="shop">
//!         <relation name="Orders" type="table" table="[dbo].[Orders]">
//!           <columns><column name="Id" datatype="integer"/></columns>
//!         </relation>
//!       </connection>
//!     </datasource>"#).unwrap();
//!
//! let migrator = WorkbookMigrator::new(MigrationConfig::default(), Box::new(IdentityTranslator));
//! let mut resolver = CalculationResolver::default();
//! let model = migrator.migrate("Orders", &workbook, &mut resolver).unwrap();
//! assert_eq!(model.tables[0].source_name, "Orders");
//! ```

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod convert;
pub mod import;
pub mod model;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use config::{ConfigError, MigrationConfig};
pub use convert::{
    CalculationResolver, ExpressionTranslator, IdentityTranslator, MigrationError, RetryPolicy,
    TableDeduplicator, TranslationClient, TranslationError, TranslationRequest,
    TranslationResponse, WorkbookMigrator,
};
#[cfg(feature = "api-backend")]
pub use convert::translation::HttpTranslator;
pub use import::{DatasourceClassifier, ImportError, XmlNode};
pub use model::{CalculationStore, JsonFileStore, MemoryStore, StoreError};
pub use validation::{
    RelationshipValidationResult, RelationshipValidator, TableValidationResult, TableValidator,
};

// Re-export models
pub use models::enums::*;
pub use models::{
    CalculationKey, CalculationRecord, Column, Hierarchy, Measure, Partition, Relationship,
    SemanticModel, Table,
};
