//! Tool registry store: the on-disk catalog of the server's tool surface
//! (`.tool_reference/`), built by introspecting the explicit tool table.

pub mod catalog;
pub mod error;
pub mod store;
pub mod types;

pub use catalog::ToolParam;
pub use catalog::ToolSpec;
pub use error::Result;
pub use error::ToolRefError;
pub use store::InitSummary;
pub use store::TOOL_REF_DIR;
pub use store::ToolReferenceStore;
pub use store::default_taskboard_integration;
pub use types::CategoriesDoc;
pub use types::DecisionTree;
pub use types::RelationshipGroup;
pub use types::TaskboardIntegration;
pub use types::ToolProfile;
pub use types::ToolRecord;
pub use types::ToolRegistryDoc;
