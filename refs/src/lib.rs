//! Cross-references and unified context for the librarian server.
//!
//! `xref` derives the bidirectional component/tool reference graph and
//! persists it consistently into both reference directories; `context`
//! collapses both indices plus the graph into a single queryable snapshot
//! with TTL caching.

pub mod context;
pub mod error;
pub mod xref;

pub use context::CONTEXT_TTL;
pub use context::ContextCache;
pub use context::RelatedComponent;
pub use context::RelatedTool;
pub use context::UnifiedContext;
pub use context::build_unified_context;
pub use context::related_components;
pub use context::related_tools;
pub use context::spawn_refresh;
pub use error::RefsError;
pub use error::Result;
pub use xref::BidirectionalRefs;
pub use xref::ComponentEdge;
pub use xref::CrossReferenceBuilder;
pub use xref::Relationship;
pub use xref::RelationshipStrength;
pub use xref::RelationshipType;
pub use xref::ToolEdge;
pub use xref::XrefSummary;
pub use xref::load_bidirectional_refs;
