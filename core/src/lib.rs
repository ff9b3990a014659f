//! Librarian core: project index engine, change monitor and execution
//! tracing for the code-comprehension index server.
//!
//! This crate owns the AI reference (the per-project `.ai_reference/`
//! directory) end to end: scanning a source tree, parsing files into
//! outlines, persisting the component registry, script index and per-file
//! mini records, answering component and text queries, and watching the
//! tree for changes in the background.

pub mod engine;
pub mod error;
pub mod monitor;
pub mod parser;
pub mod paths;
pub mod scanner;
pub mod state;
pub mod store;
pub mod tracer;

pub use engine::ComponentHit;
pub use engine::IndexEngine;
pub use engine::RefreshSummary;
pub use engine::RelatedFiles;
pub use engine::SearchMatch;
pub use error::LibrarianError;
pub use error::Result;
pub use parser::FileOutline;
pub use parser::SourceParser;
pub use paths::AllowedRoots;
pub use scanner::ScannedFile;
pub use store::Component;
pub use store::ComponentKind;
pub use store::ComponentRegistry;
pub use store::IndexStore;
pub use store::MiniRecord;
pub use store::ScriptIndex;
pub use tracer::ExecutionTracer;
