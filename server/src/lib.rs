//! Librarian server: the tool surface of the code-comprehension index.
//!
//! The facade serialises external tool calls, enforces the allowed-root
//! policy and routes to the index engine, the cross-reference builder, the
//! unified context cache and the task board. The binary wires a minimal
//! newline-delimited JSON transport around it; richer framing layers are
//! external collaborators.

pub mod facade;
pub mod tools;

pub use facade::Facade;
pub use tools::build_catalog;
