//! Source parser: extract classes, functions and imports from one file.
//!
//! Backed by tree-sitter so that decorated definitions, methods and
//! conditionally defined symbols are all found via a full AST walk. Imports
//! are recorded as dotted-path strings exactly as written (`import a.b` ->
//! `"a.b"`, `from x.y import z, w` -> `"x.y.z"`, `"x.y.w"`); they are never
//! resolved, because downstream cross-reference matching is textual.

use tree_sitter::Node;
use tree_sitter::Parser;
use tree_sitter::TreeCursor;

use crate::error::LibrarianError;
use crate::error::Result;

/// Extracted structure of one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOutline {
    pub classes: Vec<String>,
    pub functions: Vec<String>,
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Class,
    Function,
}

impl DefinitionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
        }
    }
}

/// Location of a named definition, 1-based inclusive line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefinitionSpan {
    pub kind: DefinitionKind,
    pub start_line: usize,
    pub end_line: usize,
}

/// Python source parser. Cheap to construct; not shareable across threads,
/// so callers create one per operation.
pub struct SourceParser {
    parser: Parser,
}

impl SourceParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let language = tree_sitter_python::LANGUAGE.into();
        parser
            .set_language(&language)
            .map_err(|e| LibrarianError::Fatal(format!("loading python grammar: {e}")))?;
        Ok(Self { parser })
    }

    /// Parse a file's contents into its outline. Never fails: unparseable
    /// input yields an empty outline and a log line.
    pub fn parse_outline(&mut self, content: &str) -> FileOutline {
        let mut outline = FileOutline::default();
        let Some(tree) = self.parser.parse(content, None) else {
            tracing::warn!("parser returned no tree; treating file as empty");
            return outline;
        };
        let mut cursor = tree.root_node().walk();
        collect_outline(&mut cursor, content.as_bytes(), &mut outline);
        outline
    }

    /// Locate the named class or function definition and return its exact
    /// line range. Returns the first definition in source order.
    pub fn definition_span(&mut self, content: &str, name: &str) -> Option<DefinitionSpan> {
        let tree = self.parser.parse(content, None)?;
        let mut cursor = tree.root_node().walk();
        find_definition(&mut cursor, content.as_bytes(), name)
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn collect_outline(cursor: &mut TreeCursor<'_>, source: &[u8], outline: &mut FileOutline) {
    let node = cursor.node();
    match node.kind() {
        "class_definition" => {
            if let Some(name) = node.child_by_field_name("name") {
                outline.classes.push(node_text(name, source).to_string());
            }
        }
        "function_definition" => {
            if let Some(name) = node.child_by_field_name("name") {
                outline.functions.push(node_text(name, source).to_string());
            }
        }
        "import_statement" => record_import(node, source, &mut outline.imports),
        "import_from_statement" => record_import_from(node, source, &mut outline.imports),
        _ => {}
    }

    if cursor.goto_first_child() {
        loop {
            collect_outline(cursor, source, outline);
            if !cursor.goto_next_sibling() {
                break;
            }
        }
        cursor.goto_parent();
    }
}

/// The imported path of a `dotted_name` or `aliased_import` node. For
/// aliases the original dotted path is recorded, not the local alias.
fn import_target(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "dotted_name" => Some(node_text(node, source).to_string()),
        "aliased_import" => node
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string()),
        _ => None,
    }
}

fn record_import(node: Node<'_>, source: &[u8], imports: &mut Vec<String>) {
    let mut cursor = node.walk();
    for name in node.children_by_field_name("name", &mut cursor) {
        if let Some(target) = import_target(name, source) {
            imports.push(target);
        }
    }
}

fn record_import_from(node: Node<'_>, source: &[u8], imports: &mut Vec<String>) {
    let module = node
        .child_by_field_name("module_name")
        .map(|n| node_text(n, source).trim_start_matches('.').to_string())
        .unwrap_or_default();

    let join = |name: &str| {
        if module.is_empty() {
            format!(".{name}")
        } else {
            format!("{module}.{name}")
        }
    };

    let mut cursor = node.walk();
    let mut found_any = false;
    for name in node.children_by_field_name("name", &mut cursor) {
        if let Some(target) = import_target(name, source) {
            imports.push(join(&target));
            found_any = true;
        }
    }

    if !found_any {
        // `from x import *`
        let mut cursor = node.walk();
        let wildcard = node
            .children(&mut cursor)
            .any(|c| c.kind() == "wildcard_import");
        if wildcard {
            imports.push(join("*"));
        }
    }
}

fn find_definition(
    cursor: &mut TreeCursor<'_>,
    source: &[u8],
    target: &str,
) -> Option<DefinitionSpan> {
    let node = cursor.node();
    let kind = match node.kind() {
        "class_definition" => Some(DefinitionKind::Class),
        "function_definition" => Some(DefinitionKind::Function),
        _ => None,
    };
    if let Some(kind) = kind {
        let matches = node
            .child_by_field_name("name")
            .is_some_and(|n| node_text(n, source) == target);
        if matches {
            return Some(DefinitionSpan {
                kind,
                start_line: node.start_position().row + 1,
                end_line: node.end_position().row + 1,
            });
        }
    }

    if cursor.goto_first_child() {
        loop {
            if let Some(span) = find_definition(cursor, source, target) {
                cursor.goto_parent();
                return Some(span);
            }
            if !cursor.goto_next_sibling() {
                break;
            }
        }
        cursor.goto_parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_classes_and_functions_in_source_order() {
        let mut parser = SourceParser::new().unwrap();
        let code = r#"
class Alpha:
    def method_one(self):
        pass

def helper():
    pass

class Beta:
    pass
"#;
        let outline = parser.parse_outline(code);
        assert_eq!(outline.classes, vec!["Alpha", "Beta"]);
        assert_eq!(outline.functions, vec!["method_one", "helper"]);
    }

    #[test]
    fn finds_decorated_and_nested_definitions() {
        let mut parser = SourceParser::new().unwrap();
        let code = r#"
@app.route("/x")
def handler():
    def inner():
        pass
    return inner
"#;
        let outline = parser.parse_outline(code);
        assert_eq!(outline.functions, vec!["handler", "inner"]);
    }

    #[test]
    fn import_strings_keep_their_written_shape() {
        let mut parser = SourceParser::new().unwrap();
        let code = r#"
import os
import os.path
import numpy as np
from x.y import z, w
from pkg import thing as alias
from . import local
"#;
        let outline = parser.parse_outline(code);
        assert_eq!(
            outline.imports,
            vec!["os", "os.path", "numpy", "x.y.z", "x.y.w", "pkg.thing", ".local"]
        );
    }

    #[test]
    fn unparseable_input_yields_empty_outline() {
        let mut parser = SourceParser::new().unwrap();
        let outline = parser.parse_outline("");
        assert_eq!(outline, FileOutline::default());
    }

    #[test]
    fn definition_span_is_one_based_inclusive() {
        let mut parser = SourceParser::new().unwrap();
        let code = "class Foo: pass\ndef bar():\n    pass\n";
        let span = parser.definition_span(code, "Foo").unwrap();
        assert_eq!(span.kind, DefinitionKind::Class);
        assert_eq!((span.start_line, span.end_line), (1, 1));

        let span = parser.definition_span(code, "bar").unwrap();
        assert_eq!(span.kind, DefinitionKind::Function);
        assert_eq!((span.start_line, span.end_line), (2, 3));

        assert!(parser.definition_span(code, "missing").is_none());
    }
}
