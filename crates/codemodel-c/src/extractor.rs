//! Declaration extraction from preprocessed C text
//!
//! Extraction is always tolerant: tree-sitter recovers from syntax errors and
//! whatever it recovers is reported, together with the number of error nodes.

use codemodel_parser_api::{Declaration, LineIndex, ParserConfig, ParserError};
use std::path::Path;
use tree_sitter::Parser;

use crate::visitor::CVisitor;

/// Result of extraction with additional metadata
#[derive(Debug)]
pub struct ExtractionResult {
    pub declarations: Vec<Declaration>,
    /// Number of syntax errors encountered (0 = clean parse)
    pub error_count: usize,
    /// Whether the file was fully parsed or partially
    pub is_partial: bool,
}

/// Extract file-scope declarations from `active_text`.
///
/// `line_index` must describe the original file text; the active text keeps
/// its offsets so positions map back unchanged.
pub fn extract_declarations(
    active_text: &str,
    file_path: &Path,
    line_index: &LineIndex,
    config: &ParserConfig,
) -> Result<ExtractionResult, ParserError> {
    let mut parser = Parser::new();
    let language = tree_sitter_c::language();
    parser
        .set_language(&language)
        .map_err(|e| ParserError::ParseError(file_path.to_path_buf(), e.to_string()))?;

    let tree = parser.parse(active_text, None).ok_or_else(|| {
        ParserError::ParseError(file_path.to_path_buf(), "Failed to parse".to_string())
    })?;

    let root_node = tree.root_node();
    let has_error = root_node.has_error();
    let error_count = if has_error {
        count_errors(root_node)
    } else {
        0
    };

    let mut visitor = CVisitor::new(active_text.as_bytes(), line_index, config);
    visitor.visit_node(root_node);

    Ok(ExtractionResult {
        declarations: visitor.declarations,
        error_count,
        is_partial: has_error,
    })
}

/// Count ERROR nodes in the syntax tree
fn count_errors(node: tree_sitter::Node) -> usize {
    let mut count = 0;

    if node.is_error() || node.is_missing() {
        count += 1;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        count += count_errors(child);
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemodel_parser_api::{DeclarationKind, LineCol};

    fn extract(source: &str) -> ExtractionResult {
        let index = LineIndex::new(source);
        extract_declarations(source, Path::new("test.c"), &index, &ParserConfig::default())
            .unwrap()
    }

    fn names(result: &ExtractionResult) -> Vec<(&str, DeclarationKind)> {
        result
            .declarations
            .iter()
            .map(|d| (d.name.as_str(), d.kind))
            .collect()
    }

    #[test]
    fn test_extract_simple_function() {
        let result = extract("int main() {\n    return 0;\n}\n");
        assert_eq!(names(&result), vec![("main", DeclarationKind::Function)]);
        assert_eq!(result.error_count, 0);
        assert!(!result.is_partial);

        let main = &result.declarations[0];
        assert_eq!(main.start, LineCol::new(1, 1));
        assert_eq!(main.end, LineCol::new(3, 2));
    }

    #[test]
    fn test_extract_prototypes_and_pointer_returns() {
        let result = extract("char *dup(const char *s);\nstatic int add(int a, int b);\n");
        assert_eq!(
            names(&result),
            vec![
                ("dup", DeclarationKind::FunctionDeclaration),
                ("add", DeclarationKind::FunctionDeclaration),
            ]
        );
    }

    #[test]
    fn test_extract_types() {
        let source = r#"
struct point { int x; int y; };
union value { int i; float f; };
enum color { RED, GREEN };
typedef struct node { int v; } node_t;
struct point *origin;
"#;
        let result = extract(source);
        assert_eq!(
            names(&result),
            vec![
                ("point", DeclarationKind::Struct),
                ("value", DeclarationKind::Union),
                ("color", DeclarationKind::Enum),
                ("node", DeclarationKind::Struct),
                ("node_t", DeclarationKind::Typedef),
                ("origin", DeclarationKind::Variable),
            ]
        );
    }

    #[test]
    fn test_extract_variables() {
        let result = extract("int counter = 0, limit;\nstatic const char *name;\n");
        assert_eq!(
            names(&result),
            vec![
                ("counter", DeclarationKind::Variable),
                ("limit", DeclarationKind::Variable),
                ("name", DeclarationKind::Variable),
            ]
        );
    }

    #[test]
    fn test_fast_config_skips_prototypes_and_variables() {
        let source = "int proto(void);\nint global;\nint body(void) { return 1; }\n";
        let index = LineIndex::new(source);
        let result =
            extract_declarations(source, Path::new("t.c"), &index, &ParserConfig::fast()).unwrap();
        assert_eq!(names(&result), vec![("body", DeclarationKind::Function)]);
    }

    #[test]
    fn test_locals_are_not_declarations() {
        let result = extract("void f(void) {\n    int local = 1;\n    (void)local;\n}\n");
        assert_eq!(names(&result), vec![("f", DeclarationKind::Function)]);
    }

    #[test]
    fn test_tolerant_extraction() {
        let result = extract("int ok(void) { return 0; }\nint broken( {\n");
        assert!(result.is_partial);
        assert!(result.error_count > 0);
        assert!(result.declarations.iter().any(|d| d.name == "ok"));
    }
}
