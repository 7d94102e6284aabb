//! AST visitor for extracting C declarations
//!
//! This visitor traverses the tree-sitter AST of the active text and reports
//! file-scope declarations:
//! - Function definitions and prototypes
//! - Structs, unions, enums (named, with a body)
//! - Typedefs
//! - File-scope variables

use codemodel_parser_api::{Declaration, DeclarationKind, LineIndex, ParserConfig, TextRange};
use tree_sitter::Node;

pub struct CVisitor<'a> {
    pub source: &'a [u8],
    line_index: &'a LineIndex,
    config: &'a ParserConfig,
    pub declarations: Vec<Declaration>,
}

impl<'a> CVisitor<'a> {
    pub fn new(source: &'a [u8], line_index: &'a LineIndex, config: &'a ParserConfig) -> Self {
        Self {
            source,
            line_index,
            config,
            declarations: Vec::new(),
        }
    }

    fn node_text(&self, node: Node) -> String {
        node.utf8_text(self.source).unwrap_or("").to_string()
    }

    fn push(&mut self, name: String, kind: DeclarationKind, node: Node) {
        if name.is_empty() {
            return;
        }
        let range = TextRange::new(node.start_byte(), node.end_byte());
        let (start, end) = self.line_index.range_line_cols(range);
        self.declarations
            .push(Declaration::new(name, kind, range, start, end));
    }

    /// Visit the children of a translation unit.
    pub fn visit_node(&mut self, node: Node) {
        // ERROR nodes still hold recoverable top-level items
        if node.is_error() || node.kind() == "translation_unit" {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                self.visit_node(child);
            }
            return;
        }

        match node.kind() {
            "function_definition" => self.visit_function(node),
            "declaration" => self.visit_declaration(node),
            "type_definition" => self.visit_typedef(node),
            "struct_specifier" | "union_specifier" | "enum_specifier" => {
                self.visit_specifier(node)
            }
            _ => {}
        }
    }

    fn visit_function(&mut self, node: Node) {
        if let Some(type_node) = node.child_by_field_name("type") {
            self.visit_specifier(type_node);
        }
        if let Some(declarator) = node.child_by_field_name("declarator") {
            if let Some(name) = self.function_name(declarator) {
                self.push(name, DeclarationKind::Function, node);
            }
        }
    }

    fn visit_declaration(&mut self, node: Node) {
        if let Some(type_node) = node.child_by_field_name("type") {
            self.visit_specifier(type_node);
        }

        let mut cursor = node.walk();
        let declarators: Vec<Node> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators {
            if let Some(name) = self.function_name(declarator) {
                if self.config.extract_prototypes {
                    self.push(name, DeclarationKind::FunctionDeclaration, node);
                }
            } else if self.config.extract_variables {
                let name = self.extract_identifier(declarator);
                self.push(name, DeclarationKind::Variable, node);
            }
        }
    }

    fn visit_typedef(&mut self, node: Node) {
        if let Some(type_node) = node.child_by_field_name("type") {
            self.visit_specifier(type_node);
        }

        let mut cursor = node.walk();
        let declarators: Vec<Node> = node
            .children_by_field_name("declarator", &mut cursor)
            .collect();
        for declarator in declarators {
            let name = self.extract_identifier(declarator);
            self.push(name, DeclarationKind::Typedef, node);
        }
    }

    fn visit_specifier(&mut self, node: Node) {
        let kind = match node.kind() {
            "struct_specifier" => DeclarationKind::Struct,
            "union_specifier" => DeclarationKind::Union,
            "enum_specifier" => DeclarationKind::Enum,
            _ => return,
        };
        // Only definitions; `struct foo *p;` only references the tag
        if node.child_by_field_name("body").is_none() {
            return;
        }
        if let Some(name_node) = node.child_by_field_name("name") {
            let name = self.node_text(name_node);
            self.push(name, kind, node);
        }
    }

    /// Name of the function a declarator declares, if it declares one.
    fn function_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "function_declarator" => node
                .child_by_field_name("declarator")
                .map(|decl| self.extract_identifier(decl)),
            "pointer_declarator" | "parenthesized_declarator" | "attributed_declarator" => {
                let mut cursor = node.walk();
                let inner = node
                    .named_children(&mut cursor)
                    .find(|c| c.kind().ends_with("declarator"));
                inner.and_then(|c| self.function_name(c))
            }
            _ => None,
        }
    }

    fn extract_identifier(&self, node: Node) -> String {
        match node.kind() {
            "identifier" | "type_identifier" => self.node_text(node),
            "init_declarator" => node
                .child_by_field_name("declarator")
                .map(|d| self.extract_identifier(d))
                .unwrap_or_default(),
            _ => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    let id = self.extract_identifier(child);
                    if !id.is_empty() {
                        return id;
                    }
                }
                String::new()
            }
        }
    }
}
