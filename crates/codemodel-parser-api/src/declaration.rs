use crate::text::{LineCol, TextRange};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a top-level declaration reported by a parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeclarationKind {
    /// Function with a body
    Function,
    /// Function prototype
    FunctionDeclaration,
    Struct,
    Union,
    Enum,
    Typedef,
    Variable,
    Macro,
}

impl fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeclarationKind::Function => "function",
            DeclarationKind::FunctionDeclaration => "function declaration",
            DeclarationKind::Struct => "struct",
            DeclarationKind::Union => "union",
            DeclarationKind::Enum => "enum",
            DeclarationKind::Typedef => "typedef",
            DeclarationKind::Variable => "variable",
            DeclarationKind::Macro => "macro",
        };
        write!(f, "{s}")
    }
}

/// A declaration record: name, kind and where it sits in the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    pub range: TextRange,
    /// Position of `range.start`
    pub start: LineCol,
    /// Position of `range.end`
    pub end: LineCol,
}

impl Declaration {
    pub fn new(
        name: impl Into<String>,
        kind: DeclarationKind,
        range: TextRange,
        start: LineCol,
        end: LineCol,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            range,
            start,
            end,
        }
    }

    /// Definitions as opposed to forward declarations.
    pub fn is_definition(&self) -> bool {
        !matches!(self.kind, DeclarationKind::FunctionDeclaration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_is_not_definition() {
        let range = TextRange::new(0, 10);
        let decl = Declaration::new(
            "foo",
            DeclarationKind::FunctionDeclaration,
            range,
            LineCol::new(1, 1),
            LineCol::new(1, 11),
        );
        assert!(!decl.is_definition());
        assert_eq!(decl.kind.to_string(), "function declaration");
    }
}
