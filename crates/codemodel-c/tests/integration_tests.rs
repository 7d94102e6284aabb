//! Integration tests for the C parser

use codemodel_c::{CParser, ParseRequest, SourceParser};
use codemodel_parser_api::{
    normalize_path, ContentProvider, DeclarationKind, IncludeDirective, IncludeEntry,
    IncludeHandler, IncludeStatus, LineCol, MacroEnvironment, MacroFingerprint,
    MemoryContentProvider, TextRange, UnresolvedIncludes,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Resolves includes against an in-memory tree relative to the includer.
struct TreeHandler {
    provider: MemoryContentProvider,
    active: HashSet<(PathBuf, MacroFingerprint)>,
    entered: Vec<PathBuf>,
}

impl TreeHandler {
    fn new(provider: MemoryContentProvider) -> Self {
        Self {
            provider,
            active: HashSet::new(),
            entered: Vec::new(),
        }
    }
}

impl IncludeHandler for TreeHandler {
    fn enter(
        &mut self,
        includer: &Path,
        directive: &IncludeDirective,
        macros: &MacroEnvironment,
    ) -> IncludeEntry {
        let dir = includer.parent().unwrap_or(Path::new("/"));
        let path = normalize_path(&dir.join(&directive.name));
        let text = match self.provider.read_text(&path) {
            Ok(text) => text,
            Err(_) => return IncludeEntry::Unresolved,
        };
        if !self.active.insert((path.clone(), macros.fingerprint())) {
            return IncludeEntry::Circular { path };
        }
        self.entered.push(path.clone());
        IncludeEntry::Enter { path, text }
    }

    fn leave(&mut self, path: &Path, context: MacroFingerprint) {
        self.active.remove(&(path.to_path_buf(), context));
    }
}

fn parse_tree(
    provider: MemoryContentProvider,
    main: &str,
    env: &MacroEnvironment,
) -> (codemodel_c::ParseOutput, Vec<PathBuf>) {
    let parser = CParser::new();
    let path = PathBuf::from(main);
    let text = provider.read_text(&path).unwrap();
    let mut handler = TreeHandler::new(provider);
    let output = parser
        .parse(&ParseRequest::new(&path, &text, env), &mut handler)
        .unwrap();
    (output, handler.entered)
}

#[test]
fn test_parse_hello_world() {
    let source = r#"
#include <stdio.h>

int main() {
    printf("Hello, World!\n");
    return 0;
}
"#;
    let parser = CParser::new();
    let env = MacroEnvironment::new();
    let request = ParseRequest::new(Path::new("hello.c"), source, &env);
    let output = parser.parse(&request, &mut UnresolvedIncludes).unwrap();

    assert_eq!(output.declarations.len(), 1);
    assert_eq!(output.declarations[0].name, "main");
    assert_eq!(output.declarations[0].start, LineCol::new(4, 1));
    assert_eq!(output.includes.len(), 1);
    assert_eq!(output.includes[0].status, IncludeStatus::Unresolved);
    assert!(output.includes[0].directive.angled);
}

#[test]
fn test_header_macros_select_branches() {
    let provider = MemoryContentProvider::new();
    provider.write("/p/config.h", "#define USE_FAST 1\n");
    provider.write(
        "/p/main.c",
        "#include \"config.h\"\n#if USE_FAST\nint fast(void);\n#else\nint slow(void);\n#endif\n",
    );

    let (output, entered) = parse_tree(provider, "/p/main.c", &MacroEnvironment::new());

    assert_eq!(entered, vec![PathBuf::from("/p/config.h")]);
    let names: Vec<_> = output
        .declarations
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(names, vec!["fast"]);
    // `int slow(void);\n` is excluded
    assert_eq!(output.inactive_blocks, vec![TextRange::new(55, 71)]);
    assert_eq!(output.includes[0].status, IncludeStatus::Resolved);
    assert_eq!(output.includes[0].context, MacroEnvironment::new().fingerprint());
}

#[test]
fn test_header_sees_includer_macros() {
    let provider = MemoryContentProvider::new();
    provider.write("/p/log.h", "#ifdef VERBOSE\nvoid trace(void);\n#endif\n");
    provider.write("/p/a.c", "#define VERBOSE\n#include \"log.h\"\n");
    provider.write("/p/b.c", "#include \"log.h\"\n");

    let (a, _) = parse_tree(provider.clone(), "/p/a.c", &MacroEnvironment::new());
    let (b, _) = parse_tree(provider, "/p/b.c", &MacroEnvironment::new());

    assert!(a.includes[0].inactive_blocks.is_empty());
    assert_eq!(b.includes[0].inactive_blocks, vec![TextRange::new(15, 33)]);
    assert_ne!(a.includes[0].context, b.includes[0].context);
}

#[test]
fn test_circular_includes_terminate() {
    let provider = MemoryContentProvider::new();
    provider.write("/p/a.h", "#include \"b.h\"\nint from_a;\n");
    provider.write("/p/b.h", "#include \"a.h\"\nint from_b;\n");
    provider.write("/p/main.c", "#include \"a.h\"\n");

    let (output, _) = parse_tree(provider, "/p/main.c", &MacroEnvironment::new());

    let statuses: Vec<_> = output.includes.iter().map(|r| r.status.clone()).collect();
    assert_eq!(
        statuses,
        vec![
            IncludeStatus::Resolved,
            IncludeStatus::Resolved,
            IncludeStatus::Circular
        ]
    );
    assert_eq!(output.includes[2].includer, PathBuf::from("/p/b.h"));
}

#[test]
fn test_nested_include_records_include_chain() {
    let provider = MemoryContentProvider::new();
    provider.write("/p/inc/leaf.h", "int leaf;\n");
    provider.write("/p/inc/mid.h", "#include \"leaf.h\"\n");
    provider.write("/p/main.c", "#include \"inc/mid.h\"\n#include \"missing.h\"\n");

    let (output, entered) = parse_tree(provider, "/p/main.c", &MacroEnvironment::new());

    assert_eq!(
        entered,
        vec![PathBuf::from("/p/inc/mid.h"), PathBuf::from("/p/inc/leaf.h")]
    );
    assert_eq!(output.includes.len(), 3);
    assert_eq!(output.includes[1].includer, PathBuf::from("/p/inc/mid.h"));
    assert_eq!(output.includes[1].target, Some(PathBuf::from("/p/inc/leaf.h")));
    assert_eq!(output.includes[2].status, IncludeStatus::Unresolved);
    assert_eq!(output.includes[2].directive.line, 2);
}

#[test]
fn test_declaration_positions_survive_blanking() {
    let source = "#if 0\nint gone;\n#endif\n#define N 2\nstruct pair { int v[N]; };\n";
    let parser = CParser::new();
    let env = MacroEnvironment::new();
    let request = ParseRequest::new(Path::new("pos.h"), source, &env);
    let output = parser.parse(&request, &mut UnresolvedIncludes).unwrap();

    let kinds: Vec<_> = output
        .declarations
        .iter()
        .map(|d| (d.name.as_str(), d.kind, d.start))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("N", DeclarationKind::Macro, LineCol::new(4, 1)),
            ("pair", DeclarationKind::Struct, LineCol::new(5, 1)),
        ]
    );
    assert_eq!(output.inactive_blocks, vec![TextRange::new(6, 16)]);
}
