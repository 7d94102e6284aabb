//! Integration tests for the parser API contracts

use codemodel_parser_api::*;
use std::path::{Path, PathBuf};

/// Minimal front end: one declaration per line starting with `fn `, includes
/// written as `use NAME`.
struct LineParser {
    config: ParserConfig,
}

impl SourceParser for LineParser {
    fn language(&self) -> &str {
        "lines"
    }

    fn file_extensions(&self) -> &[&str] {
        &[".l", ".lh"]
    }

    fn file_kind(&self, path: &Path) -> FileKind {
        if path.extension().is_some_and(|e| e == "lh") {
            FileKind::Header
        } else {
            FileKind::Source
        }
    }

    fn parse(
        &self,
        request: &ParseRequest<'_>,
        includes: &mut dyn IncludeHandler,
    ) -> Result<ParseOutput, ParserError> {
        let index = LineIndex::new(request.text);
        let mut output = ParseOutput {
            line_index: index.clone(),
            ..Default::default()
        };
        let mut offset = 0;
        for (i, line) in request.text.split_inclusive('\n').enumerate() {
            let trimmed = line.trim_end();
            if let Some(name) = trimmed.strip_prefix("fn ") {
                let range = TextRange::new(offset, offset + trimmed.len());
                let (start, end) = index.range_line_cols(range);
                output
                    .declarations
                    .push(Declaration::new(name, DeclarationKind::Function, range, start, end));
            } else if let Some(name) = trimmed.strip_prefix("use ") {
                let directive = IncludeDirective::quoted(name, offset, i + 1);
                let entry = includes.enter(request.path, &directive, request.macros);
                let (target, status) = match entry {
                    IncludeEntry::Enter { path, .. } => {
                        includes.leave(&path, request.macros.fingerprint());
                        (Some(path), IncludeStatus::Resolved)
                    }
                    IncludeEntry::Unresolved => (None, IncludeStatus::Unresolved),
                    IncludeEntry::Circular { path } => (Some(path), IncludeStatus::Circular),
                    IncludeEntry::DepthLimited { path } => {
                        (Some(path), IncludeStatus::DepthLimited)
                    }
                    IncludeEntry::Failed { path, message } => {
                        (Some(path), IncludeStatus::Failed(message))
                    }
                };
                output.includes.push(IncludeRecord {
                    includer: request.path.to_path_buf(),
                    includer_context: request.macros.fingerprint(),
                    directive,
                    context: request.macros.fingerprint(),
                    target,
                    status,
                    inactive_blocks: Vec::new(),
                });
            }
            offset += line.len();
        }
        Ok(output)
    }

    fn config(&self) -> &ParserConfig {
        &self.config
    }

    fn metrics(&self) -> ParserMetrics {
        ParserMetrics::default()
    }
}

struct MapHandler {
    provider: MemoryContentProvider,
    entered: Vec<PathBuf>,
    left: Vec<PathBuf>,
}

impl IncludeHandler for MapHandler {
    fn enter(
        &mut self,
        includer: &Path,
        directive: &IncludeDirective,
        _macros: &MacroEnvironment,
    ) -> IncludeEntry {
        let candidate = normalize_path(&includer.parent().unwrap().join(&directive.name));
        match self.provider.read_text(&candidate) {
            Ok(text) => {
                self.entered.push(candidate.clone());
                IncludeEntry::Enter {
                    path: candidate,
                    text,
                }
            }
            Err(_) => IncludeEntry::Unresolved,
        }
    }

    fn leave(&mut self, path: &Path, _context: MacroFingerprint) {
        self.left.push(path.to_path_buf());
    }
}

#[test]
fn test_parser_contract_with_handler() {
    let provider = MemoryContentProvider::new();
    provider.write("/p/util.lh", "fn helper\n");

    let parser = LineParser {
        config: ParserConfig::default(),
    };
    let env = MacroEnvironment::new();
    let path = PathBuf::from("/p/main.l");
    let text = "use util.lh\nuse missing.lh\nfn main\n";
    let mut handler = MapHandler {
        provider,
        entered: Vec::new(),
        left: Vec::new(),
    };

    let output = parser
        .parse(&ParseRequest::new(&path, text, &env), &mut handler)
        .unwrap();

    assert_eq!(output.declarations.len(), 1);
    assert_eq!(output.declarations[0].name, "main");
    assert_eq!(output.declarations[0].start, LineCol::new(3, 1));
    assert_eq!(output.includes.len(), 2);
    assert_eq!(output.includes[0].status, IncludeStatus::Resolved);
    assert_eq!(output.includes[1].status, IncludeStatus::Unresolved);
    assert!(output.includes[1].target.is_none());
    assert_eq!(handler.entered, handler.left);
}

#[test]
fn test_unresolved_includes_handler() {
    let parser = LineParser {
        config: ParserConfig::default(),
    };
    let env = MacroEnvironment::new();
    let path = PathBuf::from("/p/main.l");
    let output = parser
        .parse(
            &ParseRequest::new(&path, "use a.lh\n", &env),
            &mut UnresolvedIncludes,
        )
        .unwrap();
    assert_eq!(output.includes[0].status, IncludeStatus::Unresolved);
}

#[test]
fn test_can_parse_and_kind() {
    let parser = LineParser {
        config: ParserConfig::default(),
    };
    assert!(parser.can_parse(Path::new("a.l")));
    assert!(parser.can_parse(Path::new("a.lh")));
    assert!(!parser.can_parse(Path::new("a.txt")));
    assert!(!parser.can_parse(Path::new("Makefile")));
    assert_eq!(parser.file_kind(Path::new("a.lh")), FileKind::Header);

    let kept = parser.filter_parseable(vec![PathBuf::from("a.l"), PathBuf::from("b.md")]);
    assert_eq!(kept, vec![PathBuf::from("a.l")]);
}

#[test]
fn test_config_round_trips_through_json() {
    let config = ParserConfig::default().with_max_include_depth(16);
    let json = serde_json::to_string(&config).unwrap();
    let back: ParserConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(config, back);
}
