//! Preprocessor conditional evaluation
//!
//! Walks a file line by line, evaluates `#if`/`#ifdef`/`#ifndef`/`#elif`/
//! `#else`/`#endif` against a live macro table and reports which byte ranges
//! were excluded. `#define`/`#undef` update the table as they are reached in
//! active code, and `#include`s in active code are entered through an
//! [`IncludeHandler`] so that included headers see, and contribute to, the
//! same macro table.
//!
//! An inactive block starts at the first byte of the line following the
//! directive that disabled it and ends at the first byte of the line holding
//! the directive that closes it. Every skipped branch of a group is its own
//! block; groups nested inside a skipped branch lie within that block and
//! are not reported separately.
//!
//! The active text keeps the input's byte length: directive lines and
//! inactive lines are blanked to spaces with newlines preserved, so offsets
//! and line numbers of the remaining code are unchanged.

use super::expr;
use codemodel_parser_api::{
    IncludeDirective, IncludeEntry, IncludeHandler, IncludeRecord, IncludeStatus, MacroDef,
    MacroEnvironment, MacroFingerprint, TextRange,
};
use log::debug;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static RE_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*([A-Za-z_][A-Za-z0-9_]*)?\s*(.*)$").unwrap());
static RE_INCLUDE_TARGET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:"([^"]+)"|<([^>]+)>)"#).unwrap());
static RE_DEFINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(\(([^)]*)\))?(.*)$").unwrap()
});
static RE_IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Where the current conditional group stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionalState {
    /// The current branch is taken
    Active,
    /// No branch taken yet; a later `#elif`/`#else` may activate
    Pending,
    /// An earlier branch was taken; the rest of the group is skipped
    Done,
    /// The whole group sits inside an inactive region
    Skipped,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    state: ConditionalState,
    seen_else: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum PreprocessorDirective {
    If(String),
    Ifdef(String),
    Ifndef(String),
    Elif(String),
    Else,
    Endif,
    Include(String),
    Define(String),
    Undef(String),
    Pragma(String),
    Other,
}

fn get_preprocessor_directive(logical: &str) -> Option<PreprocessorDirective> {
    let caps = RE_DIRECTIVE.captures(logical)?;
    let name = caps.get(1).map_or("", |m| m.as_str());
    let rest = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
    let first_word = || rest.split_whitespace().next().unwrap_or("").to_string();

    Some(match name {
        "if" => PreprocessorDirective::If(rest),
        "ifdef" => PreprocessorDirective::Ifdef(first_word()),
        "ifndef" => PreprocessorDirective::Ifndef(first_word()),
        "elif" => PreprocessorDirective::Elif(rest),
        "else" => PreprocessorDirective::Else,
        "endif" => PreprocessorDirective::Endif,
        "include" | "include_next" | "import" => PreprocessorDirective::Include(rest),
        "define" => PreprocessorDirective::Define(rest),
        "undef" => PreprocessorDirective::Undef(first_word()),
        "pragma" => PreprocessorDirective::Pragma(rest),
        _ => PreprocessorDirective::Other,
    })
}

/// A `#define` reached in active code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroSite {
    pub name: String,
    /// Directive text without the trailing newline
    pub range: TextRange,
}

/// Result of preprocessing one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preprocessed {
    /// Input with inactive and directive lines blanked
    pub active_text: String,
    pub inactive_blocks: Vec<TextRange>,
    pub macro_sites: Vec<MacroSite>,
    /// The file contains `#pragma once` in active code
    pub pragma_once: bool,
    /// Controlling expressions that failed to evaluate (treated as false)
    pub evaluation_errors: usize,
}

/// Preprocess `text`, entering includes through `handler`.
///
/// `macros` is the environment the file is entered with; it is updated in
/// place with every definition reached. Returns the file's own result and the
/// include records of the whole pass in directive order.
pub fn evaluate_conditionals(
    path: &Path,
    text: &str,
    macros: &mut MacroEnvironment,
    handler: &mut dyn IncludeHandler,
    max_include_depth: usize,
) -> (Preprocessed, Vec<IncludeRecord>) {
    let mut evaluator = ConditionalEvaluator {
        handler,
        includes: Vec::new(),
        once: HashSet::new(),
        max_include_depth,
    };
    let context = macros.fingerprint();
    let result = evaluator.process(path, text, macros, context, 0, true);
    (result, evaluator.includes)
}

struct ConditionalEvaluator<'h> {
    handler: &'h mut dyn IncludeHandler,
    includes: Vec<IncludeRecord>,
    once: HashSet<PathBuf>,
    max_include_depth: usize,
}

fn is_active(stack: &[Frame]) -> bool {
    stack
        .last()
        .map_or(true, |f| f.state == ConditionalState::Active)
}

/// Index just past the `\n` ending the line that starts at `pos`.
fn next_line_end(text: &str, pos: usize) -> usize {
    text[pos..]
        .find('\n')
        .map_or(text.len(), |i| pos + i + 1)
}

fn strip_newline(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn push_blank(out: &mut String, line: &str) {
    out.extend(line.bytes().map(|b| if b == b'\n' { '\n' } else { ' ' }));
}

/// Skip a string or character literal starting at `i`; returns the index
/// after its closing quote or the end of the line.
fn skip_literal(bytes: &[u8], mut i: usize) -> usize {
    let quote = bytes[i];
    i += 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            b'\n' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Track block comments across an ordinary line.
fn scan_comment_state(line: &str, mut in_comment: bool) -> bool {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if in_comment {
            if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                in_comment = false;
                i += 2;
            } else {
                i += 1;
            }
            continue;
        }
        match bytes[i] {
            b'"' | b'\'' => i = skip_literal(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => return false,
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                in_comment = true;
                i += 2;
            }
            _ => i += 1,
        }
    }
    in_comment
}

/// Remove comments from a logical directive line. The flag is set when an
/// unterminated block comment runs past the directive.
fn strip_comments(logical: &str) -> (String, bool) {
    let bytes = logical.as_bytes();
    let mut out = String::with_capacity(logical.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let end = skip_literal(bytes, i);
                out.push_str(&logical[i..end]);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => break,
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                match logical[i + 2..].find("*/") {
                    Some(close) => {
                        out.push(' ');
                        i += 2 + close + 2;
                    }
                    None => return (out, true),
                }
            }
            _ => {
                let ch_len = logical[i..].chars().next().map_or(1, char::len_utf8);
                out.push_str(&logical[i..i + ch_len]);
                i += ch_len;
            }
        }
    }
    (out, false)
}

/// Parse `"name"` / `<name>`, or an object-like macro expanding to one.
fn parse_include_target(
    rest: &str,
    macros: &MacroEnvironment,
    offset: usize,
    line: usize,
) -> Option<IncludeDirective> {
    let spelled = rest.trim();
    let resolved = if RE_IDENTIFIER.is_match(spelled) {
        macros.get(spelled).map(|def| def.body.as_str())?
    } else {
        spelled
    };
    let caps = RE_INCLUDE_TARGET.captures(resolved)?;
    if let Some(quoted) = caps.get(1) {
        Some(IncludeDirective::quoted(quoted.as_str(), offset, line))
    } else {
        caps.get(2)
            .map(|angled| IncludeDirective::angled(angled.as_str(), offset, line))
    }
}

fn parse_define(rest: &str) -> Option<MacroDef> {
    let caps = RE_DEFINE.captures(rest)?;
    let name = caps.get(1)?.as_str();
    let body = caps.get(4).map_or("", |m| m.as_str());
    Some(match caps.get(3) {
        Some(params) => MacroDef::function(
            name,
            params
                .as_str()
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            body,
        ),
        None => MacroDef::object(name, body),
    })
}

fn condition(expr_text: &str, macros: &MacroEnvironment, errors: &mut usize) -> bool {
    match expr::is_true(expr_text, macros) {
        Ok(taken) => taken,
        Err(e) => {
            debug!("{e} in `{expr_text}`; branch treated as not taken");
            *errors += 1;
            false
        }
    }
}

impl ConditionalEvaluator<'_> {
    fn process(
        &mut self,
        path: &Path,
        text: &str,
        macros: &mut MacroEnvironment,
        context: MacroFingerprint,
        depth: usize,
        emit_text: bool,
    ) -> Preprocessed {
        let mut result = Preprocessed::default();
        if emit_text {
            result.active_text.reserve(text.len());
        }

        let mut stack: Vec<Frame> = Vec::new();
        let mut block_start: Option<usize> = None;
        let mut in_comment = false;
        let mut line_no = 1;
        let mut pos = 0;

        while pos < text.len() {
            let line_end = next_line_end(text, pos);
            let line = &text[pos..line_end];

            if in_comment || !line.trim_start().starts_with('#') {
                in_comment = scan_comment_state(line, in_comment);
                if emit_text {
                    if is_active(&stack) {
                        result.active_text.push_str(line);
                    } else {
                        push_blank(&mut result.active_text, line);
                    }
                }
                line_no += 1;
                pos = line_end;
                continue;
            }

            // Join backslash continuations into one logical directive
            let mut end = line_end;
            let mut logical = strip_newline(line).to_string();
            while logical.ends_with('\\') && end < text.len() {
                logical.pop();
                let next_end = next_line_end(text, end);
                logical.push_str(strip_newline(&text[end..next_end]));
                end = next_end;
            }
            let (clean, opens_comment) = strip_comments(&logical);
            in_comment = opens_comment;

            if emit_text {
                push_blank(&mut result.active_text, &text[pos..end]);
            }

            let was_active = is_active(&stack);
            let mut splits_block = false;
            if let Some(directive) = get_preprocessor_directive(&clean) {
                splits_block = self.apply_directive(
                    directive,
                    &mut stack,
                    &mut result,
                    DirectiveSite {
                        path,
                        context,
                        depth,
                        offset: pos,
                        line: line_no,
                        text_end: pos + strip_newline(&text[pos..end]).len(),
                    },
                    macros,
                );
            }
            let now_active = is_active(&stack);

            if !was_active && (now_active || splits_block) {
                if let Some(start) = block_start.take() {
                    if pos > start {
                        result.inactive_blocks.push(TextRange::new(start, pos));
                    }
                }
            }
            if !now_active && (was_active || splits_block) {
                block_start = Some(end);
            }

            line_no += text[pos..end].bytes().filter(|b| *b == b'\n').count();
            pos = end;
        }

        if let Some(start) = block_start {
            if text.len() > start {
                result.inactive_blocks.push(TextRange::new(start, text.len()));
            }
        }
        if !stack.is_empty() {
            debug!("{}: {} unterminated conditional(s)", path.display(), stack.len());
        }

        result
    }

    fn apply_directive(
        &mut self,
        directive: PreprocessorDirective,
        stack: &mut Vec<Frame>,
        result: &mut Preprocessed,
        site: DirectiveSite<'_>,
        macros: &mut MacroEnvironment,
    ) -> bool {
        let active = is_active(stack);
        let push = |stack: &mut Vec<Frame>, taken: bool| {
            let state = if !active {
                ConditionalState::Skipped
            } else if taken {
                ConditionalState::Active
            } else {
                ConditionalState::Pending
            };
            stack.push(Frame {
                state,
                seen_else: false,
            });
        };

        match directive {
            PreprocessorDirective::If(cond) => {
                let taken = active && condition(&cond, macros, &mut result.evaluation_errors);
                push(stack, taken);
            }
            PreprocessorDirective::Ifdef(name) => push(stack, macros.is_defined(&name)),
            PreprocessorDirective::Ifndef(name) => push(stack, !macros.is_defined(&name)),
            PreprocessorDirective::Elif(cond) => {
                if let Some(frame) = stack.last_mut() {
                    if frame.seen_else {
                        // #elif after #else is ill-formed; ignore it
                        return false;
                    }
                    frame.state = match frame.state {
                        ConditionalState::Active => ConditionalState::Done,
                        ConditionalState::Pending => {
                            if condition(&cond, macros, &mut result.evaluation_errors) {
                                ConditionalState::Active
                            } else {
                                ConditionalState::Pending
                            }
                        }
                        other => other,
                    };
                    return frame.state != ConditionalState::Skipped;
                }
            }
            PreprocessorDirective::Else => {
                if let Some(frame) = stack.last_mut() {
                    if !frame.seen_else {
                        frame.state = match frame.state {
                            ConditionalState::Active => ConditionalState::Done,
                            ConditionalState::Pending => ConditionalState::Active,
                            other => other,
                        };
                        frame.seen_else = true;
                        return frame.state != ConditionalState::Skipped;
                    }
                }
            }
            PreprocessorDirective::Endif => {
                stack.pop();
            }
            _ if !active => {}
            PreprocessorDirective::Define(rest) => match parse_define(&rest) {
                Some(def) => {
                    result.macro_sites.push(MacroSite {
                        name: def.name.clone(),
                        range: TextRange::new(site.offset, site.text_end),
                    });
                    macros.define(def);
                }
                None => debug!("{}:{}: malformed #define", site.path.display(), site.line),
            },
            PreprocessorDirective::Undef(name) => {
                macros.undefine(&name);
            }
            PreprocessorDirective::Include(rest) => self.include(&rest, site, macros),
            PreprocessorDirective::Pragma(rest) => {
                if rest.trim() == "once" {
                    result.pragma_once = true;
                }
            }
            PreprocessorDirective::Other => {}
        }
        false
    }

    fn include(&mut self, rest: &str, site: DirectiveSite<'_>, macros: &mut MacroEnvironment) {
        let Some(directive) = parse_include_target(rest, macros, site.offset, site.line) else {
            debug!(
                "{}:{}: cannot parse #include {rest}",
                site.path.display(),
                site.line
            );
            return;
        };

        let context = macros.fingerprint();
        let slot = self.includes.len();
        self.includes.push(IncludeRecord {
            includer: site.path.to_path_buf(),
            includer_context: site.context,
            directive: directive.clone(),
            context,
            target: None,
            status: IncludeStatus::Unresolved,
            inactive_blocks: Vec::new(),
        });

        if site.depth >= self.max_include_depth {
            self.includes[slot].status = IncludeStatus::DepthLimited;
            return;
        }

        let (target, status) = match self.handler.enter(site.path, &directive, macros) {
            IncludeEntry::Unresolved => (None, IncludeStatus::Unresolved),
            IncludeEntry::Circular { path } => (Some(path), IncludeStatus::Circular),
            IncludeEntry::DepthLimited { path } => (Some(path), IncludeStatus::DepthLimited),
            IncludeEntry::Failed { path, message } => (Some(path), IncludeStatus::Failed(message)),
            IncludeEntry::Enter { path, text } => {
                if self.once.contains(&path) {
                    self.handler.leave(&path, context);
                    (Some(path), IncludeStatus::Once)
                } else {
                    let entered =
                        self.process(&path, &text, macros, context, site.depth + 1, false);
                    self.handler.leave(&path, context);
                    if entered.pragma_once {
                        self.once.insert(path.clone());
                    }
                    self.includes[slot].inactive_blocks = entered.inactive_blocks;
                    (Some(path), IncludeStatus::Resolved)
                }
            }
        };
        self.includes[slot].target = target;
        self.includes[slot].status = status;
    }
}

/// Where a directive sits
#[derive(Debug, Clone, Copy)]
struct DirectiveSite<'a> {
    path: &'a Path,
    /// Context the file containing the directive was entered with
    context: MacroFingerprint,
    depth: usize,
    offset: usize,
    line: usize,
    /// End of the directive text, excluding the newline
    text_end: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemodel_parser_api::UnresolvedIncludes;
    use std::collections::HashMap;

    fn run(text: &str, macros: &[(&str, &str)]) -> Preprocessed {
        let mut env = MacroEnvironment::from_pairs(macros.iter().copied());
        evaluate_conditionals(Path::new("/t/a.c"), text, &mut env, &mut UnresolvedIncludes, 64).0
    }

    fn blocks(text: &str, macros: &[(&str, &str)]) -> Vec<(usize, usize)> {
        run(text, macros)
            .inactive_blocks
            .iter()
            .map(|r| (r.start, r.end))
            .collect()
    }

    /// Resolves includes relative to `/t` and guards `(path, context)` cycles.
    struct MapHandler {
        files: HashMap<PathBuf, String>,
        active: Vec<(PathBuf, MacroFingerprint)>,
    }

    impl MapHandler {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(p, t)| (PathBuf::from(p), t.to_string()))
                    .collect(),
                active: Vec::new(),
            }
        }
    }

    impl IncludeHandler for MapHandler {
        fn enter(
            &mut self,
            _includer: &Path,
            directive: &IncludeDirective,
            macros: &MacroEnvironment,
        ) -> IncludeEntry {
            let path = Path::new("/t").join(&directive.name);
            let context = macros.fingerprint();
            if self.active.contains(&(path.clone(), context)) {
                return IncludeEntry::Circular { path };
            }
            match self.files.get(&path) {
                Some(text) => {
                    self.active.push((path.clone(), context));
                    IncludeEntry::Enter {
                        path,
                        text: text.clone(),
                    }
                }
                None => IncludeEntry::Unresolved,
            }
        }

        fn leave(&mut self, path: &Path, context: MacroFingerprint) {
            assert_eq!(self.active.pop(), Some((path.to_path_buf(), context)));
        }
    }

    #[test]
    fn test_if_0_block() {
        let source = "int a;\n#if 0\nint b;\n#endif\nint c;\n";
        let result = run(source, &[]);

        assert_eq!(blocks(source, &[]), vec![(13, 20)]);
        assert!(result.active_text.contains("int a;"));
        assert!(!result.active_text.contains("int b;"));
        assert!(result.active_text.contains("int c;"));
        assert!(!result.active_text.contains("#if"));
    }

    #[test]
    fn test_preserve_offsets_and_lines() {
        let source = "line1\n#if 0\nline3\n#endif\nline5";
        let result = run(source, &[]);
        assert_eq!(result.active_text.len(), source.len());
        assert_eq!(result.active_text.lines().count(), source.lines().count());
        assert_eq!(&result.active_text[25..], "line5");
    }

    #[test]
    fn test_ifdef_else_follows_macros() {
        let source = "#ifdef FOO\nint a;\n#else\nint b;\n#endif\n";
        // "#ifdef FOO\n" 0..11, "int a;\n" 11..18, "#else\n" 18..24, "int b;\n" 24..31
        assert_eq!(blocks(source, &[]), vec![(11, 18)]);
        assert_eq!(blocks(source, &[("FOO", "")]), vec![(24, 31)]);
    }

    #[test]
    fn test_nested_groups_merge_into_outer_block() {
        let source = "#if 0\n#if 1\nx\n#endif\n#endif\ny\n";
        assert_eq!(blocks(source, &[]), vec![(6, 21)]);
    }

    #[test]
    fn test_elif_chain() {
        let source = "#if V == 1\na\n#elif V == 2\nb\n#else\nc\n#endif\n";
        // "#if V == 1\n" 0..11, "a\n" 11..13, "#elif V == 2\n" 13..26, "b\n" 26..28,
        // "#else\n" 28..34, "c\n" 34..36
        assert_eq!(blocks(source, &[("V", "1")]), vec![(26, 28), (34, 36)]);
        assert_eq!(blocks(source, &[("V", "2")]), vec![(11, 13), (34, 36)]);
        assert_eq!(blocks(source, &[("V", "3")]), vec![(11, 13), (26, 28)]);
    }

    #[test]
    fn test_define_and_undef_in_file() {
        let source = "#define FOO 2\n#if FOO > 1\na\n#endif\n#undef FOO\n#ifdef FOO\nb\n#endif\n";
        let result = run(source, &[]);
        assert_eq!(result.inactive_blocks.len(), 1);
        assert_eq!(result.macro_sites.len(), 1);
        assert_eq!(result.macro_sites[0].name, "FOO");
        assert_eq!(result.macro_sites[0].range, TextRange::new(0, 13));
    }

    #[test]
    fn test_define_inside_inactive_block_is_ignored() {
        let source = "#if 0\n#define FOO\n#endif\n#ifdef FOO\nx\n#endif\n";
        let result = run(source, &[]);
        assert_eq!(result.inactive_blocks.len(), 2);
        assert!(result.macro_sites.is_empty());
    }

    #[test]
    fn test_line_continuation_in_condition() {
        let source = "#if defined(A) && \\\n    defined(B)\nx\n#endif\n";
        assert_eq!(blocks(source, &[("A", "")]).len(), 1);
        assert!(blocks(source, &[("A", ""), ("B", "")]).is_empty());
    }

    #[test]
    fn test_directives_inside_comments_are_ignored() {
        let source = "/*\n#if 0\n*/\nint x;\n";
        assert!(blocks(source, &[]).is_empty());

        let source = "#if 1 /* start\n#if 0\n*/\nint x;\n#endif\n";
        assert!(blocks(source, &[]).is_empty());
    }

    #[test]
    fn test_unterminated_group_runs_to_end() {
        let source = "#if 0\nint x;\n";
        assert_eq!(blocks(source, &[]), vec![(6, 13)]);
    }

    #[test]
    fn test_empty_inactive_branch_reports_nothing() {
        let source = "#if 0\n#endif\n";
        assert!(blocks(source, &[]).is_empty());
    }

    #[test]
    fn test_bad_expression_counts_error() {
        let result = run("#if 1 +\nx\n#endif\n", &[]);
        assert_eq!(result.evaluation_errors, 1);
        assert_eq!(result.inactive_blocks.len(), 1);
    }

    #[test]
    fn test_has_include_fallback_branch() {
        let source = "#if !__has_include(<sys/stat.h>)\na\n#else\nb\n#endif\n";
        // "#if !__has_include(<sys/stat.h>)\n" 0..33, "a\n" 33..35, "#else\n" 35..41,
        // "b\n" 41..43
        let result = run(source, &[]);
        assert_eq!(result.evaluation_errors, 0);
        assert_eq!(blocks(source, &[]), vec![(41, 43)]);
    }

    #[test]
    fn test_include_records_context_and_blocks() {
        let mut handler = MapHandler::new(&[(
            "/t/cfg.h",
            "#ifdef MODE\nint on;\n#else\nint off;\n#endif\n#define INNER 1\n",
        )]);
        let source = "#define MODE 1\n#include \"cfg.h\"\n#if INNER\nint x;\n#endif\n";
        let mut env = MacroEnvironment::new();
        let base = env.fingerprint();
        let (result, includes) =
            evaluate_conditionals(Path::new("/t/a.c"), source, &mut env, &mut handler, 64);

        assert_eq!(includes.len(), 1);
        let record = &includes[0];
        assert_eq!(record.status, IncludeStatus::Resolved);
        assert_eq!(record.target, Some(PathBuf::from("/t/cfg.h")));
        assert_eq!(record.includer_context, base);
        assert_eq!(
            record.context,
            MacroEnvironment::from_pairs([("MODE", "1")]).fingerprint()
        );
        // "#ifdef MODE\n" 0..12, "int on;\n" 12..20, "#else\n" 20..26, "int off;\n" 26..35
        assert_eq!(record.inactive_blocks, vec![TextRange::new(26, 35)]);
        // INNER was defined by the header, so the source has no dead code
        assert!(result.inactive_blocks.is_empty());
        assert!(env.is_defined("INNER"));
    }

    #[test]
    fn test_include_in_inactive_block_is_not_entered() {
        let mut handler = MapHandler::new(&[("/t/x.h", "")]);
        let mut env = MacroEnvironment::new();
        let (_, includes) = evaluate_conditionals(
            Path::new("/t/a.c"),
            "#if 0\n#include \"x.h\"\n#endif\n",
            &mut env,
            &mut handler,
            64,
        );
        assert!(includes.is_empty());
    }

    #[test]
    fn test_include_through_macro() {
        let mut env = MacroEnvironment::from_pairs([("CONFIG", "<config.h>")]);
        let (_, includes) = evaluate_conditionals(
            Path::new("/t/a.c"),
            "#include CONFIG\n",
            &mut env,
            &mut UnresolvedIncludes,
            64,
        );
        assert_eq!(includes.len(), 1);
        assert_eq!(includes[0].directive.name, "config.h");
        assert!(includes[0].directive.angled);
        assert_eq!(includes[0].status, IncludeStatus::Unresolved);
    }

    #[test]
    fn test_self_include_terminates() {
        let mut handler = MapHandler::new(&[("/t/self.h", "#include \"self.h\"\nint s;\n")]);
        let mut env = MacroEnvironment::new();
        let (_, includes) = evaluate_conditionals(
            Path::new("/t/a.c"),
            "#include \"self.h\"\n",
            &mut env,
            &mut handler,
            64,
        );
        assert_eq!(includes.len(), 2);
        assert_eq!(includes[0].status, IncludeStatus::Resolved);
        assert_eq!(includes[1].status, IncludeStatus::Circular);
        assert_eq!(includes[1].includer, PathBuf::from("/t/self.h"));
    }

    #[test]
    fn test_include_guard_stops_second_entry() {
        let guarded = "#ifndef G_H\n#define G_H\n#include \"g.h\"\nint g;\n#endif\n";
        let mut handler = MapHandler::new(&[("/t/g.h", guarded)]);
        let mut env = MacroEnvironment::new();
        let (_, includes) = evaluate_conditionals(
            Path::new("/t/a.c"),
            "#include \"g.h\"\n#include \"g.h\"\n",
            &mut env,
            &mut handler,
            64,
        );
        // nested self-include plus the second top-level include, both fully inactive
        assert_eq!(includes.len(), 3);
        assert!(includes.iter().all(|r| r.status == IncludeStatus::Resolved));
        assert_eq!(includes[2].inactive_blocks.len(), 1);
    }

    #[test]
    fn test_pragma_once() {
        let mut handler = MapHandler::new(&[("/t/o.h", "#pragma once\nint o;\n")]);
        let mut env = MacroEnvironment::new();
        let (_, includes) = evaluate_conditionals(
            Path::new("/t/a.c"),
            "#include \"o.h\"\n#include \"o.h\"\n",
            &mut env,
            &mut handler,
            64,
        );
        assert_eq!(includes[0].status, IncludeStatus::Resolved);
        assert_eq!(includes[1].status, IncludeStatus::Once);
    }

    #[test]
    fn test_depth_limit() {
        let mut handler = MapHandler::new(&[("/t/d.h", "#define X X\n#include \"d.h\"\n")]);
        let mut env = MacroEnvironment::new();
        let (_, includes) = evaluate_conditionals(
            Path::new("/t/a.c"),
            "#include \"d.h\"\n",
            &mut env,
            &mut handler,
            1,
        );
        assert_eq!(includes[0].status, IncludeStatus::Resolved);
        assert_eq!(includes[1].status, IncludeStatus::DepthLimited);
    }
}
