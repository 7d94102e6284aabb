//! `#if` / `#elif` expression evaluation
//!
//! Evaluates controlling expressions against a live macro table:
//!
//! - `defined NAME` and `defined(NAME)`
//! - integer literals (decimal, hex, octal, binary, with `u`/`l` suffixes)
//!   and character literals
//! - object-like macros evaluate to the value of their replacement list
//! - identifiers that are not macros evaluate to 0, as do calls of
//!   function-like macros and of unknown functions such as `__has_include`;
//!   the arguments of a call are skipped unparsed
//! - unary, binary and ternary operators with C precedence
//!
//! Arithmetic wraps; division or remainder by zero yields 0 instead of an
//! error so that guarded expressions like `X && 10 / X` still evaluate.

use codemodel_parser_api::MacroEnvironment;
use std::fmt;

/// Nesting limit for macro replacement inside an expression
const MAX_EXPANSION_DEPTH: usize = 32;

/// Nesting limit for parentheses, unary operators and ternaries, counted
/// across macro replacement
const MAX_NESTING_DEPTH: usize = 256;

/// Malformed controlling expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprError(pub String);

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid preprocessor expression: {}", self.0)
    }
}

impl std::error::Error for ExprError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(i64),
    Ident(String),
    /// Identifier followed by a parenthesized argument list
    Call(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "(", ")", "!", "~", "+", "-", "*", "/", "%",
    "<", ">", "&", "^", "|", "?", ":", ",",
];

fn tokenize(expr: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(Token::Num(parse_number(&expr[start..i])?));
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let name = expr[start..i].to_string();
            let mut after = i;
            while after < bytes.len() && bytes[after].is_ascii_whitespace() {
                after += 1;
            }
            if name != "defined" && bytes.get(after) == Some(&b'(') {
                i = skip_arguments(bytes, after)?;
                tokens.push(Token::Call(name));
            } else {
                tokens.push(Token::Ident(name));
            }
        } else if c == b'\'' {
            let (value, next) = parse_char(bytes, i)?;
            tokens.push(Token::Num(value));
            i = next;
        } else if let Some(op) = OPERATORS.iter().find(|op| expr[i..].starts_with(**op)) {
            tokens.push(Token::Op(*op));
            i += op.len();
        } else {
            return Err(ExprError(format!("unexpected character '{}'", c as char)));
        }
    }

    Ok(tokens)
}

/// Index just past the `)` balancing the `(` at `open`. Quoted literals in
/// the arguments are skipped whole.
fn skip_arguments(bytes: &[u8], open: usize) -> Result<usize, ExprError> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            quote @ (b'"' | b'\'') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(ExprError("unbalanced parentheses".into()))
}

fn parse_number(text: &str) -> Result<i64, ExprError> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let lower = digits.to_ascii_lowercase();
    let parsed = if let Some(hex) = lower.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else if let Some(bin) = lower.strip_prefix("0b") {
        u64::from_str_radix(bin, 2)
    } else if lower.len() > 1 && lower.starts_with('0') {
        u64::from_str_radix(&lower[1..], 8)
    } else {
        lower.parse::<u64>()
    };
    parsed
        .map(|v| v as i64)
        .map_err(|_| ExprError(format!("bad integer literal '{text}'")))
}

fn parse_char(bytes: &[u8], start: usize) -> Result<(i64, usize), ExprError> {
    let mut i = start + 1;
    let value = match bytes.get(i) {
        Some(b'\\') => {
            i += 1;
            let escaped = match bytes.get(i) {
                Some(b'n') => b'\n',
                Some(b't') => b'\t',
                Some(b'r') => b'\r',
                Some(b'0') => 0,
                Some(&other) => other,
                None => return Err(ExprError("unterminated character literal".into())),
            };
            i += 1;
            escaped
        }
        Some(&c) => {
            i += 1;
            c
        }
        None => return Err(ExprError("unterminated character literal".into())),
    };
    if bytes.get(i) != Some(&b'\'') {
        return Err(ExprError("unterminated character literal".into()));
    }
    Ok((value as i64, i + 1))
}

/// Evaluate a controlling expression; non-zero means the branch is taken.
pub fn evaluate(expr: &str, macros: &MacroEnvironment) -> Result<i64, ExprError> {
    evaluate_nested(expr, macros, &mut Vec::new(), 0)
}

/// Convenience wrapper returning the branch decision.
pub fn is_true(expr: &str, macros: &MacroEnvironment) -> Result<bool, ExprError> {
    evaluate(expr, macros).map(|v| v != 0)
}

fn evaluate_nested(
    expr: &str,
    macros: &MacroEnvironment,
    expanding: &mut Vec<String>,
    depth: usize,
) -> Result<i64, ExprError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(ExprError("empty expression".into()));
    }
    let mut evaluator = Evaluator {
        tokens,
        pos: 0,
        depth,
        macros,
        expanding,
    };
    let value = evaluator.comma()?;
    if evaluator.pos != evaluator.tokens.len() {
        return Err(ExprError(format!(
            "unexpected trailing token {:?}",
            evaluator.tokens[evaluator.pos]
        )));
    }
    Ok(value)
}

struct Evaluator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    macros: &'a MacroEnvironment,
    expanding: &'a mut Vec<String>,
}

fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | "<=" | ">" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

fn apply(op: &str, lhs: i64, rhs: i64) -> i64 {
    match op {
        "||" => ((lhs != 0) || (rhs != 0)) as i64,
        "&&" => ((lhs != 0) && (rhs != 0)) as i64,
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => (lhs == rhs) as i64,
        "!=" => (lhs != rhs) as i64,
        "<" => (lhs < rhs) as i64,
        "<=" => (lhs <= rhs) as i64,
        ">" => (lhs > rhs) as i64,
        ">=" => (lhs >= rhs) as i64,
        "<<" => lhs.wrapping_shl((rhs & 63) as u32),
        ">>" => lhs.wrapping_shr((rhs & 63) as u32),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" if rhs == 0 => 0,
        "/" => lhs.wrapping_div(rhs),
        "%" if rhs == 0 => 0,
        "%" => lhs.wrapping_rem(rhs),
        _ => 0,
    }
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), ExprError> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(ExprError(format!("expected '{op}'")))
        }
    }

    /// Run one level of recursive descent under the nesting limit.
    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<i64, ExprError>,
    ) -> Result<i64, ExprError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ExprError("expression nests too deeply".into()));
        }
        self.depth += 1;
        let value = f(self);
        self.depth -= 1;
        value
    }

    fn comma(&mut self) -> Result<i64, ExprError> {
        let mut value = self.ternary()?;
        while self.eat(",") {
            value = self.ternary()?;
        }
        Ok(value)
    }

    fn ternary(&mut self) -> Result<i64, ExprError> {
        self.nested(Self::ternary_inner)
    }

    fn ternary_inner(&mut self) -> Result<i64, ExprError> {
        let cond = self.binary(1)?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then = self.comma()?;
        self.expect(":")?;
        let otherwise = self.ternary()?;
        Ok(if cond != 0 { then } else { otherwise })
    }

    fn binary(&mut self, min_prec: u8) -> Result<i64, ExprError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op)) => *op,
                _ => break,
            };
            let prec = match precedence(op) {
                Some(p) if p >= min_prec => p,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = apply(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, ExprError> {
        self.nested(Self::unary_inner)
    }

    fn unary_inner(&mut self) -> Result<i64, ExprError> {
        if self.eat("!") {
            return Ok((self.unary()? == 0) as i64);
        }
        if self.eat("~") {
            return Ok(!self.unary()?);
        }
        if self.eat("-") {
            return Ok(self.unary()?.wrapping_neg());
        }
        if self.eat("+") {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, ExprError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Op("(")) => {
                let value = self.comma()?;
                self.expect(")")?;
                Ok(value)
            }
            Some(Token::Ident(name)) => self.identifier(&name),
            // Function-like macros and builtins are not expanded
            Some(Token::Call(_)) => Ok(0),
            Some(other) => Err(ExprError(format!("unexpected token {other:?}"))),
            None => Err(ExprError("unexpected end of expression".into())),
        }
    }

    fn identifier(&mut self, name: &str) -> Result<i64, ExprError> {
        match name {
            "defined" => {
                let parenthesized = self.eat("(");
                let target = match self.next() {
                    Some(Token::Ident(target)) => target,
                    _ => return Err(ExprError("'defined' needs a macro name".into())),
                };
                if parenthesized {
                    self.expect(")")?;
                }
                Ok(self.macros.is_defined(&target) as i64)
            }
            "true" => Ok(1),
            "false" => Ok(0),
            _ => match self.macros.get(name) {
                Some(def) if !def.is_function_like() => {
                    if def.body.is_empty() || self.expanding.iter().any(|n| n == name) {
                        return Ok(0);
                    }
                    if self.expanding.len() >= MAX_EXPANSION_DEPTH {
                        return Err(ExprError(format!("macro '{name}' expands too deeply")));
                    }
                    self.expanding.push(name.to_string());
                    let value =
                        evaluate_nested(&def.body, self.macros, self.expanding, self.depth);
                    self.expanding.pop();
                    value
                }
                _ => Ok(0),
            },
        }
    }
}
