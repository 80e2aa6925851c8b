//! Syntax stage: the blocking pre-filter.
//!
//! A configured parser command for the language takes precedence (for
//! example `python3 -m py_compile {file}`). Otherwise a built-in checker runs:
//!
//! - JSON: full parse with `serde_json`
//! - Vue SFC: `<template>` must exist with balanced markup; `<script>` blocks
//!   are checked as JavaScript/TypeScript
//! - brace languages: delimiter, string and comment balance
//! - Python: bracket balance, indentation and block-colon checks

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use codegate_core::{CheckResult, Stage, VerificationRequest};
use tracing::debug;

use crate::runner::{command_for, write_source, CommandRunner, CommandSpec};

/// Cap on reported syntax errors per check.
const MAX_ERRORS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    /// 1-based line number.
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

pub struct SyntaxStage {
    name: String,
    parsers: BTreeMap<String, CommandSpec>,
    runner: CommandRunner,
}

impl Default for SyntaxStage {
    fn default() -> Self {
        Self::new("syntax")
    }
}

impl SyntaxStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parsers: BTreeMap::new(),
            runner: CommandRunner::default(),
        }
    }

    /// Use an external parser for `language` instead of the built-in checker.
    pub fn with_parser(mut self, language: impl Into<String>, command: CommandSpec) -> Self {
        self.parsers
            .insert(language.into().to_ascii_lowercase(), command);
        self
    }

    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }
}

#[async_trait]
impl Stage for SyntaxStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_blocking(&self) -> bool {
        true
    }

    async fn check(&self, request: &VerificationRequest) -> anyhow::Result<CheckResult> {
        let language = request.requirements.language.as_str();

        if let Some(command) = command_for(&self.parsers, language) {
            let file = write_source(&request.code, language)?;
            let output = self.runner.run(command, Some(file.path()), None).await?;
            if output.success() {
                return Ok(CheckResult::pass(&self.name));
            }
            let path = file.path().to_string_lossy().into_owned();
            let findings = output
                .lines()
                .into_iter()
                .map(|l| l.replace(&path, "<source>"))
                .take(MAX_ERRORS)
                .collect();
            return Ok(CheckResult::blocking_failure(&self.name, findings));
        }

        match check_source(&request.code, language) {
            Some(errors) if errors.is_empty() => Ok(CheckResult::pass(&self.name)),
            Some(errors) => {
                debug!(language = %language, errors = errors.len(), "syntax errors found");
                Ok(CheckResult::blocking_failure(
                    &self.name,
                    errors.iter().map(ToString::to_string).collect(),
                ))
            }
            None => Ok(CheckResult::pass(&self.name)
                .with_finding(format!("no syntax checker for language `{language}`"))),
        }
    }
}

/// Run the built-in checker for `language`. `None` when unsupported.
pub fn check_source(code: &str, language: &str) -> Option<Vec<SyntaxError>> {
    let lang = language.to_ascii_lowercase();
    let mut errors = match lang.as_str() {
        "json" => check_json(code),
        "vue" => check_vue(code),
        "python" | "py" => check_python(code),
        other => check_delimiters(code, Flavor::for_language(other)?, 1),
    };
    errors.truncate(MAX_ERRORS);
    Some(errors)
}

fn check_json(code: &str) -> Vec<SyntaxError> {
    match serde_json::from_str::<serde_json::Value>(code) {
        Ok(_) => Vec::new(),
        Err(e) => vec![SyntaxError::new(e.line().max(1), format!("invalid JSON: {e}"))],
    }
}

// ---------------------------------------------------------------------------
// Brace languages
// ---------------------------------------------------------------------------

/// Lexical rules that differ between brace languages.
#[derive(Debug, Clone, Copy)]
struct Flavor {
    line_comments: bool,
    backtick_strings: bool,
    multiline_strings: bool,
    /// `'` starts a char literal only when it looks like one (Rust lifetimes).
    lifetime_quotes: bool,
    /// `/.../flags` in operand position is a regular expression literal.
    regex_literals: bool,
}

impl Flavor {
    const JS: Flavor = Flavor {
        line_comments: true,
        backtick_strings: true,
        multiline_strings: false,
        lifetime_quotes: false,
        regex_literals: true,
    };

    fn for_language(lang: &str) -> Option<Self> {
        let c_like = Flavor {
            line_comments: true,
            backtick_strings: false,
            multiline_strings: false,
            lifetime_quotes: false,
            regex_literals: false,
        };
        match lang {
            "javascript" | "js" | "jsx" | "typescript" | "ts" | "tsx" => Some(Self::JS),
            "go" => Some(Flavor {
                backtick_strings: true,
                ..c_like
            }),
            "rust" | "rs" => Some(Flavor {
                multiline_strings: true,
                lifetime_quotes: true,
                ..c_like
            }),
            "java" | "c" | "cpp" | "c++" | "csharp" | "cs" | "kotlin" | "swift" | "php"
            | "scss" => Some(c_like),
            "css" => Some(Flavor {
                line_comments: false,
                ..c_like
            }),
            _ => None,
        }
    }
}

/// Keywords after which `/` begins a regex rather than a division.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

/// Whether a `/` at `pos` sits where an operand is expected.
fn starts_regex(chars: &[char], pos: usize) -> bool {
    let mut j = pos;
    while j > 0 && chars[j - 1].is_whitespace() {
        j -= 1;
    }
    if j == 0 {
        return true;
    }
    let prev = chars[j - 1];
    if prev.is_alphanumeric() || prev == '_' || prev == '$' {
        let end = j;
        while j > 0 && (chars[j - 1].is_alphanumeric() || chars[j - 1] == '_' || chars[j - 1] == '$') {
            j -= 1;
        }
        let word: String = chars[j..end].iter().collect();
        return REGEX_PRECEDING_KEYWORDS.contains(&word.as_str());
    }
    if (prev == '+' || prev == '-') && j >= 2 && chars[j - 2] == prev {
        // postfix `x++ / 2`
        return false;
    }
    matches!(
        prev,
        '(' | ',' | '=' | ':' | '[' | '!' | '&' | '|' | '?' | '{' | '}' | ';' | '+' | '-' | '*'
            | '%' | '>' | '~' | '^'
    )
}

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Delimiter, string and comment balance. `first_line` is the line number of
/// the first line of `code` within the enclosing file.
fn check_delimiters(code: &str, flavor: Flavor, first_line: usize) -> Vec<SyntaxError> {
    let chars: Vec<char> = code.chars().collect();
    let mut errors = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = first_line;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => line += 1,
            '/' if next == Some('/') && flavor.line_comments => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if next == Some('*') => {
                let start = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => {
                            errors.push(SyntaxError::new(start, "unterminated block comment"));
                            return errors;
                        }
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 1;
                            break;
                        }
                        Some('\n') => line += 1,
                        _ => {}
                    }
                    i += 1;
                }
            }
            '/' if flavor.regex_literals && starts_regex(&chars, i) => {
                let mut in_class = false;
                i += 1;
                loop {
                    match chars.get(i) {
                        None | Some('\n') => {
                            errors.push(SyntaxError::new(line, "unterminated regular expression"));
                            return errors;
                        }
                        Some('\\') => i += 1,
                        Some('[') => in_class = true,
                        Some(']') => in_class = false,
                        Some('/') if !in_class => break,
                        _ => {}
                    }
                    i += 1;
                }
            }
            '\'' if flavor.lifetime_quotes => {
                if next == Some('\\') {
                    // escaped char literal: skip to the closing quote
                    i += 2;
                    while i < chars.len() && chars[i] != '\'' && chars[i] != '\n' {
                        i += 1;
                    }
                } else if chars.get(i + 2) == Some(&'\'') {
                    i += 2;
                }
            }
            '"' | '\'' | '`' => {
                if c == '`' && !flavor.backtick_strings {
                    i += 1;
                    continue;
                }
                let start = line;
                let multiline = c == '`' || flavor.multiline_strings && c == '"';
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            errors.push(SyntaxError::new(start, "unterminated string literal"));
                            return errors;
                        }
                        Some('\\') => {
                            if chars.get(i + 1) == Some(&'\n') {
                                line += 1;
                            }
                            i += 1;
                        }
                        Some('\n') if !multiline => {
                            errors.push(SyntaxError::new(start, "unterminated string literal"));
                            line += 1;
                            break;
                        }
                        Some('\n') => line += 1,
                        Some(&q) if q == c => break,
                        _ => {}
                    }
                    i += 1;
                }
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if closer_for(open) == c => {}
                Some((open, open_line)) => {
                    errors.push(SyntaxError::new(
                        line,
                        format!(
                            "mismatched `{c}`: expected `{}` to close `{open}` from line {open_line}",
                            closer_for(open)
                        ),
                    ));
                    return errors;
                }
                None => {
                    errors.push(SyntaxError::new(line, format!("unexpected `{c}`")));
                    return errors;
                }
            },
            _ => {}
        }
        i += 1;
    }

    for (open, open_line) in stack.into_iter().rev() {
        errors.push(SyntaxError::new(open_line, format!("unclosed `{open}`")));
    }
    errors
}

// ---------------------------------------------------------------------------
// Vue single-file components
// ---------------------------------------------------------------------------

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn line_at(code: &str, byte_offset: usize) -> usize {
    code[..byte_offset].matches('\n').count() + 1
}

fn check_vue(code: &str) -> Vec<SyntaxError> {
    let mut errors = Vec::new();

    match code.find("<template") {
        None => errors.push(SyntaxError::new(1, "missing <template> block")),
        Some(open) => match (code[open..].find('>'), code.rfind("</template>")) {
            (Some(rel_end), Some(close)) if open + rel_end < close => {
                let inner_start = open + rel_end + 1;
                errors.extend(check_markup(
                    &code[inner_start..close],
                    line_at(code, inner_start),
                ));
            }
            _ => errors.push(SyntaxError::new(
                line_at(code, open),
                "unclosed <template> block",
            )),
        },
    }

    let mut search_from = 0;
    while let Some(rel) = code[search_from..].find("<script") {
        let open = search_from + rel;
        let Some(rel_end) = code[open..].find('>') else {
            errors.push(SyntaxError::new(line_at(code, open), "malformed <script> tag"));
            break;
        };
        let inner_start = open + rel_end + 1;
        let Some(rel_close) = code[inner_start..].find("</script>") else {
            errors.push(SyntaxError::new(line_at(code, open), "unclosed <script> block"));
            break;
        };
        let inner = &code[inner_start..inner_start + rel_close];
        errors.extend(check_delimiters(inner, Flavor::JS, line_at(code, inner_start)));
        search_from = inner_start + rel_close + "</script>".len();
    }

    errors
}

/// Tag balance for template markup. Comments, void elements and
/// self-closing tags are handled; quoted attribute values may contain `>`.
fn check_markup(markup: &str, first_line: usize) -> Vec<SyntaxError> {
    let chars: Vec<char> = markup.chars().collect();
    let mut errors = Vec::new();
    let mut stack: Vec<(String, usize)> = Vec::new();
    let mut line = first_line;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c != '<' {
            i += 1;
            continue;
        }

        if chars[i..].starts_with(&['<', '!', '-', '-']) {
            let start = line;
            i += 4;
            loop {
                if i >= chars.len() {
                    errors.push(SyntaxError::new(start, "unterminated HTML comment"));
                    return errors;
                }
                if chars[i..].starts_with(&['-', '-', '>']) {
                    i += 3;
                    break;
                }
                if chars[i] == '\n' {
                    line += 1;
                }
                i += 1;
            }
            continue;
        }

        let closing = chars.get(i + 1) == Some(&'/');
        let name_start = if closing { i + 2 } else { i + 1 };
        if !chars
            .get(name_start)
            .is_some_and(|ch| ch.is_ascii_alphabetic())
        {
            i += 1;
            continue;
        }

        let start_line = line;
        let mut j = name_start;
        while j < chars.len()
            && (chars[j].is_ascii_alphanumeric() || chars[j] == '-' || chars[j] == '_' || chars[j] == '.')
        {
            j += 1;
        }
        let name: String = chars[name_start..j].iter().collect::<String>().to_ascii_lowercase();

        // scan to the end of the tag, honouring quoted attribute values
        let mut quote: Option<char> = None;
        let mut self_closing = false;
        loop {
            match chars.get(j) {
                None => {
                    errors.push(SyntaxError::new(start_line, format!("unterminated tag <{name}")));
                    return errors;
                }
                Some('\n') => line += 1,
                Some(&q @ ('"' | '\'')) => match quote {
                    Some(open) if open == q => quote = None,
                    None => quote = Some(q),
                    _ => {}
                },
                Some('>') if quote.is_none() => {
                    self_closing = j > 0 && chars[j - 1] == '/';
                    break;
                }
                _ => {}
            }
            j += 1;
        }
        i = j + 1;

        if closing {
            match stack.pop() {
                Some((open, _)) if open == name => {}
                Some((open, open_line)) => {
                    errors.push(SyntaxError::new(
                        start_line,
                        format!("mismatched </{name}>: expected </{open}> (opened on line {open_line})"),
                    ));
                    return errors;
                }
                None => {
                    errors.push(SyntaxError::new(start_line, format!("unexpected </{name}>")));
                    return errors;
                }
            }
        } else if !self_closing && !VOID_ELEMENTS.contains(&name.as_str()) {
            stack.push((name, start_line));
        }
    }

    for (name, open_line) in stack.into_iter().rev() {
        errors.push(SyntaxError::new(open_line, format!("unclosed <{name}>")));
    }
    errors
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

/// One logical line: physical lines joined across brackets, triple-quoted
/// strings and backslash continuations. Comments are dropped and string
/// contents blanked.
struct LogicalLine {
    line: usize,
    indent: usize,
    text: String,
    mixed_indent: bool,
}

fn indent_of(raw: &str) -> (usize, bool) {
    let ws: String = raw.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
    let width = ws.chars().map(|c| if c == '\t' { 8 } else { 1 }).sum();
    (width, ws.contains(' ') && ws.contains('\t'))
}

fn check_python(code: &str) -> Vec<SyntaxError> {
    let raw_lines: Vec<&str> = code.lines().collect();
    let chars: Vec<char> = code.chars().collect();
    let mut errors = Vec::new();
    let mut logical = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut text = String::new();
    let mut start_line = 1;
    let mut line = 1;
    let mut continued = false;
    let mut i = 0;

    let mut finish = |text: &mut String, start_line: usize, logical: &mut Vec<LogicalLine>| {
        if !text.trim().is_empty() {
            let raw = raw_lines.get(start_line - 1).copied().unwrap_or("");
            let (indent, mixed_indent) = indent_of(raw);
            logical.push(LogicalLine {
                line: start_line,
                indent,
                text: text.trim().to_string(),
                mixed_indent,
            });
        }
        text.clear();
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                continued = true;
                line += 1;
                text.push(' ');
                i += 2;
                continue;
            }
            '\n' => {
                if stack.is_empty() && !continued {
                    finish(&mut text, start_line, &mut logical);
                    start_line = line + 1;
                }
                continued = false;
                line += 1;
            }
            '"' | '\'' => {
                let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                let string_line = line;
                i += if triple { 3 } else { 1 };
                loop {
                    match chars.get(i) {
                        None => {
                            errors.push(SyntaxError::new(string_line, "unterminated string literal"));
                            return errors;
                        }
                        Some('\\') => {
                            if chars.get(i + 1) == Some(&'\n') {
                                line += 1;
                            }
                            i += 1;
                        }
                        Some('\n') if !triple => {
                            errors.push(SyntaxError::new(string_line, "unterminated string literal"));
                            return errors;
                        }
                        Some('\n') => line += 1,
                        Some(&q) if q == c => {
                            if !triple {
                                break;
                            }
                            if chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c) {
                                i += 2;
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                text.push_str("\"\"");
            }
            '(' | '[' | '{' => {
                stack.push((c, line));
                text.push(c);
            }
            ')' | ']' | '}' => {
                match stack.pop() {
                    Some((open, _)) if closer_for(open) == c => {}
                    Some((open, open_line)) => {
                        errors.push(SyntaxError::new(
                            line,
                            format!(
                                "closing `{c}` does not match opening `{open}` on line {open_line}"
                            ),
                        ));
                        return errors;
                    }
                    None => {
                        errors.push(SyntaxError::new(line, format!("unmatched `{c}`")));
                        return errors;
                    }
                }
                text.push(c);
            }
            _ => text.push(c),
        }
        i += 1;
    }

    if let Some((open, open_line)) = stack.last() {
        errors.push(SyntaxError::new(*open_line, format!("`{open}` was never closed")));
        return errors;
    }
    finish(&mut text, start_line, &mut logical);

    check_python_blocks(&logical, &mut errors);
    errors
}

const BLOCK_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "def", "class", "try", "except", "finally", "with",
];

fn first_word(text: &str) -> &str {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("")
}

fn opens_block_keyword(text: &str) -> bool {
    let word = first_word(text);
    if word == "async" {
        let rest = text["async".len()..].trim_start();
        return matches!(first_word(rest), "def" | "for" | "with");
    }
    BLOCK_KEYWORDS.contains(&word)
}

fn check_python_blocks(lines: &[LogicalLine], errors: &mut Vec<SyntaxError>) {
    let mut indents = vec![0usize];
    let mut expect_indent: Option<usize> = None;

    for l in lines {
        if errors.len() >= MAX_ERRORS {
            return;
        }
        if l.mixed_indent {
            errors.push(SyntaxError::new(
                l.line,
                "inconsistent use of tabs and spaces in indentation",
            ));
        }

        let top = indents.last().copied().unwrap_or(0);
        if let Some(opener) = expect_indent.take() {
            if l.indent <= top {
                errors.push(SyntaxError::new(
                    l.line,
                    format!("expected an indented block after line {opener}"),
                ));
            } else {
                indents.push(l.indent);
            }
        } else if l.indent > top {
            errors.push(SyntaxError::new(l.line, "unexpected indent"));
            indents.push(l.indent);
        } else if l.indent < top {
            while indents.last().is_some_and(|&t| t > l.indent) {
                indents.pop();
            }
            if indents.last().copied().unwrap_or(0) != l.indent {
                errors.push(SyntaxError::new(
                    l.line,
                    "unindent does not match any outer indentation level",
                ));
                indents.push(l.indent);
            }
        }

        if opens_block_keyword(&l.text) && !l.text.contains(':') {
            errors.push(SyntaxError::new(l.line, "expected ':'"));
        }
        if l.text.ends_with(':') {
            expect_indent = Some(l.line);
        }
    }

    if let Some(opener) = expect_indent {
        errors.push(SyntaxError::new(
            opener,
            format!("expected an indented block after line {opener}"),
        ));
    }
}
