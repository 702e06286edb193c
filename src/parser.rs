//! Manifest parser.
//!
//! Reads the manifest line by line, joining `$`-escaped newlines, stripping
//! comments and tracking indentation, and produces the ordered statement
//! list the engine evaluates. Indented lines form the nested assignment
//! block of the preceding header statement.

use crate::error::Error;

/// Assignment operator of a statement or nested assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Append,
    Subtract,
}

impl AssignOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Set => "=",
            AssignOp::Append => "+=",
            AssignOp::Subtract => "-=",
        }
    }
}

/// One `name <op> value` pair; the value is kept verbatim and evaluated
/// later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assign {
    pub name: String,
    pub value: String,
    pub op: AssignOp,
}

/// A `build` statement before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStmt {
    pub targets_explicit: Vec<String>,
    pub targets_implicit: Vec<String>,
    pub rule: String,
    pub inputs_explicit: Vec<String>,
    pub inputs_implicit: Vec<String>,
    pub inputs_order: Vec<String>,
    pub assigns: Vec<Assign>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Assign(Assign),
    Rule {
        name: String,
        assigns: Vec<Assign>,
    },
    Build(Box<BuildStmt>),
    Default {
        paths: Vec<String>,
    },
    Pool {
        name: String,
        assigns: Vec<Assign>,
    },
    Filter {
        predicates: Vec<(String, String)>,
        assigns: Vec<Assign>,
    },
    Auto {
        outputs: Vec<String>,
        rule: String,
        inputs: Vec<String>,
        assigns: Vec<Assign>,
    },
    Include {
        path: String,
    },
    Subninja {
        path: String,
    },
    Transform {
        target: String,
        template: String,
    },
    Print {
        text: String,
    },
    Comment(String),
    Blank(usize),
}

/// A parsed statement with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    /// The stripped logical line the statement came from.
    pub line: String,
    /// 1-based number of the first physical line.
    pub line_no: usize,
}

/// Parse a whole manifest into statements.
pub fn parse(text: &str, filename: &str) -> Result<Vec<Statement>, Error> {
    Parser::new(text, filename).parse()
}

struct Logical {
    stripped: String,
    indented: bool,
    line_no: usize,
}

struct Parser<'a> {
    filename: &'a str,
    lines: Vec<&'a str>,
    idx: usize,
    peeked: Option<Logical>,
    statements: Vec<Statement>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, filename: &'a str) -> Self {
        Self {
            filename,
            lines: text.lines().collect(),
            idx: 0,
            peeked: None,
            statements: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Vec<Statement>, Error> {
        while let Some(logical) = self.take_content()? {
            if logical.indented {
                return Err(Error::UnexpectedIndentation {
                    line: logical.stripped,
                    file: self.filename.to_string(),
                    line_no: logical.line_no,
                });
            }
            let stmt = self.parse_statement(logical)?;
            self.statements.push(stmt);
        }
        Ok(self.statements)
    }

    /// Join physical lines across trailing `$` continuations. An odd run of
    /// trailing dollars continues the line (the last `$` is stripped), an
    /// even run is all literal dollars.
    fn next_raw_logical(&mut self) -> Option<(String, usize)> {
        if self.idx >= self.lines.len() {
            return None;
        }
        let line_no = self.idx + 1;
        let mut line = String::new();
        loop {
            line.push_str(self.lines[self.idx]);
            self.idx += 1;
            let trailing = line.chars().rev().take_while(|&c| c == '$').count();
            if trailing % 2 == 1 {
                line.pop();
                if self.idx >= self.lines.len() {
                    break;
                }
            } else {
                break;
            }
        }
        Some((line, line_no))
    }

    /// Advance to the next content line, recording blank lines and full-line
    /// comments as statements along the way.
    fn advance_content(&mut self) -> Result<Option<Logical>, Error> {
        while let Some((line, line_no)) = self.next_raw_logical() {
            let stripped = line.trim();
            if stripped.is_empty() {
                self.push_blank();
                continue;
            }
            if let Some(comment) = stripped.strip_prefix('#') {
                self.statements.push(Statement {
                    kind: StatementKind::Comment(comment.to_string()),
                    line: stripped.to_string(),
                    line_no,
                });
                continue;
            }
            let stripped = strip_trailing_comment(stripped);
            if stripped.is_empty() {
                self.push_blank();
                continue;
            }
            let ws = &line[..line.len() - line.trim_start().len()];
            if ws.contains(' ') && ws.contains('\t') {
                return Err(Error::InconsistentWhitespace {
                    line: line.clone(),
                    file: self.filename.to_string(),
                    line_no,
                });
            }
            return Ok(Some(Logical {
                stripped: stripped.to_string(),
                indented: !ws.is_empty(),
                line_no,
            }));
        }
        Ok(None)
    }

    fn push_blank(&mut self) {
        if let Some(Statement {
            kind: StatementKind::Blank(count),
            ..
        }) = self.statements.last_mut()
        {
            *count += 1;
        } else {
            let line_no = self.idx;
            self.statements.push(Statement {
                kind: StatementKind::Blank(1),
                line: String::new(),
                line_no,
            });
        }
    }

    fn peek_content(&mut self) -> Result<Option<&Logical>, Error> {
        if self.peeked.is_none() {
            self.peeked = self.advance_content()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn take_content(&mut self) -> Result<Option<Logical>, Error> {
        if let Some(peeked) = self.peeked.take() {
            return Ok(Some(peeked));
        }
        self.advance_content()
    }

    fn read_nested_assigns(&mut self) -> Result<Vec<Assign>, Error> {
        let mut assigns = Vec::new();
        while matches!(self.peek_content()?, Some(logical) if logical.indented) {
            let logical = self.take_content()?.unwrap();
            let mut cur = Cursor::new(&logical, self.filename);
            let name = cur.read_identifier()?;
            let op = cur.read_assign_op()?;
            assigns.push(Assign {
                name,
                value: cur.rest.to_string(),
                op,
            });
        }
        Ok(assigns)
    }

    fn parse_statement(&mut self, logical: Logical) -> Result<Statement, Error> {
        let mut cur = Cursor::new(&logical, self.filename);
        let command = cur.read_identifier()?;

        let kind = match command.as_str() {
            "rule" => {
                let name = cur.read_identifier()?;
                cur.read_eol()?;
                let assigns = self.read_nested_assigns()?;
                StatementKind::Rule { name, assigns }
            }
            "build" => {
                let mut build = read_build(&mut cur)?;
                build.assigns = self.read_nested_assigns()?;
                StatementKind::Build(Box::new(build))
            }
            "default" => {
                cur.expect_nonempty()?;
                let mut paths = Vec::new();
                while !cur.rest.is_empty() {
                    paths.push(cur.read_path()?);
                }
                StatementKind::Default { paths }
            }
            "pool" => {
                let name = cur.read_identifier()?;
                cur.read_eol()?;
                let assigns = self.read_nested_assigns()?;
                StatementKind::Pool { name, assigns }
            }
            "include" => {
                let path = cur.read_path()?;
                cur.read_eol()?;
                StatementKind::Include { path }
            }
            "subninja" => {
                let path = cur.read_path()?;
                cur.read_eol()?;
                StatementKind::Subninja { path }
            }
            "auto" => {
                let (outputs, rule, inputs) = read_auto(&mut cur)?;
                let assigns = self.read_nested_assigns()?;
                StatementKind::Auto {
                    outputs,
                    rule,
                    inputs,
                    assigns,
                }
            }
            "filter" => {
                cur.expect_nonempty()?;
                let mut predicates = Vec::new();
                while !cur.rest.is_empty() {
                    let name = cur.read_identifier()?;
                    cur.expect_prefix("=")?;
                    let value = cur.read_path()?;
                    predicates.push((name, value));
                }
                let assigns = self.read_nested_assigns()?;
                StatementKind::Filter { predicates, assigns }
            }
            "transform" => {
                let target = cur.read_identifier()?;
                cur.expect_prefix(":")?;
                StatementKind::Transform {
                    target,
                    template: cur.rest.to_string(),
                }
            }
            "print" => StatementKind::Print {
                text: cur.rest.to_string(),
            },
            _ => {
                let op = cur.read_assign_op()?;
                StatementKind::Assign(Assign {
                    name: command,
                    value: cur.rest.to_string(),
                    op,
                })
            }
        };

        Ok(Statement {
            kind,
            line: logical.stripped,
            line_no: logical.line_no,
        })
    }
}

fn read_build(cur: &mut Cursor<'_>) -> Result<BuildStmt, Error> {
    let mut build = BuildStmt {
        targets_explicit: Vec::new(),
        targets_implicit: Vec::new(),
        rule: String::new(),
        inputs_explicit: Vec::new(),
        inputs_implicit: Vec::new(),
        inputs_order: Vec::new(),
        assigns: Vec::new(),
    };

    cur.expect_nonempty()?;
    while !cur.rest.starts_with(['|', ':']) {
        build.targets_explicit.push(cur.read_path()?);
        cur.expect_nonempty()?;
    }

    if cur.rest.starts_with('|') {
        cur.advance(1);
        cur.expect_nonempty()?;
        while !cur.rest.starts_with(':') {
            build.targets_implicit.push(cur.read_path()?);
            cur.expect_nonempty()?;
        }
    }

    cur.expect_prefix(":")?;
    build.rule = cur.read_identifier()?;

    if !cur.rest.is_empty() {
        while !cur.rest.is_empty() && !cur.rest.starts_with('|') {
            build.inputs_explicit.push(cur.read_path()?);
        }
        if cur.rest.starts_with('|') && !cur.rest.starts_with("||") {
            cur.advance(1);
            while !cur.rest.is_empty() && !cur.rest.starts_with('|') {
                build.inputs_implicit.push(cur.read_path()?);
            }
        }
        if cur.rest.starts_with("||") {
            cur.advance(2);
            while !cur.rest.is_empty() {
                build.inputs_order.push(cur.read_path()?);
            }
        }
    }

    cur.read_eol()?;
    Ok(build)
}

fn read_auto(cur: &mut Cursor<'_>) -> Result<(Vec<String>, String, Vec<String>), Error> {
    cur.expect_nonempty()?;
    let mut outputs = Vec::new();
    while !cur.rest.starts_with(':') {
        outputs.push(cur.read_path()?);
        cur.expect_nonempty()?;
    }
    cur.expect_prefix(":")?;
    let rule = cur.read_identifier()?;
    cur.expect_nonempty()?;
    let mut inputs = Vec::new();
    while !cur.rest.is_empty() {
        inputs.push(cur.read_path()?);
    }
    Ok((outputs, rule, inputs))
}

/// Scanner over one stripped logical line.
struct Cursor<'a> {
    rest: &'a str,
    line: &'a str,
    file: &'a str,
    line_no: usize,
}

impl<'a> Cursor<'a> {
    fn new(logical: &'a Logical, file: &'a str) -> Self {
        Self {
            rest: &logical.stripped,
            line: &logical.stripped,
            file,
            line_no: logical.line_no,
        }
    }

    fn expected(&self, expected: &str) -> Error {
        Error::ExpectedToken {
            expected: expected.to_string(),
            line: self.line.to_string(),
            file: self.file.to_string(),
            line_no: self.line_no,
        }
    }

    fn advance(&mut self, n: usize) {
        self.rest = self.rest[n..].trim_start();
    }

    /// `[A-Za-z0-9_.-]+`
    fn read_identifier(&mut self) -> Result<String, Error> {
        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(self.expected("identifier"));
        }
        let identifier = self.rest[..end].to_string();
        self.advance(end);
        Ok(identifier)
    }

    /// A run of characters excluding space, `:`, `|` and newline, where the
    /// escapes `$ `, `$:` and `$|` count as one character.
    fn read_path(&mut self) -> Result<String, Error> {
        let bytes = self.rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$'
                && i + 1 < bytes.len()
                && matches!(bytes[i + 1], b'|' | b' ' | b':')
            {
                i += 2;
            } else if !matches!(bytes[i], b' ' | b':' | b'|' | b'\n') {
                i += 1;
                while i < bytes.len() && !self.rest.is_char_boundary(i) {
                    i += 1;
                }
            } else {
                break;
            }
        }
        if i == 0 {
            return Err(self.expected("path"));
        }
        let path = self.rest[..i].to_string();
        self.advance(i);
        Ok(path)
    }

    fn read_assign_op(&mut self) -> Result<AssignOp, Error> {
        let op = if self.rest.starts_with("+=") {
            self.advance(2);
            AssignOp::Append
        } else if self.rest.starts_with("-=") {
            self.advance(2);
            AssignOp::Subtract
        } else if self.rest.starts_with('=') {
            self.advance(1);
            AssignOp::Set
        } else {
            return Err(self.expected("="));
        };
        Ok(op)
    }

    fn expect_prefix(&mut self, token: &str) -> Result<(), Error> {
        if !self.rest.starts_with(token) {
            return Err(self.expected(token));
        }
        self.advance(token.len());
        Ok(())
    }

    fn expect_nonempty(&self) -> Result<(), Error> {
        if self.rest.is_empty() {
            return Err(self.expected("token(s)"));
        }
        Ok(())
    }

    fn read_eol(&self) -> Result<(), Error> {
        if !self.rest.is_empty() {
            return Err(Error::UnexpectedToken {
                rest: self.rest.to_string(),
                line: self.line.to_string(),
                file: self.file.to_string(),
                line_no: self.line_no,
            });
        }
        Ok(())
    }
}

/// Cut the line at the first `#` that is not directly preceded by `$`.
fn strip_trailing_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && (i == 0 || bytes[i - 1] != b'$') {
            return line[..i].trim_end();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(text: &str) -> StatementKind {
        let statements = parse(text, "test.fox").unwrap();
        assert_eq!(statements.len(), 1, "expected one statement: {statements:?}");
        statements.into_iter().next().unwrap().kind
    }

    #[test]
    fn assignment_ops() {
        assert_eq!(
            parse_one("x = foo bar"),
            StatementKind::Assign(Assign {
                name: "x".to_string(),
                value: "foo bar".to_string(),
                op: AssignOp::Set,
            })
        );
        assert!(matches!(
            parse_one("x += y"),
            StatementKind::Assign(Assign {
                op: AssignOp::Append,
                ..
            })
        ));
        assert!(matches!(
            parse_one("x -= y"),
            StatementKind::Assign(Assign {
                op: AssignOp::Subtract,
                ..
            })
        ));
    }

    #[test]
    fn rule_with_nested_assigns() {
        let kind = parse_one("rule cc\n  command = gcc $in -o $out\n  expand = true");
        let StatementKind::Rule { name, assigns } = kind else {
            panic!("not a rule: {kind:?}");
        };
        assert_eq!(name, "cc");
        assert_eq!(assigns.len(), 2);
        assert_eq!(assigns[0].name, "command");
        assert_eq!(assigns[0].value, "gcc $in -o $out");
    }

    #[test]
    fn build_with_all_sections() {
        let kind = parse_one("build a.o | a.d : cc a.c | gen.h || order.stamp");
        let StatementKind::Build(build) = kind else {
            panic!("not a build: {kind:?}");
        };
        assert_eq!(build.targets_explicit, vec!["a.o"]);
        assert_eq!(build.targets_implicit, vec!["a.d"]);
        assert_eq!(build.rule, "cc");
        assert_eq!(build.inputs_explicit, vec!["a.c"]);
        assert_eq!(build.inputs_implicit, vec!["gen.h"]);
        assert_eq!(build.inputs_order, vec!["order.stamp"]);
    }

    #[test]
    fn continuation_with_odd_dollar_run() {
        // two literal dollars, the third continues the line
        let kind = parse_one("x = a$$$\nb");
        assert_eq!(
            kind,
            StatementKind::Assign(Assign {
                name: "x".to_string(),
                value: "a$$b".to_string(),
                op: AssignOp::Set,
            })
        );
    }

    #[test]
    fn even_dollar_run_terminates_line() {
        let statements = parse("x = a$$\ny = b", "test.fox").unwrap();
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn comments_are_preserved_and_trailing_stripped() {
        let statements = parse("# header\nx = 1 # trailing\n", "test.fox").unwrap();
        assert_eq!(
            statements[0].kind,
            StatementKind::Comment(" header".to_string())
        );
        assert!(matches!(
            &statements[1].kind,
            StatementKind::Assign(Assign { value, .. }) if value == "1"
        ));
    }

    #[test]
    fn escaped_hash_is_not_a_comment() {
        let kind = parse_one("x = a$#b");
        assert!(matches!(
            kind,
            StatementKind::Assign(Assign { value, .. }) if value == "a$#b"
        ));
    }

    #[test]
    fn blank_lines_are_counted() {
        let statements = parse("x = 1\n\n\ny = 2", "test.fox").unwrap();
        assert_eq!(statements[1].kind, StatementKind::Blank(2));
    }

    #[test]
    fn mixed_indent_is_an_error() {
        let err = parse("rule cc\n \tcommand = gcc", "test.fox").unwrap_err();
        assert!(matches!(err, Error::InconsistentWhitespace { .. }));
    }

    #[test]
    fn stray_indent_is_an_error() {
        let err = parse("  x = 1", "test.fox").unwrap_err();
        assert!(matches!(err, Error::UnexpectedIndentation { .. }));
    }

    #[test]
    fn filter_predicates_and_block() {
        let kind = parse_one("filter toolset=msvc variation=debug\n  defines = DEBUG");
        let StatementKind::Filter { predicates, assigns } = kind else {
            panic!("not a filter: {kind:?}");
        };
        assert_eq!(
            predicates,
            vec![
                ("toolset".to_string(), "msvc".to_string()),
                ("variation".to_string(), "debug".to_string())
            ]
        );
        assert_eq!(assigns.len(), 1);
    }

    #[test]
    fn auto_statement() {
        let kind = parse_one("auto *.o : cc *.c");
        assert_eq!(
            kind,
            StatementKind::Auto {
                outputs: vec!["*.o".to_string()],
                rule: "cc".to_string(),
                inputs: vec!["*.c".to_string()],
                assigns: Vec::new(),
            }
        );
    }

    #[test]
    fn transform_statement() {
        let kind = parse_one("transform objects: ${path}${file}.o");
        assert_eq!(
            kind,
            StatementKind::Transform {
                target: "objects".to_string(),
                template: "${path}${file}.o".to_string(),
            }
        );
    }

    #[test]
    fn paths_keep_escapes() {
        let kind = parse_one("build out$ dir/a.o: cc in$:put.c");
        let StatementKind::Build(build) = kind else {
            panic!();
        };
        assert_eq!(build.targets_explicit, vec!["out$ dir/a.o"]);
        assert_eq!(build.inputs_explicit, vec!["in$:put.c"]);
    }
}
