// Surface-syntax validation of model-written programs, before anything is
// shipped to a worker. The program is parsed exactly as the generator will
// wrap it, so top-level `await` and `return` are legal and never reported.

use tree_sitter::{Node, Parser};

use crate::error::SandboxError;

const MAX_REPORTED_PROBLEMS: usize = 3;

pub fn validate_syntax(code: &str) -> Result<(), SandboxError> {
    let wrapped = format!("async () => {{\n{code}\n}}");

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_javascript::LANGUAGE.into())
        .map_err(|e| SandboxError::SyntaxInvalid {
            message: format!("syntax checker unavailable: {e}"),
            hint: None,
        })?;

    let tree = parser.parse(&wrapped, None).ok_or_else(|| SandboxError::SyntaxInvalid {
        message: "program could not be parsed".to_string(),
        hint: None,
    })?;

    if !tree.root_node().has_error() {
        return Ok(());
    }

    let mut problems = Vec::new();
    collect_problems(tree.root_node(), wrapped.as_bytes(), &mut problems);
    let message = problems
        .first()
        .cloned()
        .unwrap_or_else(|| "program could not be parsed".to_string());

    Err(SandboxError::SyntaxInvalid {
        message,
        hint: hint_for(code),
    })
}

fn collect_problems(node: Node, source: &[u8], out: &mut Vec<String>) {
    if out.len() >= MAX_REPORTED_PROBLEMS {
        return;
    }
    // Row 0 is the wrapper line; user code starts on row 1.
    let line = node.start_position().row.max(1);

    if node.is_missing() {
        out.push(format!("missing '{}' at line {line}", node.kind()));
        return;
    }
    if node.is_error() {
        let snippet = node
            .utf8_text(source)
            .unwrap_or("")
            .chars()
            .take(40)
            .collect::<String>();
        let snippet = snippet.trim();
        if snippet.is_empty() {
            out.push(format!("unexpected end of input at line {line}"));
        } else {
            out.push(format!("unexpected token near '{snippet}' at line {line}"));
        }
        return;
    }
    if node.has_error() {
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                collect_problems(child, source, out);
            }
        }
    }
}

// Cheap surface scan used only for advice. Tracks string and comment state
// so brackets inside literals do not skew the counts.
struct SurfaceScan {
    paren_open: usize,
    paren_close: usize,
    brace_open: usize,
    brace_close: usize,
    bracket_open: usize,
    bracket_close: usize,
    unterminated_string: Option<char>,
}

fn hint_for(code: &str) -> Option<String> {
    let scan = scan_surface(code);
    if let Some(quote) = scan.unterminated_string {
        return Some(format!("a string starting with {quote} is never closed"));
    }
    if scan.brace_open != scan.brace_close {
        return Some(format!(
            "unbalanced braces: {} '{{' vs {} '}}'",
            scan.brace_open, scan.brace_close
        ));
    }
    if scan.paren_open != scan.paren_close {
        return Some(format!(
            "unbalanced parentheses: {} '(' vs {} ')'",
            scan.paren_open, scan.paren_close
        ));
    }
    if scan.bracket_open != scan.bracket_close {
        return Some(format!(
            "unbalanced brackets: {} '[' vs {} ']'",
            scan.bracket_open, scan.bracket_close
        ));
    }
    None
}

fn scan_surface(code: &str) -> SurfaceScan {
    enum State {
        Normal,
        LineComment,
        BlockComment,
        Str(char),
        Template,
    }

    let mut scan = SurfaceScan {
        paren_open: 0,
        paren_close: 0,
        brace_open: 0,
        brace_close: 0,
        bracket_open: 0,
        bracket_close: 0,
        unterminated_string: None,
    };

    let mut state = State::Normal;
    let mut escaped = false;
    let mut prev = '\0';

    for c in code.chars() {
        match state {
            State::Normal => match c {
                '(' => scan.paren_open += 1,
                ')' => scan.paren_close += 1,
                '{' => scan.brace_open += 1,
                '}' => scan.brace_close += 1,
                '[' => scan.bracket_open += 1,
                ']' => scan.bracket_close += 1,
                '"' | '\'' => state = State::Str(c),
                '`' => state = State::Template,
                '/' if prev == '/' => state = State::LineComment,
                '*' if prev == '/' => state = State::BlockComment,
                _ => {}
            },
            State::LineComment => {
                if c == '\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '/' && prev == '*' {
                    state = State::Normal;
                }
            }
            State::Str(quote) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote || c == '\n' {
                    // A newline ends a normal string either way; the parser
                    // reports the real error, the scan only shapes the hint.
                    state = State::Normal;
                }
            }
            State::Template => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '`' {
                    state = State::Normal;
                }
            }
        }
        prev = c;
    }

    match state {
        State::Str(quote) => scan.unterminated_string = Some(quote),
        State::Template => scan.unterminated_string = Some('`'),
        _ => {}
    }
    scan
}
