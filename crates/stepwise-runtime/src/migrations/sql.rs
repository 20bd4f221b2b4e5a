use std::iter::Peekable;
use std::str::Chars;

/// Lexical context of the splitter.
enum Context {
    Code,
    Quoted(char),
    LineComment,
    BlockComment(usize),
    DollarQuoted(String),
}

/// Split SQL into individual statements.
///
/// Semicolons inside string literals, quoted identifiers, `--` and `/* */`
/// comments, and `$$ ... $$` or `$tag$ ... $tag$` bodies do not end a
/// statement. Returned statements are trimmed, have no trailing `;` and no
/// leading comments.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut context = Context::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        context = match context {
            Context::Code => match c {
                '\'' | '"' => Context::Quoted(c),
                '-' if next_is(&mut chars, &mut current, '-') => Context::LineComment,
                '/' if next_is(&mut chars, &mut current, '*') => Context::BlockComment(1),
                '$' => match read_dollar_tag(&mut chars, &mut current) {
                    Some(tag) => Context::DollarQuoted(tag),
                    None => Context::Code,
                },
                ';' => {
                    push_statement(&mut statements, &current);
                    current.clear();
                    Context::Code
                }
                _ => Context::Code,
            },
            // A doubled quote closes and immediately reopens, which is
            // equivalent to the escape.
            Context::Quoted(quote) if c == quote => Context::Code,
            Context::LineComment if c == '\n' => Context::Code,
            Context::BlockComment(depth) => {
                if c == '*' && next_is(&mut chars, &mut current, '/') {
                    if depth == 1 {
                        Context::Code
                    } else {
                        Context::BlockComment(depth - 1)
                    }
                } else if c == '/' && next_is(&mut chars, &mut current, '*') {
                    Context::BlockComment(depth + 1)
                } else {
                    Context::BlockComment(depth)
                }
            }
            Context::DollarQuoted(open) if c == '$' => {
                match read_dollar_tag(&mut chars, &mut current) {
                    Some(tag) if tag == open => Context::Code,
                    _ => Context::DollarQuoted(open),
                }
            }
            other => other,
        };
    }

    push_statement(&mut statements, &current);
    statements
}

/// Consume the next character if it is `expected`.
fn next_is(chars: &mut Peekable<Chars<'_>>, current: &mut String, expected: char) -> bool {
    if chars.peek() == Some(&expected) {
        current.push(expected);
        chars.next();
        true
    } else {
        false
    }
}

/// Read the rest of a `$tag$` delimiter after its opening `$`.
fn read_dollar_tag(chars: &mut Peekable<Chars<'_>>, current: &mut String) -> Option<String> {
    let mut tag = String::from("$");
    while let Some(&next) = chars.peek() {
        if next == '$' {
            tag.push(next);
            current.push(next);
            chars.next();
            return Some(tag);
        } else if next.is_alphanumeric() || next == '_' {
            tag.push(next);
            current.push(next);
            chars.next();
        } else {
            break;
        }
    }
    None
}

fn push_statement(statements: &mut Vec<String>, raw: &str) {
    let stmt = strip_leading_comments(raw.trim().trim_end_matches(';').trim());
    if !stmt.is_empty() {
        statements.push(stmt.to_string());
    }
}

/// Drop `--` and `/* */` comments that precede the statement text.
fn strip_leading_comments(stmt: &str) -> &str {
    let mut rest = stmt;
    loop {
        let trimmed = rest.trim_start();
        if trimmed.starts_with("--") {
            rest = match trimmed.find('\n') {
                Some(idx) => &trimmed[idx + 1..],
                None => "",
            };
        } else if trimmed.starts_with("/*") {
            rest = skip_block_comment(trimmed);
        } else {
            return trimmed;
        }
    }
}

/// Text after the (possibly nested) block comment that opens `text`.
fn skip_block_comment(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth = depth.saturating_sub(1);
                i += 2;
                if depth == 0 {
                    return &text[i..];
                }
            }
            _ => i += 1,
        }
    }
    ""
}
