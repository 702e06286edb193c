//! Escaping helpers for Ninja output and for the fox escape syntax.

/// Escape a value for a Ninja path position: `$` doubles, and `:`, space and
/// newline get a `$` prefix.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '$' => out.push_str("$$"),
            ':' => out.push_str("$:"),
            ' ' => out.push_str("$ "),
            '\n' => out.push_str("$\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a value for the right-hand side of a Ninja assignment, where only
/// `$` needs doubling.
pub fn escape_simple(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape every element and join with single spaces.
pub fn escape_join<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values
        .into_iter()
        .map(|v| escape(v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replace the base escapes `$|`, `$ `, `$:`, `$(`, `$)` with their literal
/// characters. Scans left to right, so `$$|` keeps its first `$` and
/// unescapes the rest.
pub fn unescape_base(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$'
            && i + 1 < bytes.len()
            && matches!(bytes[i + 1], b'|' | b' ' | b':' | b'(' | b')')
        {
            out.push(bytes[i + 1] as char);
            i += 2;
        } else {
            let c = value[i..].chars().next().unwrap();
            out.push(c);
            i += c.len_utf8();
        }
    }
    out
}

/// Split on runs of spaces preceded by an even number of `$` signs.
///
/// An odd run means the last `$` escapes the space, so no split happens
/// there. On a split, the even `$` run is consumed together with the spaces,
/// mirroring how the escape pairs collapse everywhere else. Like a plain
/// split, n separators yield n + 1 tokens, empties included.
pub fn split_non_escaped_spaces(value: &str) -> Vec<String> {
    let bytes = value.as_bytes();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i;
            while i < bytes.len() && bytes[i] == b'$' {
                i += 1;
            }
            let run = i - start;
            if run % 2 == 0 && i < bytes.len() && bytes[i] == b' ' {
                // separator: drop the even run, consume the spaces
                while i < bytes.len() && bytes[i] == b' ' {
                    i += 1;
                }
                tokens.push(std::mem::take(&mut current));
            } else {
                current.push_str(&value[start..i]);
                // an escaped space right after an odd run stays in the token
                if run % 2 == 1 && i < bytes.len() && bytes[i] == b' ' {
                    current.push(' ');
                    i += 1;
                }
            }
        } else if bytes[i] == b' ' {
            while i < bytes.len() && bytes[i] == b' ' {
                i += 1;
            }
            tokens.push(std::mem::take(&mut current));
        } else {
            let c = value[i..].chars().next().unwrap();
            current.push(c);
            i += c.len_utf8();
        }
    }
    tokens.push(current);
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_path_position() {
        assert_eq!(escape("a b:c$d"), "a$ b$:c$$d");
    }

    #[test]
    fn escape_assignment_rhs() {
        assert_eq!(escape_simple("a b:c$d"), "a b:c$$d");
    }

    #[test]
    fn escape_round_trip() {
        // un-escaping works the way eval does: base escapes first, then the
        // doubled dollars collapse
        let unescape = |v: &str| unescape_base(v).replace("$$", "$");
        for v in ["plain", "with space", "col:on", "$cost", "$ ", "a$$b", "$(paren)"] {
            assert_eq!(unescape(&escape(v)), v);
            assert_eq!(unescape(&escape_simple(v)), v);
        }
    }

    #[test]
    fn unescape_base_keeps_escaped_dollar() {
        assert_eq!(unescape_base("$$:"), "$:");
        assert_eq!(unescape_base("a$ b"), "a b");
        assert_eq!(unescape_base("a$(b$)"), "a(b)");
    }

    #[test]
    fn split_on_plain_spaces() {
        assert_eq!(split_non_escaped_spaces("a b  c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn split_keeps_escaped_space() {
        assert_eq!(split_non_escaped_spaces("a$ b c"), vec!["a$ b", "c"]);
    }

    #[test]
    fn split_consumes_even_dollar_run() {
        assert_eq!(split_non_escaped_spaces("a$$ b"), vec!["a", "b"]);
        assert_eq!(split_non_escaped_spaces("a$$$ b"), vec!["a$$$ b"]);
    }

    #[test]
    fn split_preserves_empty_tokens() {
        assert_eq!(split_non_escaped_spaces(" a "), vec!["", "a", ""]);
    }
}
