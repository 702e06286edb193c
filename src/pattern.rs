//! Wildcard pattern compilation.
//!
//! A user pattern is translated twice over the same walk: once into a match
//! regex where every wildcard is a capture group (used on inputs), and once
//! into a back-substitution template of `\N` references (used on outputs).
//! Raw `r"…"` patterns bypass translation, quoted `"…"` patterns shed their
//! quotes first, and a pattern without any wildcard character is a literal.

use std::collections::BTreeSet;

use fancy_regex::Regex;

use crate::error::Error;

/// Translate a pattern into an anchored match regex.
///
/// Returns `None` for literal patterns. Wildcards become capture groups:
/// `*` matches within one path segment, `**` emits two adjacent groups whose
/// index is recorded in `rec_groups` (segment-crossing semantics are applied
/// by the resolver), `?` matches one character, `!(X)` is a negative
/// lookahead over a segment and `[…]` is a character class.
pub fn match_regex(pattern: &str, rec_groups: &mut BTreeSet<usize>) -> Option<String> {
    translate(pattern, false, rec_groups)
}

/// Translate a pattern into a `\N` back-substitution template.
///
/// `**` becomes `\pN` (the capture may keep its slashes); a plain `*` or `?`
/// becomes `\N`. When the template has fewer wildcards than the inputs had
/// recursive groups, each pending recursive group is prepended as `\N_` so
/// it still appears in the flattened filename.
pub fn subst_template(pattern: &str, rec_groups: &mut BTreeSet<usize>) -> Option<String> {
    translate(pattern, true, rec_groups)
}

/// Compile generated regex text with the prefix-match anchoring used
/// everywhere in the resolver.
pub fn compile(regex_text: &str) -> Result<Regex, Error> {
    Ok(Regex::new(&format!("(?ms)\\A(?:{regex_text})"))?)
}

fn translate(pattern: &str, replace_groups: bool, rec_groups: &mut BTreeSet<usize>) -> Option<String> {
    if let Some(raw) = pattern.strip_prefix("r\"") {
        return Some(raw.strip_suffix('"').unwrap_or(raw).to_string());
    }
    let mut pattern = pattern;
    if let Some(quoted) = pattern.strip_prefix('"') {
        pattern = quoted.strip_suffix('"').unwrap_or(quoted);
    }

    if !pattern.contains(['!', '*', '?', '[']) {
        return None;
    }

    let chars: Vec<char> = pattern.chars().collect();
    let n = chars.len();
    let mut i = 0;
    let mut groups = 1usize;
    let mut res = String::new();

    while i < n {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                if i < n && chars[i] == '*' {
                    if replace_groups {
                        // p means the substituted capture may contain slashes
                        res.push_str(&format!("\\p{groups}"));
                    } else {
                        res.push_str("([^/]*)([^/]*)");
                        rec_groups.insert(groups);
                    }
                    i += 1;
                } else if replace_groups {
                    // recursive input groups with no wildcard of their own
                    // get flattened into the name as a \N_ prefix
                    while rec_groups.contains(&groups) {
                        res.push_str(&format!("\\{groups}_"));
                        groups += 1;
                    }
                    res.push_str(&format!("\\{groups}"));
                } else {
                    res.push_str("([^/]*)");
                }
                groups += 1;
            }
            '?' => {
                if replace_groups {
                    res.push_str(&format!("\\{groups}"));
                } else {
                    res.push_str("([^/])");
                }
                groups += 1;
            }
            _ if replace_groups => res.push(c),
            '!' => {
                let mut j = i;
                if j < n && chars[j] == '(' {
                    j += 1;
                }
                while j < n && chars[j] != ')' {
                    j += 1;
                }
                if j >= n {
                    res.push_str("\\!");
                } else {
                    let stuff: String = chars
                        .get(i + 1..j)
                        .unwrap_or_default()
                        .iter()
                        .collect::<String>()
                        .replace('\\', "\\\\");
                    i = j + 1;
                    res.push_str(&format!("(?!{stuff})([^/]*)"));
                }
            }
            '[' => {
                let mut j = i;
                if j < n && chars[j] == '!' {
                    j += 1;
                }
                if j < n && chars[j] == ']' {
                    j += 1;
                }
                while j < n && chars[j] != ']' {
                    j += 1;
                }
                if j >= n {
                    res.push_str("\\[");
                } else {
                    let mut stuff: String =
                        chars[i..j].iter().collect::<String>().replace('\\', "\\\\");
                    i = j + 1;
                    if let Some(negated) = stuff.strip_prefix('!') {
                        stuff = format!("^{negated}");
                    } else if stuff.starts_with('^') {
                        stuff = format!("\\{stuff}");
                    }
                    res.push_str(&format!("([{stuff}])"));
                }
            }
            _ => push_escaped(&mut res, c),
        }
    }

    if replace_groups {
        Some(res)
    } else {
        Some(format!("{res}\\z"))
    }
}

fn push_escaped(res: &mut String, c: char) {
    if c.is_ascii() && !c.is_ascii_alphanumeric() && c != '_' {
        res.push('\\');
    }
    res.push(c);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str) -> Option<String> {
        match_regex(pattern, &mut BTreeSet::new())
    }

    #[test]
    fn literal_is_none() {
        assert_eq!(matches("src/main.c"), None);
        assert_eq!(matches("plain_name"), None);
    }

    #[test]
    fn raw_passes_through() {
        assert_eq!(matches(r#"r".*\.c""#), Some(r".*\.c".to_string()));
    }

    #[test]
    fn star_is_one_segment_group() {
        assert_eq!(matches("*.c"), Some(r"([^/]*)\.c\z".to_string()));
    }

    #[test]
    fn double_star_records_recursive_group() {
        let mut rec = BTreeSet::new();
        let regex = match_regex("**/*.c", &mut rec).unwrap();
        assert_eq!(regex, r"([^/]*)([^/]*)\/([^/]*)\.c\z");
        assert_eq!(rec.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn question_and_class() {
        assert_eq!(matches("a?.c"), Some(r"a([^/])\.c\z".to_string()));
        assert_eq!(matches("[abc].c"), Some(r"([abc])\.c\z".to_string()));
        assert_eq!(matches("[!abc].c"), Some(r"([^abc])\.c\z".to_string()));
    }

    #[test]
    fn negative_segment_filter() {
        assert_eq!(
            matches("!(bad)*.c"),
            Some(r"(?!bad)([^/]*)([^/]*)\.c\z".to_string())
        );
    }

    #[test]
    fn subst_plain_wildcard() {
        let mut rec = BTreeSet::new();
        assert_eq!(
            subst_template("*.o", &mut rec),
            Some(r"\1.o".to_string())
        );
    }

    #[test]
    fn subst_prepends_recursive_groups() {
        // input was **/*.c, output *.o: the recursive capture gets flattened
        // in front of the plain one
        let mut rec = BTreeSet::from([1]);
        assert_eq!(
            subst_template("*.o", &mut rec),
            Some(r"\1_\2.o".to_string())
        );
    }

    #[test]
    fn subst_recursive_keeps_slashes() {
        let mut rec = BTreeSet::from([1]);
        assert_eq!(
            subst_template("**/*.o", &mut rec),
            Some(r"\p1/\2.o".to_string())
        );
    }

    #[test]
    fn compiled_regex_matches_from_start_only() {
        let regex = compile(&matches("*.c").unwrap()).unwrap();
        assert!(regex.is_match("main.c").unwrap());
        assert!(!regex.is_match("main.cpp").unwrap());
        assert!(!regex.is_match("dir/main.c").unwrap());
    }
}
