//! Pattern resolution against the filesystem and the generated-file registry.
//!
//! Given input patterns, this module enumerates matching real files under
//! the lookup path and matching entries of the generated registry, then
//! materializes output paths by substituting the captured groups into the
//! output templates. Results are sorted so the emitted manifest is
//! byte-identical between runs.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use fancy_regex::Regex;

use crate::error::Error;
use crate::pattern;

/// Folder path (always ending in `/`) to the set of file names inside it.
pub type FileSet = BTreeMap<String, BTreeSet<String>>;

// Meta patterns over generated regex text. The translation in `pattern`
// produces a known shape, so the folder part and the recursive-glob region
// can be recognized and rewritten textually.
static RE_FOLDER_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\A((?:\(\[\^/\]\*\)(?:\(\?\![\w\|]+\))?\(\[\^/\]\*\)|(?:[^\r\n(\["\\]|\\.))+)(\\/|/|\\).*$"#,
    )
    .unwrap()
});
static RE_NON_ESCAPED_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<!\\)\\(.)").unwrap());
static RE_CAPTURE_GROUP_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<!\\)\\(p?)(\d+)").unwrap());
static RE_PATTERN_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?<!\[\^)/").unwrap());
static RE_RECURSIVE_GLOB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(\[\^/\]\*\)(\(\?\![\w\|]+\))?\(\[\^/\]\*\)\\/").unwrap()
});
static RE_RECURSIVE_GLOB_NOSLASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A\(\[\^/\]\*\)(\(\?\![\w\|]+\))?\(\[\^/\]\*\)").unwrap()
});

/// Directory of `filename` relative to the working directory, normalized to
/// forward slashes with a trailing one; empty for the working directory
/// itself.
pub fn rel_dir(filename: &str) -> String {
    let parent = match Path::new(filename).parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => return String::new(),
    };
    let parent = if parent.is_absolute() {
        match std::env::current_dir()
            .ok()
            .and_then(|cwd| parent.strip_prefix(&cwd).ok().map(Path::to_path_buf))
        {
            Some(p) => p,
            None => parent.to_path_buf(),
        }
    } else {
        parent.to_path_buf()
    };
    let dir = parent.to_string_lossy().replace('\\', "/");
    if dir.is_empty() || dir == "." {
        return String::new();
    }
    format!("{dir}/")
}

/// Lexical path normalization: collapses `//` and `.` components, resolves
/// `..` where possible, converts backslashes to forward slashes.
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&"..") | None) {
                    if !absolute {
                        parts.push("..");
                    }
                } else {
                    parts.pop();
                }
            }
            _ => parts.push(seg),
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

fn unescape(text: &str) -> String {
    RE_NON_ESCAPED_CHAR.replace_all(text, "$1").into_owned()
}

/// Resolve input patterns to concrete files and materialize output patterns
/// from the captured groups.
///
/// Inputs resolve against both real files under `rel_path` and the
/// generated registry; literal entries pass through with the `rel_path`
/// prefix. Outputs are produced once per (output template, input match)
/// pair. Either side may be absent.
pub fn find_files(
    inputs: Option<&[String]>,
    outputs: Option<&[String]>,
    rel_path: &str,
    generated: &FileSet,
    excluded_dirs: &BTreeSet<String>,
) -> Result<(Option<Vec<String>>, Option<Vec<String>>), Error> {
    let mut rec_groups: BTreeSet<usize> = BTreeSet::new();
    let mut matched: Vec<Vec<Option<String>>> = Vec::new();

    let resolved_inputs = match inputs {
        None => None,
        Some(inputs) => {
            let mut result = Vec::new();
            for input in inputs {
                let Some(regex_text) = pattern::match_regex(input, &mut rec_groups) else {
                    result.push(format!("{rel_path}{input}"));
                    continue;
                };

                let lookup = if rel_path.is_empty() { "./" } else { rel_path };
                let mut real_folders = vec![lookup.to_string()];
                let mut gen_folders: BTreeSet<String> = BTreeSet::from([lookup.to_string()]);

                if let Some(caps) = RE_FOLDER_PART.captures(&regex_text)? {
                    let folder_part = format!(
                        "{}{}",
                        caps.get(1).map(|m| m.as_str()).unwrap_or(""),
                        caps.get(2).map(|m| m.as_str()).unwrap_or(""),
                    );
                    let folder_part = unescape(&folder_part);
                    if folder_part.contains('\\') {
                        return Err(Error::BackslashInPath {
                            path: input.clone(),
                        });
                    }
                    (real_folders, gen_folders) =
                        glob_folders(&folder_part, lookup, generated, excluded_dirs)?;
                }

                // union of real files and generated files, sorted for
                // reproducible output
                let mut all_files: BTreeSet<String> = BTreeSet::new();
                for real_folder in &real_folders {
                    let root = real_folder
                        .strip_prefix(lookup)
                        .unwrap_or(real_folder.as_str());
                    let Ok(entries) = fs::read_dir(real_folder) else {
                        continue;
                    };
                    for entry in entries.flatten() {
                        let is_file = fs::metadata(entry.path())
                            .map(|m| m.is_file())
                            .unwrap_or(false);
                        if is_file {
                            let name = entry.file_name().to_string_lossy().into_owned();
                            all_files.insert(format!("{root}{name}"));
                        }
                    }
                }
                for gen_folder in &gen_folders {
                    let check = if gen_folder.len() > 2 && gen_folder.starts_with("./") {
                        &gen_folder[2..]
                    } else {
                        gen_folder.as_str()
                    };
                    if let Some(names) = generated.get(check) {
                        let root = gen_folder
                            .strip_prefix(lookup)
                            .unwrap_or(gen_folder.as_str());
                        for name in names {
                            all_files.insert(format!("{root}{name}"));
                        }
                    }
                }

                // while capturing ** we only capture an optional `*/` run, so
                // files in the root folder match as well; directory pruning
                // already happened during folder expansion
                let relaxed = RE_RECURSIVE_GLOB
                    .replace_all(&regex_text, "(?:(.*)/)?")
                    .into_owned();
                // a wildcard that starts with ./ means the local folder
                let relaxed = relaxed.strip_prefix(r"\.\/").unwrap_or(&relaxed);

                let file_re = pattern::compile(relaxed)?;
                for file in &all_files {
                    if let Some(caps) = file_re.captures(file)? {
                        result.push(format!("{rel_path}{file}"));
                        matched.push(
                            caps.iter()
                                .skip(1)
                                .map(|m| m.map(|m| m.as_str().to_string()))
                                .collect(),
                        );
                    }
                }
            }
            Some(result)
        }
    };

    let resolved_outputs = match outputs {
        None => None,
        Some(outputs) => {
            let mut result = Vec::new();
            for output in outputs {
                let Some(template) = pattern::subst_template(output, &mut rec_groups) else {
                    result.push(format!("{rel_path}{output}"));
                    continue;
                };
                for caps in &matched {
                    let file = substitute_refs(&template, caps);
                    let file = unescape(&file);
                    // an empty recursive capture leaves a double slash behind
                    let file = file.replace("//", "/");
                    let file = file.trim_start_matches('/');
                    result.push(format!("{rel_path}{file}"));
                }
            }
            Some(result.iter().map(|f| normalize_path(f)).collect())
        }
    };

    let resolved_inputs =
        resolved_inputs.map(|v| v.iter().map(|f| normalize_path(f)).collect());
    Ok((resolved_inputs, resolved_outputs))
}

fn substitute_refs(template: &str, caps: &[Option<String>]) -> String {
    RE_CAPTURE_GROUP_REF
        .replace_all(template, |m: &fancy_regex::Captures<'_>| {
            let keep_slashes = m.get(1).map(|g| g.as_str()) == Some("p");
            let index: usize = m
                .get(2)
                .and_then(|g| g.as_str().parse().ok())
                .unwrap_or(0);
            if index >= 1 && index <= caps.len() {
                match &caps[index - 1] {
                    Some(text) if keep_slashes => text.clone(),
                    Some(text) => text.replace('/', "_"),
                    None => String::new(),
                }
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Expand the folder part of a pattern into candidate folders, walking the
/// real directory tree and the generated registry with identical pruning.
/// Returned folders all end with `/`; some may point at locations that do
/// not exist, which the file enumeration simply skips.
fn glob_folders(
    folder_pattern: &str,
    base_path: &str,
    generated: &FileSet,
    excluded_dirs: &BTreeSet<String>,
) -> Result<(Vec<String>, BTreeSet<String>), Error> {
    debug_assert!(folder_pattern.ends_with('/'));

    let base = base_path.trim_end_matches('/');
    let mut real_folders = vec![base.to_string()];
    let mut gen_folders: BTreeSet<String> = BTreeSet::from([base.to_string()]);
    let folder_pattern = folder_pattern.strip_prefix("./").unwrap_or(folder_pattern);

    let mut segments = Vec::new();
    for part in RE_PATTERN_SPLIT.split(folder_pattern) {
        segments.push(part?.to_string());
    }

    for segment in &segments {
        if let Some(caps) = RE_RECURSIVE_GLOB_NOSLASH.captures(segment)? {
            let filter_re = match caps.get(1) {
                Some(filter) => Some(Regex::new(&format!("^{}.*$", filter.as_str()))?),
                None => None,
            };

            let mut new_real = Vec::new();
            for real in &real_folders {
                new_real.push(real.clone());
                walk_real_dirs(real, excluded_dirs, filter_re.as_ref(), &mut new_real)?;
            }
            real_folders = new_real;

            let mut new_gen = BTreeSet::new();
            for folder in &gen_folders {
                walk_generated_tree(folder, generated, excluded_dirs, filter_re.as_ref(), &mut new_gen)?;
            }
            gen_folders = new_gen;
        } else {
            real_folders = real_folders
                .iter()
                .map(|p| format!("{p}/{segment}"))
                .collect();
            gen_folders = gen_folders
                .iter()
                .map(|p| format!("{p}/{segment}"))
                .collect();
        }
    }

    Ok((real_folders, gen_folders))
}

fn walk_real_dirs(
    base: &str,
    excluded: &BTreeSet<String>,
    filter: Option<&Regex>,
    out: &mut Vec<String>,
) -> Result<(), Error> {
    let Ok(entries) = fs::read_dir(base) else {
        return Ok(());
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    for name in names {
        if excluded.contains(&name) {
            continue;
        }
        if let Some(re) = filter {
            if !re.is_match(&name)? {
                continue;
            }
        }
        let path = format!("{base}/{name}");
        out.push(path.clone());
        walk_real_dirs(&path, excluded, filter, out)?;
    }
    Ok(())
}

/// The generated tree exists only as registry keys, so walking it means
/// prefix-scanning the keys and pruning segment by segment the same way the
/// real walk prunes directories.
fn walk_generated_tree(
    base: &str,
    generated: &FileSet,
    excluded: &BTreeSet<String>,
    filter: Option<&Regex>,
    out: &mut BTreeSet<String>,
) -> Result<(), Error> {
    out.insert(base.to_string());
    let canon = {
        let stripped = base.strip_prefix("./").unwrap_or(base);
        if stripped == "." { "" } else { stripped }
    };
    for key in generated.keys() {
        // keys always end with '/'; "./" is the lookup root itself
        let rest = if key == "./" {
            continue;
        } else if canon.is_empty() {
            Some(key.as_str())
        } else if let Some(r) = key.strip_prefix(canon) {
            match r.strip_prefix('/') {
                Some(r) => Some(r),
                None if r.is_empty() => Some(""),
                None => None, // not a segment boundary
            }
        } else {
            None
        };
        let Some(rest) = rest else { continue };
        let mut root = base.to_string();
        for seg in rest.split('/').filter(|s| !s.is_empty()) {
            if excluded.contains(seg) {
                break;
            }
            if let Some(re) = filter {
                if !re.is_match(seg)? {
                    break;
                }
            }
            root = format!("{root}/{seg}");
            out.insert(root.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots_and_doubles() {
        assert_eq!(normalize_path("a//b/./c"), "a/b/c");
        assert_eq!(normalize_path("a/b/../c"), "a/c");
        assert_eq!(normalize_path("./a"), "a");
        assert_eq!(normalize_path("."), ".");
        assert_eq!(normalize_path("a\\b"), "a/b");
    }

    #[test]
    fn generated_walk_prunes_excluded() {
        let mut generated = FileSet::new();
        generated.insert("out/sub/".to_string(), BTreeSet::from(["a.o".to_string()]));
        generated.insert("skip/sub/".to_string(), BTreeSet::from(["b.o".to_string()]));
        let excluded = BTreeSet::from(["skip".to_string()]);
        let mut out = BTreeSet::new();
        walk_generated_tree(".", &generated, &excluded, None, &mut out).unwrap();
        assert!(out.contains("./out/sub"));
        assert!(!out.iter().any(|f| f.contains("skip")));
    }

    #[test]
    fn generated_walk_respects_segment_boundaries() {
        let mut generated = FileSet::new();
        generated.insert("subzero/".to_string(), BTreeSet::from(["a.o".to_string()]));
        let mut out = BTreeSet::new();
        walk_generated_tree("./sub", &generated, &BTreeSet::new(), None, &mut out).unwrap();
        assert_eq!(out, BTreeSet::from(["./sub".to_string()]));
    }
}
