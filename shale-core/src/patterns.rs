//! Shell glob patterns.
//!
//! Patterns are translated into anchored regular expressions (`*` → `.*`,
//! `?` → `.`, bracket classes passed through) and matched against directory
//! entries. Glob expansion walks the filesystem one path component at a
//! time; a pattern with no matches keeps its literal text.

use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Whether the word contains unquoted glob metacharacters.
pub fn is_glob_pattern(word: &str) -> bool {
    word.contains(['*', '?']) || (word.contains('[') && word.contains(']'))
}

/// Translates a single glob component into an anchored regex.
fn component_to_regex(pattern: &str) -> Result<fancy_regex::Regex, Error> {
    let mut regex_str = String::with_capacity(pattern.len() * 2 + 2);
    regex_str.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            '[' => {
                // Pass a bracket class through, mapping leading '!' to '^'.
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if matches!(c, '\\') {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if closed {
                    class.push(']');
                    regex_str.push_str(&class);
                } else {
                    // An unclosed class matches literally.
                    regex_str.push_str(&fancy_regex::escape(&class));
                }
            }
            c if "\\^$.|+()[]{}".contains(c) => {
                regex_str.push('\\');
                regex_str.push(c);
            }
            c => regex_str.push(c),
        }
    }

    regex_str.push('$');

    fancy_regex::Regex::new(&regex_str).map_err(|e| {
        Error::new(
            ErrorKind::InvalidArgs,
            format!("invalid glob pattern '{pattern}': {e}"),
        )
    })
}

/// Expands a glob pattern against the filesystem, resolving relative
/// patterns against `base`. Results are sorted; an empty expansion returns
/// an empty vector (the caller keeps the literal word).
pub fn expand_glob(base: &Path, pattern: &str) -> Result<Vec<String>, Error> {
    let absolute = pattern.starts_with('/');

    let mut candidates: Vec<PathBuf> = if absolute {
        vec![PathBuf::from("/")]
    } else {
        vec![base.to_path_buf()]
    };

    let mut had_pattern = false;

    for component in pattern.split('/').filter(|c| !c.is_empty()) {
        if component == "." || component == ".." {
            for c in &mut candidates {
                c.push(component);
            }
            continue;
        }

        if !is_glob_pattern(component) {
            for c in &mut candidates {
                c.push(component);
            }
            candidates.retain(|c| c.exists() || c.symlink_metadata().is_ok());
            continue;
        }

        had_pattern = true;
        let regex = component_to_regex(component)?;
        let mut next = vec![];

        for dir in &candidates {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                // Dotfiles require an explicit leading dot.
                if name.starts_with('.') && !component.starts_with('.') {
                    continue;
                }
                if regex.is_match(&name).unwrap_or(false) {
                    next.push(dir.join(name.as_ref()));
                }
            }
        }

        candidates = next;
        if candidates.is_empty() {
            return Ok(vec![]);
        }
    }

    if !had_pattern {
        // Nothing to expand.
        return Ok(vec![pattern.to_string()]);
    }

    let mut results: Vec<String> = candidates
        .into_iter()
        .map(|p| {
            if absolute {
                p.to_string_lossy().into_owned()
            } else {
                p.strip_prefix(base)
                    .map(|rel| rel.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| p.to_string_lossy().into_owned())
            }
        })
        .collect();
    results.sort();

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_glob_metacharacters() {
        assert!(is_glob_pattern("*.rs"));
        assert!(is_glob_pattern("file?.txt"));
        assert!(is_glob_pattern("[abc].txt"));
        assert!(!is_glob_pattern("plain.txt"));
        assert!(!is_glob_pattern("dir/file"));
    }

    #[test]
    fn component_regex_matches_expected_names() {
        let re = component_to_regex("*.rs").unwrap();
        assert!(re.is_match("main.rs").unwrap());
        assert!(!re.is_match("main.rb").unwrap());

        let re = component_to_regex("file?.txt").unwrap();
        assert!(re.is_match("file1.txt").unwrap());
        assert!(!re.is_match("file12.txt").unwrap());

        let re = component_to_regex("[ab]x").unwrap();
        assert!(re.is_match("ax").unwrap());
        assert!(!re.is_match("cx").unwrap());
    }

    #[test]
    fn expansion_walks_directories() {
        let dir = std::env::temp_dir().join(format!("shale-glob-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("sub")).unwrap();
        std::fs::write(dir.join("one.txt"), "").unwrap();
        std::fs::write(dir.join("two.txt"), "").unwrap();
        std::fs::write(dir.join("sub").join("three.txt"), "").unwrap();

        let mut results = expand_glob(&dir, "*.txt").unwrap();
        results.sort();
        assert_eq!(results, vec!["one.txt", "two.txt"]);

        let results = expand_glob(&dir, "sub/*.txt").unwrap();
        assert_eq!(results, vec!["sub/three.txt"]);

        // No matches: empty result, caller keeps the literal.
        let results = expand_glob(&dir, "*.nope").unwrap();
        assert!(results.is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }
}
