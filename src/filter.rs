use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::paths;

/// Patterns that are always ignored: VCS metadata, editor artifacts, the
/// config file itself and dependency directories.
static DEFAULT_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\.git",
        r"\.hg",
        r"\.bzr",
        r"\.svn",
        r"_darcs",
        r"CVS",
        r"\.sublime-(project|workspace)",
        r"\.DS_Store",
        r"\.sass-cache",
        r"Thumbs\.db",
        r"desktop\.ini",
        r"config.yml",
        r"node_modules",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("default filter pattern"))
    .collect()
});

/// Filter matches project file paths against a list of ignore patterns.
#[derive(Debug, Clone)]
pub struct Filter {
    root_dir: String,
    regexes: Vec<Regex>,
    globs: Vec<glob::Pattern>,
}

impl Filter {
    /// Build a filter from inline patterns and pattern files. Pattern files
    /// hold one pattern per line; blank lines and `#` comments are skipped.
    pub fn new(root_dir: &Path, patterns: &[String], pattern_files: &[String]) -> Result<Filter> {
        let mut merged = patterns.to_vec();
        merged.extend(patterns_from_files(pattern_files)?);

        let mut root = root_dir.to_string_lossy().replace('\\', "/");
        if !root.ends_with('/') {
            root.push('/');
        }

        let mut regexes = Vec::new();
        let mut globs = Vec::new();
        for pattern in merged {
            let pattern = pattern.trim().to_string();
            if pattern.is_empty() {
                continue;
            }

            // a pattern wrapped in slashes is a full regular expression
            if pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/') {
                let inner = &pattern[1..pattern.len() - 1];
                regexes.push(Regex::new(inner).map_err(|e| {
                    Error::Other(format!("invalid ignore pattern {:?}: {}", pattern, e))
                })?);
                continue;
            }

            // a directory pattern matches everything below it
            let mut pattern = pattern;
            if pattern.ends_with('/') {
                pattern.push('*');
            }

            // patterns are scoped to the project directory so they match
            // anything within that space
            if !pattern.starts_with('*') {
                pattern = format!("*{}", pattern);
            }

            globs.push(glob::Pattern::new(&pattern).map_err(|e| {
                Error::Other(format!("invalid ignore pattern {:?}: {}", pattern, e))
            })?);
        }

        Ok(Filter {
            root_dir: root,
            regexes,
            globs,
        })
    }

    /// Returns true if the path should be excluded from syncing.
    pub fn matches(&self, path: &str) -> bool {
        if path.is_empty() || !paths::path_in_project(&self.root_dir, path) {
            return true;
        }

        for regex in DEFAULT_REGEXES.iter().chain(self.regexes.iter()) {
            if regex.is_match(path) {
                return true;
            }
        }

        for pattern in &self.globs {
            if pattern.matches(path) {
                return true;
            }
        }

        false
    }
}

/// Load external pattern files and scrape patterns from them.
fn patterns_from_files(files: &[String]) -> Result<Vec<String>> {
    let mut patterns = Vec::new();
    for name in files {
        let data = fs::read_to_string(name)?;
        for line in data.split('\n') {
            let line = line.trim_end_matches('\r');
            if !line.is_empty() && !line.starts_with('#') {
                patterns.push(line.to_string());
            }
        }
    }
    Ok(patterns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn filter(patterns: &[&str]) -> Filter {
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        Filter::new(Path::new("/tmp/project"), &patterns, &[]).unwrap()
    }

    #[test]
    fn test_defaults_always_match() {
        let f = filter(&[]);
        assert!(f.matches("assets/.DS_Store"));
        assert!(f.matches("templates/Thumbs.db"));
        assert!(f.matches("assets/node_modules/lib.js"));
    }

    #[test]
    fn test_outside_project_dirs_always_match() {
        let f = filter(&[]);
        assert!(f.matches(""));
        assert!(f.matches("build/out.js"));
        assert!(f.matches("/tmp/project/README.md"));
        assert!(!f.matches("assets/app.js"));
        assert!(!f.matches("/tmp/project/assets/app.js"));
    }

    #[test]
    fn test_suffix_glob_patterns() {
        let f = filter(&["*.scss"]);
        assert!(f.matches("assets/theme.scss"));
        assert!(!f.matches("assets/theme.css"));

        // a bare filename is treated as a suffix glob
        let f = filter(&["settings_schema.json"]);
        assert!(f.matches("config/settings_schema.json"));
        assert!(!f.matches("config/settings_data.json"));
    }

    #[test]
    fn test_directory_patterns() {
        let f = filter(&["locales/"]);
        assert!(f.matches("locales/en.json"));
        assert!(!f.matches("assets/locale-picker.js"));
    }

    #[test]
    fn test_regex_patterns() {
        let f = filter(&[r"/\.(txt|gif)$/"]);
        assert!(f.matches("assets/note.txt"));
        assert!(f.matches("assets/loading.gif"));
        assert!(!f.matches("assets/app.js"));
    }

    #[test]
    fn test_pattern_files_skip_comments_and_blanks() {
        let dir = TempDir::new().unwrap();
        let ignore_path = dir.path().join("ignores.txt");
        let mut file = fs::File::create(&ignore_path).unwrap();
        writeln!(file, "# comment line").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "*.map\r").unwrap();

        let f = Filter::new(
            Path::new("/tmp/project"),
            &[],
            &[ignore_path.to_string_lossy().to_string()],
        )
        .unwrap();
        assert!(f.matches("assets/app.js.map"));
        assert!(!f.matches("assets/app.js"));
    }

    #[test]
    fn test_empty_pattern_file_leaves_only_defaults() {
        let dir = TempDir::new().unwrap();
        let ignore_path = dir.path().join("empty.txt");
        fs::write(&ignore_path, "").unwrap();

        let f = Filter::new(
            Path::new("/tmp/project"),
            &[],
            &[ignore_path.to_string_lossy().to_string()],
        )
        .unwrap();
        assert!(f.matches("assets/.DS_Store"));
        assert!(!f.matches("assets/app.js"));
    }
}
