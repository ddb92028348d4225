use crate::defaults::get_builtin_ignore_patterns;
use crate::error::{AppError, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::{WalkBuilder, WalkState};
use log;
use std::path::{Component, Path};
use std::sync::{Arc, mpsc};

/// Matches everything; used for the full-repository tree.
pub const MATCH_ALL: &str = "**";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    pub use_gitignore: bool,
    pub use_builtin_ignore: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            use_builtin_ignore: true,
        }
    }
}

struct Filters {
    include: GlobSet,
    exclude: GlobSet,
    builtin: Option<GlobSet>,
}

impl Filters {
    fn excludes_dir(&self, relative_path: &Path) -> bool {
        // A directory pattern like `docs/` is compiled to `docs/**`, which only
        // matches paths below it, so probe with a child path as well.
        let probe = relative_path.join("dummy_file_for_dir_match");
        let hit = |set: &GlobSet| set.is_match(relative_path) || set.is_match(&probe);
        hit(&self.exclude) || self.builtin.as_ref().is_some_and(hit)
    }

    fn selects_file(&self, relative_path: &Path) -> bool {
        if self.exclude.is_match(relative_path) {
            log::trace!("Excluded by ignore pattern: {}", relative_path.display());
            return false;
        }
        if let Some(builtin) = &self.builtin {
            if builtin.is_match(relative_path) {
                log::trace!("Excluded by built-in ignores: {}", relative_path.display());
                return false;
            }
        }
        self.include.is_match(relative_path)
    }
}

/// Relative, forward-slash separated paths of every file under `root` that
/// matches one of `include` and none of `ignore`, sorted lexicographically.
pub fn match_paths(
    root: &Path,
    include: &[String],
    ignore: &[String],
    options: MatchOptions,
) -> Result<Vec<String>> {
    log::debug!(
        "Matching paths under {} (include: {:?}, ignore: {:?})",
        root.display(),
        include,
        ignore
    );
    if include.is_empty() {
        return Ok(Vec::new());
    }

    let filters = Arc::new(Filters {
        include: build_glob_set_from_vec(include, false)?,
        exclude: build_glob_set_from_vec(ignore, true)?,
        builtin: if options.use_builtin_ignore {
            Some(build_glob_set_from_vec(&get_builtin_ignore_patterns().common, true)?)
        } else {
            None
        },
    });

    let mut builder = WalkBuilder::new(root);
    builder.threads(rayon::current_num_threads().min(12));
    builder.hidden(false);
    builder.follow_links(false);
    builder.ignore(options.use_gitignore);
    builder.git_ignore(options.use_gitignore);
    builder.git_exclude(options.use_gitignore);
    builder.git_global(false);
    builder.require_git(false);

    let walker = builder.build_parallel();
    let (tx_matched, rx_matched) = mpsc::channel::<String>();
    let root_owned = root.to_path_buf();

    walker.run(|| {
        let tx_thread = tx_matched.clone();
        let proj_root = root_owned.clone();
        let filters = Arc::clone(&filters);

        Box::new(move |entry_result| {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Error walking directory: {}", e);
                    return WalkState::Continue;
                }
            };
            if entry.depth() == 0 {
                return WalkState::Continue;
            }
            let Some(relative_path) = pathdiff::diff_paths(entry.path(), &proj_root) else {
                log::warn!("Could not get relative path for: {}", entry.path().display());
                return WalkState::Continue;
            };
            let Some(file_type) = entry.file_type() else {
                return WalkState::Continue;
            };

            if file_type.is_dir() {
                if relative_path.components().next() == Some(Component::Normal(".git".as_ref()))
                    || filters.excludes_dir(&relative_path)
                {
                    log::trace!("Skipping directory: {}", relative_path.display());
                    return WalkState::Skip;
                }
                return WalkState::Continue;
            }

            if file_type.is_file() && filters.selects_file(&relative_path) {
                let normalized = to_forward_slashes(&relative_path);
                log::trace!("Matched: {}", normalized);
                if tx_thread.send(normalized).is_err() {
                    log::error!("Receiver dropped for matched paths, stopping walk early.");
                    return WalkState::Quit;
                }
            }
            WalkState::Continue
        })
    });
    drop(tx_matched);

    let mut matched: Vec<String> = rx_matched.into_iter().collect();
    matched.sort();
    log::info!("Matched {} files under {}", matched.len(), root.display());
    Ok(matched)
}

fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// With `unanchored_names`, a pattern without an inner `/` (such as `*.png`
/// or `node_modules/`) matches at any depth, the way `.gitignore` entries do.
fn build_glob_set_from_vec(patterns: &[String], unanchored_names: bool) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern_str in patterns {
        let mut processed_pattern = pattern_str.trim().trim_start_matches("./").to_string();
        if processed_pattern.is_empty() {
            continue;
        }
        if unanchored_names && !processed_pattern.trim_end_matches('/').contains('/') {
            processed_pattern.insert_str(0, "**/");
        }
        if processed_pattern.ends_with('/') && processed_pattern.len() > 1 {
            processed_pattern.push_str("**");
        }
        let glob = GlobBuilder::new(&processed_pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                log::error!("Invalid glob pattern \"{}\": {}", pattern_str, e);
                AppError::Glob(format!(
                    "Invalid glob pattern \"{}\" (processed as \"{}\"): {}",
                    pattern_str, processed_pattern, e
                ))
            })?;
        log::trace!(
            "Adding glob pattern: {} (processed as {})",
            pattern_str,
            processed_pattern
        );
        builder.add(glob);
    }
    builder.build().map_err(|e| {
        log::error!("Error building glob set: {}", e);
        AppError::Glob(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn selects_only_matching_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/a.ts");
        touch(dir.path(), "src/b.js");
        touch(dir.path(), "README.md");
        let matched = match_paths(
            dir.path(),
            &patterns(&["src/**/*.ts"]),
            &[],
            MatchOptions::default(),
        )
        .unwrap();
        assert_eq!(matched, vec!["src/a.ts".to_string()]);
    }

    #[test]
    fn results_are_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["z.rs", "a/b/c.rs", "a/a.rs", "m/n.rs"] {
            touch(dir.path(), rel);
        }
        let matched =
            match_paths(dir.path(), &patterns(&["**/*.rs"]), &[], MatchOptions::default()).unwrap();
        assert_eq!(matched, vec!["a/a.rs", "a/b/c.rs", "m/n.rs", "z.rs"]);
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/lib.rs");
        touch(dir.path(), "src/nested/mod.rs");
        let matched =
            match_paths(dir.path(), &patterns(&["src/*.rs"]), &[], MatchOptions::default()).unwrap();
        assert_eq!(matched, vec!["src/lib.rs"]);
    }

    #[test]
    fn ignore_patterns_win_over_includes() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/keep.rs");
        touch(dir.path(), "src/generated/skip.rs");
        touch(dir.path(), "src/skip_test.rs");
        let matched = match_paths(
            dir.path(),
            &patterns(&["src/**"]),
            &patterns(&["src/generated/", "**/*_test.rs"]),
            MatchOptions::default(),
        )
        .unwrap();
        assert_eq!(matched, vec!["src/keep.rs"]);
    }

    #[test]
    fn gitignored_files_are_excluded_even_when_included() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "app/main.py");
        touch(dir.path(), "app/secret.env");
        fs::write(dir.path().join(".gitignore"), "*.env\n").unwrap();
        let all = patterns(&["app/**"]);
        let matched = match_paths(dir.path(), &all, &[], MatchOptions::default()).unwrap();
        assert_eq!(matched, vec!["app/main.py"]);

        let without_gitignore = MatchOptions {
            use_gitignore: false,
            ..MatchOptions::default()
        };
        let matched = match_paths(dir.path(), &all, &[], without_gitignore).unwrap();
        assert_eq!(matched, vec!["app/main.py", "app/secret.env"]);
    }

    #[test]
    fn builtin_ignores_apply_unless_disabled() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Cargo.lock");
        touch(dir.path(), "node_modules/pkg/index.js");
        touch(dir.path(), "index.js");
        let all = patterns(&[MATCH_ALL]);
        let matched = match_paths(dir.path(), &all, &[], MatchOptions::default()).unwrap();
        assert_eq!(matched, vec!["index.js"]);

        let raw = MatchOptions {
            use_gitignore: true,
            use_builtin_ignore: false,
        };
        let matched = match_paths(dir.path(), &all, &[], raw).unwrap();
        assert_eq!(matched, vec!["Cargo.lock", "index.js", "node_modules/pkg/index.js"]);
    }

    #[test]
    fn builtin_ignores_match_at_any_depth() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/logo.png"), [0x89, 0x50, 0x4e, 0x47, 0xff]).unwrap();
        touch(dir.path(), "web/Cargo.lock");
        touch(dir.path(), "web/node_modules/x/i.js");
        touch(dir.path(), "web/app.js");

        let matched =
            match_paths(dir.path(), &patterns(&[MATCH_ALL]), &[], MatchOptions::default()).unwrap();
        assert_eq!(matched, vec!["web/app.js"]);

        let estimator = crate::tokens::TokenEstimator::new(1.2).unwrap();
        let records = crate::loader::load_files(dir.path(), &matched, &estimator).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn bare_name_ignores_match_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/keep.rs");
        touch(dir.path(), "src/fixtures/big.json");
        touch(dir.path(), "src/deep/generated/out.rs");
        let matched = match_paths(
            dir.path(),
            &patterns(&["src/**"]),
            &patterns(&["*.json", "generated/"]),
            MatchOptions::default(),
        )
        .unwrap();
        assert_eq!(matched, vec!["src/keep.rs"]);
    }

    #[test]
    fn no_match_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.md");
        let matched =
            match_paths(dir.path(), &patterns(&["*.xyz"]), &[], MatchOptions::default()).unwrap();
        assert!(matched.is_empty());
        assert!(match_paths(dir.path(), &[], &[], MatchOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn git_directory_is_never_listed() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), ".git/config");
        touch(dir.path(), ".env.example");
        let raw = MatchOptions {
            use_gitignore: false,
            use_builtin_ignore: false,
        };
        let matched = match_paths(dir.path(), &patterns(&[MATCH_ALL]), &[], raw).unwrap();
        assert_eq!(matched, vec![".env.example"]);
    }

    #[test]
    fn invalid_glob_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = match_paths(dir.path(), &patterns(&["src/[a"]), &[], MatchOptions::default());
        assert!(matches!(err, Err(AppError::Glob(_))));
    }
}
