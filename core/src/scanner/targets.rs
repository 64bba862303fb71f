// 扫描目标解析：路径 -> 待扫描文件列表

use crate::config::ScanConfig;
use crate::error::{CoreError, Result};
use crate::scanner::pattern::extension_matches;
use crate::suppress::IgnoreList;
use ignore::WalkBuilder;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A file to scan and the suppression list of the directory it came from.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub path: PathBuf,
    pub suppress: Option<Arc<IgnoreList>>,
}

/// Expands the given paths into a deduplicated file list.
///
/// Files named explicitly are always scanned. Directories are walked with
/// the configured depth, directory exclusions, extension filter and ignore
/// globs.
pub fn resolve_targets(targets: &[PathBuf], config: &ScanConfig, warnings: &mut Vec<String>) -> Result<Vec<ScanTarget>> {
    if targets.is_empty() {
        return Err(CoreError::NoTargets);
    }

    let mut resolved = Vec::new();
    let mut seen = HashSet::new();

    for target in targets {
        if !target.exists() {
            return Err(CoreError::TargetNotFound(target.clone()));
        }

        if target.is_file() {
            if seen.insert(target.clone()) {
                resolved.push(ScanTarget {
                    path: target.clone(),
                    suppress: None,
                });
            }
            continue;
        }

        let list = IgnoreList::load(target, &config.ignore_patterns, config.use_ignore_files, warnings);
        let list = Arc::new(list);
        let before = resolved.len();

        for path in walk_directory(target, config, warnings) {
            let relative = path.strip_prefix(target).unwrap_or(&path);
            if list.ignores_path(relative) {
                continue;
            }
            if seen.insert(path.clone()) {
                resolved.push(ScanTarget {
                    path,
                    suppress: Some(Arc::clone(&list)),
                });
            }
        }

        if resolved.len() == before {
            warnings.push(format!("no matching files under {}", target.display()));
        }
    }

    Ok(resolved)
}

fn walk_directory(root: &Path, config: &ScanConfig, warnings: &mut Vec<String>) -> Vec<PathBuf> {
    let ignore_dirs: HashSet<String> = config.ignore_dirs.iter().cloned().collect();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .git_ignore(config.respect_gitignore)
        .require_git(false)
        .max_depth(Some(config.max_depth))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map_or(false, |ft| ft.is_dir());
            !(is_dir && entry.depth() > 0 && ignore_dirs.contains(entry.file_name().to_string_lossy().as_ref()))
        })
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for result in walker {
        match result {
            Ok(entry) => {
                if entry.file_type().map_or(false, |ft| ft.is_file())
                    && extension_matches(&config.file_types, entry.path())
                {
                    files.push(entry.into_path());
                }
            }
            Err(e) => warnings.push(format!("walk error under {}: {}", root.display(), e)),
        }
    }
    files
}
