use super::ArchiveStructure;
use crate::config::ExtractionConfig;
use crate::outcome::Outcome;
use crate::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

struct DirEntries {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

/// Immediate children of `dir`, sorted by name. Symlinks are neither files nor directories here.
fn read_sorted(dir: &Path) -> DirEntries {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|entry| entry.ok()).collect::<Vec<_>>(),
        Err(e) => {
            debug!("Could not read {}: {e}", dir.display());
            Vec::new()
        }
    };
    entries.sort_by_key(|entry| entry.file_name());

    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in entries {
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => dirs.push(entry.path()),
            Ok(file_type) if file_type.is_file() => files.push(entry.path()),
            _ => {}
        }
    }
    DirEntries { files, dirs }
}

fn name_contains_any(path: &Path, substrings: &[String]) -> bool {
    let Some(name) = path.file_name() else {
        return false;
    };
    let name = name.to_string_lossy().to_lowercase();
    substrings
        .iter()
        .any(|substring| name.contains(&substring.to_lowercase()))
}

/// Depth-first search of the anchor file, `root` being at depth 0.
///
/// Directories whose name contains a priority substring are visited before the others.
pub(super) fn find_anchor(root: &Path, settings: &ExtractionConfig) -> Option<PathBuf> {
    search(root, 0, settings)
}

fn search(dir: &Path, depth: usize, settings: &ExtractionConfig) -> Option<PathBuf> {
    if depth > settings.max_search_depth {
        return None;
    }
    let DirEntries { files, dirs } = read_sorted(dir);

    if let Some(anchor) = files
        .into_iter()
        .find(|file| file.file_name().is_some_and(|name| name == settings.anchor_file_name.as_str()))
    {
        return Some(anchor);
    }

    if depth == settings.max_search_depth {
        return None;
    }
    let (priority, deferred): (Vec<_>, Vec<_>) = dirs
        .into_iter()
        .partition(|subdir| name_contains_any(subdir, &settings.priority_substrings));

    priority
        .iter()
        .chain(deferred.iter())
        .find_map(|subdir| search(subdir, depth + 1, settings))
}

/// Folder to hand to the worker when no anchor was found.
///
/// A root made of a single directory is treated as a wrapper: its first sub-folder matching a
/// wrapper substring wins, otherwise the wrapper itself. Anything else yields the root.
pub(super) fn fallback_folder(root: &Path, settings: &ExtractionConfig) -> PathBuf {
    let DirEntries { files, dirs } = read_sorted(root);
    let [wrapper] = dirs.as_slice() else {
        return root.to_path_buf();
    };
    if !files.is_empty() {
        return root.to_path_buf();
    }

    read_sorted(wrapper)
        .dirs
        .into_iter()
        .find(|subdir| name_contains_any(subdir, &settings.wrapper_substrings))
        .unwrap_or_else(|| wrapper.clone())
}

fn describe(working_folder: PathBuf, anchor_found: bool, settings: &ExtractionConfig) -> ArchiveStructure {
    let activity = working_folder.join(&settings.activity_folder_name);
    let has_activity_folder = activity.is_dir();
    let has_media_folder = working_folder.join(&settings.media_folder_name).is_dir()
        || activity.join(&settings.media_folder_name).is_dir();

    ArchiveStructure {
        working_folder,
        anchor_found,
        has_media_folder,
        has_activity_folder,
    }
}

/// Resolve the working folder of an extracted archive. Never fails: a missing anchor degrades
/// to the wrapper heuristic.
pub(super) fn locate_structure(root: &Path, settings: &ExtractionConfig) -> Outcome<ArchiveStructure> {
    match find_anchor(root, settings) {
        Some(anchor) => {
            debug!("Found {} at {}", settings.anchor_file_name, anchor.display());
            // The anchor sits two levels below the data root: <root>/<activity>/<kind>/anchor
            let working_folder = anchor
                .parent()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            if !working_folder.starts_with(root) {
                warn!(
                    "Working folder {} is outside of the extraction folder {}",
                    working_folder.display(),
                    root.display()
                );
            }
            Outcome::Complete(describe(working_folder, true, settings))
        }
        None => {
            let working_folder = fallback_folder(root, settings);
            let warning = format!(
                "Could not find {} within {} levels, using {}",
                settings.anchor_file_name,
                settings.max_search_depth,
                working_folder.display()
            );
            warn!("{warning}");
            Outcome::degraded(describe(working_folder, false, settings), warning)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "[]").unwrap();
    }

    fn mkdir(root: &Path, relative: &str) {
        fs::create_dir_all(root.join(relative)).unwrap();
    }

    #[test]
    fn test_anchor_two_levels_below_working_folder() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "root/a/your_instagram_activity/media/posts_1.json");

        let outcome = locate_structure(dir.path(), &ExtractionConfig::default());
        assert!(!outcome.is_degraded());
        let structure = outcome.into_value();
        assert_eq!(structure.working_folder, dir.path().join("root/a"));
        assert!(structure.anchor_found);
        assert!(structure.has_activity_folder);
        assert!(structure.has_media_folder);
    }

    #[test]
    fn test_anchor_beyond_max_depth_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "1/2/3/4/5/6/posts_1.json");
        assert_eq!(find_anchor(dir.path(), &ExtractionConfig::default()), None);
    }

    #[test]
    fn test_anchor_at_max_depth_is_found() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "1/2/3/4/5/posts_1.json");

        let outcome = locate_structure(dir.path(), &ExtractionConfig::default());
        assert!(!outcome.is_degraded());
        let structure = outcome.into_value();
        assert!(structure.anchor_found);
        assert_eq!(structure.working_folder, dir.path().join("1/2/3"));
    }

    #[test]
    fn test_priority_directories_are_searched_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "aaa/x/posts_1.json");
        touch(dir.path(), "zzz_instagram/x/posts_1.json");

        assert_eq!(
            find_anchor(dir.path(), &ExtractionConfig::default()),
            Some(dir.path().join("zzz_instagram/x/posts_1.json"))
        );
    }

    #[test]
    fn test_other_directories_are_deferred_not_skipped() {
        let dir = tempfile::tempdir().unwrap();
        mkdir(dir.path(), "Instagram_Media/empty");
        touch(dir.path(), "misc/x/posts_1.json");

        assert_eq!(
            find_anchor(dir.path(), &ExtractionConfig::default()),
            Some(dir.path().join("misc/x/posts_1.json"))
        );
    }

    #[test]
    fn test_single_wrapper_prefers_matching_subfolder() {
        let dir = tempfile::tempdir().unwrap();
        mkdir(dir.path(), "export/other");
        mkdir(dir.path(), "export/your_instagram_activity/media");

        let outcome = locate_structure(dir.path(), &ExtractionConfig::default());
        assert!(outcome.is_degraded());
        let structure = outcome.into_value();
        assert_eq!(
            structure.working_folder,
            dir.path().join("export/your_instagram_activity")
        );
        assert!(!structure.anchor_found);
        assert!(structure.has_media_folder);
    }

    #[test]
    fn test_single_wrapper_without_match_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        mkdir(dir.path(), "export/photos");

        let structure = locate_structure(dir.path(), &ExtractionConfig::default()).into_value();
        assert_eq!(structure.working_folder, dir.path().join("export"));
    }

    #[test]
    fn test_multiple_top_level_folders_use_root() {
        let dir = tempfile::tempdir().unwrap();
        mkdir(dir.path(), "first/instagram");
        mkdir(dir.path(), "second");

        let outcome = locate_structure(dir.path(), &ExtractionConfig::default());
        assert!(outcome.warning().unwrap().starts_with("Could not find posts_1.json"));
        assert_eq!(outcome.into_value().working_folder, dir.path());
    }

    #[test]
    fn test_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let structure = locate_structure(dir.path(), &ExtractionConfig::default()).into_value();
        assert_eq!(structure.working_folder, dir.path());
        assert!(!structure.anchor_found);
        assert!(!structure.has_activity_folder);
        assert!(!structure.has_media_folder);
    }

    #[test]
    fn test_custom_anchor_name_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a/b/c/export.json");
        let settings = ExtractionConfig {
            anchor_file_name: "export.json".into(),
            max_search_depth: 2,
            ..Default::default()
        };
        assert_eq!(find_anchor(dir.path(), &settings), None);

        let settings = ExtractionConfig {
            max_search_depth: 3,
            ..settings
        };
        assert_eq!(
            find_anchor(dir.path(), &settings),
            Some(dir.path().join("a/b/c/export.json"))
        );
    }
}
