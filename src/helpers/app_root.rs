use std::env;
use std::path::{Path, PathBuf};

pub const APP_ROOT_ENV: &str = "MIGRATION_HOST_APP_ROOT";

/// Directory that relative worker entries and path-like variables are resolved against.
///
/// In order: the configured root, `$MIGRATION_HOST_APP_ROOT`, the source tree when running from
/// a cargo `target/` directory, the directory of the running executable (packaged bundle), and
/// finally the current directory.
pub fn compute_app_root(configured: Option<&Path>) -> PathBuf {
    if let Some(root) = configured {
        return root.to_path_buf();
    }
    if let Some(root) = env::var_os(APP_ROOT_ENV).filter(|root| !root.is_empty()) {
        return PathBuf::from(root);
    }

    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    match exe_dir {
        Some(exe_dir) => find_source_root(&exe_dir).unwrap_or(exe_dir),
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Returns the directory containing `target/` when `exe_dir` lives inside a cargo build tree.
fn find_source_root(exe_dir: &Path) -> Option<PathBuf> {
    let target_dir = exe_dir
        .ancestors()
        .find(|ancestor| ancestor.file_name().is_some_and(|name| name == "target"))?;
    let source_root = target_dir.parent()?;
    if source_root.join("Cargo.toml").exists() {
        Some(source_root.to_path_buf())
    } else {
        log::debug!("Could not find the source root of {}", exe_dir.display());
        None
    }
}
