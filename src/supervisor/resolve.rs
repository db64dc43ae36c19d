use super::command::CommandBuilder;
use crate::config::WorkerConfig;
use crate::prelude::*;
use std::env;
use std::path::{MAIN_SEPARATOR, Path, PathBuf};

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn has_separator(program: &str) -> bool {
    program.contains('/') || program.contains(MAIN_SEPARATOR)
}

/// Resolve a worker program to the path that will be executed.
///
/// Absolute paths are kept, relative paths with a separator are taken from `app_root`, and bare
/// names are looked up on `PATH` then in `app_root`. A bare name found nowhere is returned as is
/// so the spawn failure names it.
pub fn resolve_program(program: &str, app_root: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(program);
    let path = Path::new(expanded.as_ref());

    if path.is_absolute() {
        return path.to_path_buf();
    }
    if has_separator(&expanded) {
        return app_root.join(path);
    }
    if let Some(found) = find_in_path(&expanded) {
        return found;
    }
    let local = app_root.join(path);
    if local.is_file() {
        return local;
    }
    path.to_path_buf()
}

/// Command to run for a worker request. An empty `program` selects the configured entry, run
/// through the configured interpreter if any.
pub fn resolve_command(
    program: &str,
    args: &[String],
    settings: &WorkerConfig,
    app_root: &Path,
) -> Result<CommandBuilder> {
    if !program.trim().is_empty() {
        let mut builder = CommandBuilder::new(resolve_program(program.trim(), app_root));
        builder.args(args);
        return Ok(builder);
    }

    let Some(entry) = settings.entry.as_deref() else {
        bail!("No worker command given and no worker entry configured");
    };
    let entry = resolve_program(&entry.to_string_lossy(), app_root);
    let mut builder = CommandBuilder::new(&entry);
    builder.args(args);
    if let Some(interpreter) = settings.interpreter.as_deref() {
        let interpreter = resolve_program(interpreter, app_root);
        builder.wrap(interpreter, [] as [&str; 0]);
    }
    Ok(builder)
}
