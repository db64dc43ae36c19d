use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

pub const PROCESS_ID_ENV: &str = "MIGRATION_HOST_PROCESS_ID";
pub const HOST_VERSION_ENV: &str = "MIGRATION_HOST_VERSION";

const PATH_LIKE_SUFFIXES: [&str; 4] = ["_PATH", "_DIR", "_FOLDER", "_FILE"];

/// Variables the host always provides to a worker.
pub fn get_base_injected_env(process_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (PROCESS_ID_ENV.to_owned(), process_id.to_owned()),
        (HOST_VERSION_ENV.to_owned(), crate::VERSION.to_owned()),
    ])
}

pub fn is_path_like(name: &str, extra_names: &[String]) -> bool {
    PATH_LIKE_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
        || extra_names.iter().any(|extra| extra == name)
}

/// Path-like variables of `vars`, relative values being resolved against `app_root`.
pub fn resolve_path_like_vars(
    vars: &BTreeMap<String, String>,
    app_root: &Path,
    extra_names: &[String],
) -> BTreeMap<String, String> {
    vars.iter()
        .filter(|(name, _)| is_path_like(name, extra_names))
        .map(|(name, value)| {
            let resolved = if value.is_empty() || Path::new(value).is_absolute() {
                value.clone()
            } else {
                app_root.join(value).to_string_lossy().into_owned()
            };
            (name.clone(), resolved)
        })
        .collect()
}

/// Environment of a worker: inherited variables, then the injected ones, then the caller's,
/// each layer overriding the previous one.
pub fn merge_env<I>(
    inherited: I,
    injected: &BTreeMap<String, String>,
    caller: &BTreeMap<String, String>,
    resolved_paths: &BTreeMap<String, String>,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut merged = inherited.into_iter().collect::<BTreeMap<_, _>>();
    for (name, value) in injected.iter().chain(caller).chain(resolved_paths) {
        merged.insert(OsString::from(name), OsString::from(value));
    }
    merged
}
