use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::{Captures, Regex};
use tracing::debug;
use walkdir::WalkDir;

/// Separator between entries of a `PATH`-like list.
pub const PATH_LIST_SEPARATOR: &str = ":";

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)\}|(?P<bare>[A-Za-z_][A-Za-z0-9_]*))")
        .expect("env var pattern is valid")
});

/// Returns true for `http://` and `https://` locations.
pub fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Expands `$VAR` and `${VAR}` from the environment. Unset variables are left untouched.
pub fn expand_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .name("braced")
                .or_else(|| caps.name("bare"))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Expands a leading `~` to the home directory.
pub fn expand_user(input: &str) -> String {
    let home = || std::env::var("HOME").ok();
    if input == "~" {
        return home().unwrap_or_else(|| input.to_string());
    }
    match (input.strip_prefix("~/"), home()) {
        (Some(rest), Some(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => input.to_string(),
    }
}

/// Makes a path absolute after expanding `~` and environment variables.
///
/// Relative paths are joined to `reldir` if given, otherwise to the current directory.
pub fn mkabs(path: &str, reldir: Option<&Path>) -> PathBuf {
    let expanded = PathBuf::from(expand_vars(&expand_user(path)));
    if expanded.is_absolute() {
        return expanded;
    }
    match reldir {
        Some(dir) => PathBuf::from(expand_vars(&expand_user(&dir.to_string_lossy()))).join(expanded),
        None => std::path::absolute(&expanded).unwrap_or(expanded),
    }
}

/// Copies the contents of `src` into `dest`, overwriting files that already exist.
///
/// Symlinks are recreated rather than followed.
pub fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).map_err(std::io::Error::other)?;
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if target.symlink_metadata().is_ok() {
            std::fs::remove_file(&target)?;
        }
        if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
        copied += 1;
    }
    debug!("Copied {} entries from {} to {}", copied, src.display(), dest.display());
    Ok(copied)
}

/// Removes `dir` if it exists and is empty. Returns whether it was removed.
pub fn remove_dir_if_empty(dir: &Path) -> std::io::Result<bool> {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Ok(false);
            }
            std::fs::remove_dir(dir)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Writes `content` to `path` with mode 0755.
pub fn write_executable(path: &Path, content: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, content)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

/// Checks if a given path is an executable file.
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Quotes an argument in double quotes if it contains whitespace.
pub fn maybe_quote(arg: &str) -> String {
    if arg.chars().any(char::is_whitespace) {
        format!("\"{}\"", arg)
    } else {
        arg.to_string()
    }
}
