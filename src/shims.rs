use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, warn};
use crate::error::{BulkerError, Result};
use crate::settings::EffectiveCommand;
use crate::template::{Renderer, Templates};
use crate::util::write_executable;

/// Prefix of the interactive shell variant of every command.
pub const SHELL_PREFIX: &str = "_";

/// Renders and writes the launcher `<command>` and the shell variant `_<command>` into `dir`.
///
/// Both scripts are written with mode 0755. Returns the launcher's path.
///
/// # Errors
///
/// Returns [`BulkerError::InvalidName`] if the command is not a plain file name,
/// or an error if rendering fails or a script can't be written.
pub fn write_command_shims(
    dir: &Path,
    command: &EffectiveCommand,
    templates: &Templates,
    renderer: &dyn Renderer,
) -> Result<PathBuf> {
    let launcher = entry_path(dir, &command.command)?;
    let shell = entry_path(dir, &format!("{}{}", SHELL_PREFIX, command.command))?;
    let vars = command.template_vars();
    remove_symlink(&launcher)?;
    write_executable(&launcher, &renderer.render(&templates.executable, &vars)?)?;
    remove_symlink(&shell)?;
    write_executable(&shell, &renderer.render(&templates.shell, &vars)?)?;
    debug!("Wrote executables for '{}' in {}", command.command, dir.display());
    Ok(launcher)
}

/// Symlinks the host executable `name` (resolved on `PATH`) into `dir`.
///
/// Returns `None` if `name` is not a plain file name, the executable can't be
/// found, or a non-link entry already has that name. A link already at the
/// destination is replaced.
pub fn link_host_command(dir: &Path, name: &str) -> Result<Option<PathBuf>> {
    let link = match entry_path(dir, name) {
        Ok(link) => link,
        Err(e) => {
            warn!("Skipping host command: {}", e);
            return Ok(None);
        }
    };
    let target = match which::which(name) {
        Ok(target) => target,
        Err(_) => {
            warn!("Can't find executable for host command '{}'", name);
            return Ok(None);
        }
    };
    match link.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!("Replacing existing link: {}", link.display());
            std::fs::remove_file(&link)?;
        }
        Ok(_) => {
            warn!("Not linking host command '{}': {} already exists", name, link.display());
            return Ok(None);
        }
        Err(_) => {}
    }
    std::os::unix::fs::symlink(&target, &link)?;
    debug!("Linked {} -> {}", link.display(), target.display());
    Ok(Some(link))
}

/// `dir/name`, if `name` is a single normal path component.
fn entry_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) => Ok(dir.join(file)),
        _ => Err(BulkerError::InvalidName(name.to_string())),
    }
}

// Writes follow links, so a link copied in from an import is dropped first.
fn remove_symlink(path: &Path) -> Result<()> {
    if path.symlink_metadata().is_ok_and(|meta| meta.file_type().is_symlink()) {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Runs a rendered build script through `sh -c`.
///
/// A failing script is logged, not returned: returns whether it succeeded.
pub fn run_build_script(script: &str) -> Result<bool> {
    debug!("Building: {}", script);
    let status = Command::new("/bin/sh").arg("-c").arg(script).status()?;
    if !status.success() {
        error!("Error building. Failed command: {}", script);
    }
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BulkerSettings, Engine};
    use crate::manifest::CommandEntry;
    use crate::template::SimpleRenderer;
    use crate::util::is_executable;
    use tempfile::tempdir;

    fn effective(command: &str) -> EffectiveCommand {
        let entry = CommandEntry {
            command: command.to_string(),
            docker_image: format!("nsheff/{}", command),
            ..Default::default()
        };
        EffectiveCommand::merge(&entry, &BulkerSettings::for_engine(Engine::Docker), Path::new("/")).unwrap()
    }

    #[test]
    fn test_write_command_shims() {
        let dir = tempdir().unwrap();
        let templates = Templates::builtin(Engine::Docker);
        let launcher = write_command_shims(dir.path(), &effective("cowsay"), &templates, &SimpleRenderer).unwrap();
        assert_eq!(launcher, dir.path().join("cowsay"));
        assert!(is_executable(&launcher));
        assert!(is_executable(&dir.path().join("_cowsay")));
        let shell = std::fs::read_to_string(dir.path().join("_cowsay")).unwrap();
        assert!(shell.contains("nsheff/cowsay"));
    }

    #[test]
    fn test_link_host_command_replaces_stale_link() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink("/nonexistent/sh", dir.path().join("sh")).unwrap();
        let link = link_host_command(dir.path(), "sh").unwrap().unwrap();
        let target = std::fs::read_link(&link).unwrap();
        assert!(target.is_absolute());
        assert!(target.exists());
    }

    #[test]
    fn test_write_command_shims_rejects_path_names() {
        let root = tempdir().unwrap();
        let dir = root.path().join("crate");
        std::fs::create_dir(&dir).unwrap();
        let templates = Templates::builtin(Engine::Docker);
        for name in ["../escape", "/tmp/escape", "sub/tool", ".."] {
            let result = write_command_shims(&dir, &effective(name), &templates, &SimpleRenderer);
            assert!(matches!(result, Err(BulkerError::InvalidName(_))), "accepted '{}'", name);
        }
        assert!(!root.path().join("escape").exists());
        assert!(!root.path().join("_escape").exists());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn test_write_command_shims_replaces_link_not_its_target() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let target = outside.path().join("cowsay");
        std::fs::write(&target, "original").unwrap();
        std::os::unix::fs::symlink(&target, dir.path().join("cowsay")).unwrap();

        let templates = Templates::builtin(Engine::Docker);
        write_command_shims(dir.path(), &effective("cowsay"), &templates, &SimpleRenderer).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "original");
        let launcher = dir.path().join("cowsay").symlink_metadata().unwrap();
        assert!(!launcher.file_type().is_symlink());
    }

    #[test]
    fn test_link_host_command_rejects_absolute_name() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let victim = outside.path().join("victim.sh");
        std::fs::write(&victim, "#!/bin/sh\necho keep\n").unwrap();
        std::fs::set_permissions(&victim, std::fs::Permissions::from_mode(0o755)).unwrap();

        let name = victim.to_string_lossy().into_owned();
        assert!(link_host_command(dir.path(), &name).unwrap().is_none());
        assert!(!victim.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "#!/bin/sh\necho keep\n");
        assert!(link_host_command(dir.path(), "../sh").unwrap().is_none());
    }

    #[test]
    fn test_link_host_command_keeps_existing_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("sh"), "launcher").unwrap();
        assert!(link_host_command(dir.path(), "sh").unwrap().is_none());
        assert_eq!(std::fs::read_to_string(dir.path().join("sh")).unwrap(), "launcher");
    }

    #[test]
    fn test_link_missing_host_command() {
        let dir = tempdir().unwrap();
        assert!(link_host_command(dir.path(), "bulker-no-such-tool").unwrap().is_none());
        assert!(!dir.path().join("bulker-no-such-tool").exists());
    }

    #[test]
    fn test_run_build_script() {
        assert!(run_build_script("true").unwrap());
        assert!(!run_build_script("exit 3").unwrap());
    }
}
