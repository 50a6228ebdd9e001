use std::path::{Path, PathBuf};
use tempfile::TempDir;
use bulker::config::{ConfigFile, Engine};
use bulker::template::write_default_templates;

const BASE: &str = r#"
manifest:
  name: base
  commands:
  - command: fortune
    docker_image: nsheff/fortune
  host_commands:
  - sh
"#;

const DEMO: &str = r#"
manifest:
  name: demo
  version: 1.0.0
  commands:
  - command: cowsay
    docker_image: nsheff/cowsay
  imports:
  - bulker/base
"#;

const CYCLE_A: &str = r#"
manifest:
  commands:
  - command: tool-a
    docker_image: databio/tool-a
  imports:
  - cycle_b
"#;

const CYCLE_B: &str = r#"
manifest:
  commands:
  - command: tool-b
    docker_image: databio/tool-b
  imports:
  - bulker/cycle_a:default
"#;

const EMPTY: &str = "manifest:\n  name: empty\n  commands:\n";

const ZETA: &str = "manifest:\n  commands:\n  - command: tool\n    docker_image: databio/zeta-tool\n";
const ALPHA: &str = "manifest:\n  commands:\n  - command: tool\n    docker_image: databio/alpha-tool\n";

const TOP: &str = r#"
manifest:
  commands:
  - command: top
    docker_image: databio/top
  imports:
  - zeta
  - alpha
"#;

const DIAMOND_A: &str = r#"
manifest:
  commands:
  - command: atool
    docker_image: databio/atool
  imports:
  - diamond_b
  - diamond_c
"#;

const DIAMOND_B: &str = "manifest:\n  commands:\n  - command: btool\n    docker_image: databio/btool\n  imports:\n  - diamond_d\n";
const DIAMOND_C: &str = "manifest:\n  commands:\n  - command: ctool\n    docker_image: databio/ctool\n  imports:\n  - diamond_d\n";
const DIAMOND_D: &str = "manifest:\n  commands:\n  - command: dtool\n    docker_image: databio/dtool\n";

/// A config in a temp dir whose registry is a local directory of manifests.
fn setup_tests() -> (TempDir, ConfigFile) {
    let temp_dir = TempDir::new().unwrap();
    let registry = temp_dir.path().join("registry").join("bulker");
    std::fs::create_dir_all(&registry).unwrap();
    for (name, manifest) in [
        ("base", BASE),
        ("demo", DEMO),
        ("cycle_a", CYCLE_A),
        ("cycle_b", CYCLE_B),
        ("empty", EMPTY),
        ("zeta", ZETA),
        ("alpha", ALPHA),
        ("top", TOP),
        ("diamond_a", DIAMOND_A),
        ("diamond_b", DIAMOND_B),
        ("diamond_c", DIAMOND_C),
        ("diamond_d", DIAMOND_D),
    ] {
        std::fs::write(registry.join(format!("{}.yaml", name)), manifest).unwrap();
    }

    let mut config = ConfigFile::create(&temp_dir.path().join("bulker_config.yaml"), Engine::Docker).unwrap();
    write_default_templates(temp_dir.path()).unwrap();
    let settings = config.settings_mut();
    settings.registry_url = Some(temp_dir.path().join("registry").to_string_lossy().into_owned());
    settings.default_crate_folder = "crates".to_string();
    config.write().unwrap();
    (temp_dir, config)
}

fn crate_dir(root: &Path, name: &str) -> PathBuf {
    root.join("crates").join("bulker").join(name).join("default")
}

#[cfg(test)]
mod tests {
    use bulker::*;
    use bulker::manifest::ManifestFetcher;
    use bulker::prompts::FixedAnswer;
    use bulker::template::SimpleRenderer;
    use crate::{crate_dir, setup_tests};

    fn fetcher(config: &ConfigFile) -> ManifestFetcher {
        ManifestFetcher::new(config.settings().registry_url(), "bulker")
    }

    fn load(config: &mut ConfigFile, path: &str, force: bool, recurse: bool) -> Result<LoadOutcome> {
        let fetcher = fetcher(config);
        let (manifest, reference) = fetcher.fetch_path(path, None)?;
        let mut loader = Loader::new(config, &fetcher, &SimpleRenderer, &FixedAnswer(false), false)?;
        loader.load(&manifest, &reference, LoadOptions { crate_path: None, force, recurse })
    }

    fn reference(path: &str) -> RegistryReference {
        RegistryReference::parse(path, "bulker").unwrap()
    }

    #[test]
    fn test_setup() {
        let (dir, config) = setup_tests();
        assert!(dir.path().join("bulker_config.yaml").exists());
        assert!(dir.path().join("templates").join("docker_executable.tmpl").exists());
        assert!(config.crates().is_empty());
    }

    #[test]
    fn test_load_with_missing_import() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "demo", false, false).unwrap();

        let demo = crate_dir(dir.path(), "demo");
        assert!(demo.join("cowsay").is_file());
        assert!(demo.join("_cowsay").is_file());
        // overlaid from the import
        assert!(demo.join("fortune").is_file());
        assert!(demo.join("sh").symlink_metadata().is_ok());

        assert_eq!(config.crates().get(&reference("demo")), Some(demo.as_path()));
        assert_eq!(
            config.crates().get(&reference("base")),
            Some(crate_dir(dir.path(), "base").as_path())
        );
    }

    #[test]
    fn test_registry_survives_reopen() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "base", false, false).unwrap();
        drop(config);

        let config = ConfigFile::open(&dir.path().join("bulker_config.yaml"), LockMode::Shared).unwrap();
        assert!(config.crates().contains(&reference("bulker/base:default")));
    }

    #[test]
    fn test_forced_reload_replaces_contents() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "base", false, false).unwrap();
        let base = crate_dir(dir.path(), "base");
        std::fs::write(base.join("stale"), "left over").unwrap();

        load(&mut config, "base", true, false).unwrap();
        assert!(!base.join("stale").exists());
        assert!(base.join("fortune").is_file());
    }

    #[test]
    fn test_existing_crate_declined() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "base", false, false).unwrap();
        let base = crate_dir(dir.path(), "base");
        std::fs::write(base.join("keep"), "mine").unwrap();

        let outcome = load(&mut config, "base", false, false).unwrap();
        assert_eq!(outcome, LoadOutcome::Declined);
        assert!(base.join("keep").exists());
    }

    #[test]
    fn test_empty_crate_leaves_nothing_behind() {
        let (dir, mut config) = setup_tests();
        let err = load(&mut config, "empty", false, false).unwrap_err();
        assert!(matches!(err, BulkerError::EmptyCrate(_)));
        assert!(!crate_dir(dir.path(), "empty").exists());
        assert!(!dir.path().join("crates").join("bulker").join("empty").exists());
        assert!(!config.crates().contains(&reference("empty")));
    }

    #[test]
    fn test_cyclic_imports_resolve() {
        let (_dir, config) = setup_tests();
        let fetcher = fetcher(&config);
        let (manifest, _) = fetcher.fetch_path("cycle_a", None).unwrap();
        let imports = resolve_imports(&manifest, "bulker", true, |import| {
            fetcher.fetch(import, None).map(|(manifest, _)| manifest)
        });
        assert_eq!(imports, vec!["bulker/cycle_a:default", "bulker/cycle_b:default"]);
    }

    #[test]
    fn test_cyclic_imports_load() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "cycle_a", false, true).unwrap();

        let a = crate_dir(dir.path(), "cycle_a");
        let b = crate_dir(dir.path(), "cycle_b");
        assert!(a.join("tool-a").is_file());
        assert!(a.join("tool-b").is_file());
        assert!(b.join("tool-b").is_file());
        assert!(!b.join("tool-a").exists());
    }

    #[test]
    fn test_later_import_wins_on_shared_command() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "top", false, false).unwrap();

        let tool = std::fs::read_to_string(crate_dir(dir.path(), "top").join("tool")).unwrap();
        assert!(tool.contains("databio/alpha-tool"));
        assert!(!tool.contains("databio/zeta-tool"));
    }

    #[test]
    fn test_diamond_import_is_built_once() {
        let (dir, mut config) = setup_tests();
        let log = dir.path().join("build.log");
        let template = dir.path().join("log_build.tmpl");
        std::fs::write(&template, format!("echo {{{{ command }}}} >> '{}'\n", log.display())).unwrap();
        config.settings_mut().build_template = Some(template.to_string_lossy().into_owned());

        let fetcher = fetcher(&config);
        let (manifest, reference) = fetcher.fetch_path("diamond_a", None).unwrap();
        let mut loader = Loader::new(&mut config, &fetcher, &SimpleRenderer, &FixedAnswer(false), true).unwrap();
        loader
            .load(&manifest, &reference, LoadOptions { crate_path: None, force: false, recurse: true })
            .unwrap();

        let built: Vec<String> = std::fs::read_to_string(&log).unwrap().lines().map(str::to_string).collect();
        assert_eq!(built, vec!["dtool", "btool", "ctool", "atool"]);
        let a = crate_dir(dir.path(), "diamond_a");
        for tool in ["atool", "btool", "ctool", "dtool"] {
            assert!(a.join(tool).is_file(), "{} missing", tool);
        }
    }

    #[test]
    fn test_hostile_names_are_skipped() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, mut config) = setup_tests();
        let outside = tempfile::tempdir().unwrap();
        let victim = outside.path().join("victim.sh");
        std::fs::write(&victim, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&victim, std::fs::Permissions::from_mode(0o755)).unwrap();
        let manifest = format!(
            "manifest:\n  commands:\n  - command: ../escape\n    docker_image: databio/escape\n  \
             - command: ok\n    docker_image: databio/ok\n  host_commands:\n  - {}\n",
            victim.display()
        );
        std::fs::write(dir.path().join("registry").join("bulker").join("hostile.yaml"), manifest).unwrap();

        match load(&mut config, "hostile", false, false).unwrap() {
            LoadOutcome::Loaded { commands, host_commands, .. } => {
                assert_eq!(commands, vec!["ok"]);
                assert!(host_commands.is_empty());
            }
            LoadOutcome::Declined => panic!("load was declined"),
        }
        assert!(!victim.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&victim).unwrap(), "#!/bin/sh\n");
        let hostile = crate_dir(dir.path(), "hostile");
        assert!(!hostile.parent().unwrap().join("escape").exists());
        assert!(hostile.join("ok").is_file());
    }

    #[test]
    fn test_unload() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "demo", false, false).unwrap();

        let removed = unload(&mut config, &[reference("demo")]).unwrap();
        assert_eq!(removed, vec![crate_dir(dir.path(), "demo")]);
        assert!(!crate_dir(dir.path(), "demo").exists());
        assert!(!config.crates().contains(&reference("demo")));
        assert!(config.crates().contains(&reference("base")));
    }

    #[test]
    fn test_build_path_over_loaded_crates() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "demo", false, false).unwrap();

        let refs = RegistryReference::parse_many("demo, base", "bulker").unwrap();
        let path = build_path(config.crates(), &refs, true).unwrap();
        assert_eq!(
            path,
            format!(
                "{}:{}",
                crate_dir(dir.path(), "demo").display(),
                crate_dir(dir.path(), "base").display()
            )
        );

        let missing = RegistryReference::parse_many("demo,ghost", "bulker").unwrap();
        let err = build_path(config.crates(), &missing, true).unwrap_err();
        assert_eq!(err.to_string(), "'bulker/ghost:default' is not an available crate");
    }

    #[test]
    fn test_reload_all() {
        let (dir, mut config) = setup_tests();
        load(&mut config, "demo", false, false).unwrap();
        std::fs::write(crate_dir(dir.path(), "demo").join("stale"), "x").unwrap();

        let fetcher = fetcher(&config);
        let mut loader = Loader::new(&mut config, &fetcher, &SimpleRenderer, &FixedAnswer(false), false).unwrap();
        assert_eq!(loader.reload_all(false).unwrap(), 2);
        assert!(!crate_dir(dir.path(), "demo").join("stale").exists());
        assert!(crate_dir(dir.path(), "demo").join("fortune").is_file());
    }
}
