//! Script templates and the renderer that fills them in.
//!
//! Rendering sits behind the [`Renderer`] trait. The built-in [`SimpleRenderer`]
//! understands `{{ var }}`, `{% if [not] var %}…{% endif %}` and
//! `{% for item in list %}…{{ item }}…{% endfor %}`; blocks do not nest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::{Captures, Regex};
use tracing::debug;
use crate::config::{ConfigFile, Engine};
use crate::error::{BulkerError, Result};

const DEFAULT_TEMPLATES: [(&str, &str); 6] = [
    ("docker_executable.tmpl", include_str!("../templates/docker_executable.tmpl")),
    ("docker_shell.tmpl", include_str!("../templates/docker_shell.tmpl")),
    ("docker_build.tmpl", include_str!("../templates/docker_build.tmpl")),
    ("singularity_executable.tmpl", include_str!("../templates/singularity_executable.tmpl")),
    ("singularity_shell.tmpl", include_str!("../templates/singularity_shell.tmpl")),
    ("singularity_build.tmpl", include_str!("../templates/singularity_build.tmpl")),
];

/// Subdirectory of the config directory that `bulker init` writes templates to.
pub const TEMPLATE_SUBDIR: &str = "templates";

static FOR_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{%\s*for\s+(\w+)\s+in\s+(\w+)\s*%\}(.*?)\{%\s*endfor\s*%\}")
        .expect("for block pattern is valid")
});
static IF_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{%\s*if\s+(not\s+)?(\w+)\s*%\}(.*?)\{%\s*endif\s*%\}")
        .expect("if block pattern is valid")
});
static VARIABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("variable pattern is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Text(String),
    List(Vec<String>),
    Flag(bool),
}

impl TemplateValue {
    fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::Text(text) => !text.is_empty(),
            TemplateValue::List(items) => !items.is_empty(),
            TemplateValue::Flag(flag) => *flag,
        }
    }

    fn to_text(&self) -> String {
        match self {
            TemplateValue::Text(text) => text.clone(),
            TemplateValue::List(items) => items.join(" "),
            TemplateValue::Flag(flag) => flag.to_string(),
        }
    }
}

pub type TemplateVars = BTreeMap<String, TemplateValue>;

/// Turns a template and a set of variables into text.
pub trait Renderer {
    fn render(&self, template: &str, vars: &TemplateVars) -> Result<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleRenderer;

impl Renderer for SimpleRenderer {
    fn render(&self, template: &str, vars: &TemplateVars) -> Result<String> {
        let looped = FOR_BLOCK.replace_all(template, |caps: &Captures| {
            let item = &caps[1];
            let items = match vars.get(&caps[2]) {
                Some(TemplateValue::List(items)) => items.clone(),
                Some(value) if value.is_truthy() => vec![value.to_text()],
                _ => Vec::new(),
            };
            items
                .iter()
                .map(|value| {
                    VARIABLE
                        .replace_all(&caps[3], |inner: &Captures| {
                            if &inner[1] == item { value.clone() } else { inner[0].to_string() }
                        })
                        .into_owned()
                })
                .collect::<String>()
        });
        let conditional = IF_BLOCK.replace_all(&looped, |caps: &Captures| {
            let truthy = vars.get(&caps[2]).is_some_and(TemplateValue::is_truthy);
            let negated = caps.get(1).is_some();
            if truthy != negated {
                caps[3].to_string()
            } else {
                String::new()
            }
        });
        if conditional.contains("{%") {
            return Err(BulkerError::Template(
                "unbalanced or unsupported block tag".to_string(),
            ));
        }
        let rendered = VARIABLE.replace_all(&conditional, |caps: &Captures| {
            vars.get(&caps[1]).map(TemplateValue::to_text).unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

/// The templates a load renders for every command.
#[derive(Debug, Clone)]
pub struct Templates {
    pub executable: String,
    pub shell: String,
    pub build: Option<String>,
}

impl Templates {
    /// Reads the templates named in the config. The build template is only read if `build` is set.
    ///
    /// # Errors
    ///
    /// Returns [`BulkerError::TemplateMissing`] if a configured template is missing or unreadable.
    pub fn load(config: &ConfigFile, build: bool) -> Result<Templates> {
        let settings = config.settings();
        let engine = settings.container_engine;
        let read = |kind: &'static str, configured: &Option<String>| -> Result<String> {
            let path = match configured {
                Some(path) => config.resolve_path(path),
                None => default_template_path(config.dir(), engine, kind),
            };
            debug!("Using {} template: {}", kind, path.display());
            std::fs::read_to_string(&path)
                .map_err(|_| BulkerError::TemplateMissing { kind, path })
        };
        let executable = read("executable", &settings.executable_template)?;
        let shell = read("shell", &settings.shell_template)?;
        let build = if build {
            Some(read("build", &settings.build_template)?)
        } else {
            None
        };
        Ok(Templates { executable, shell, build })
    }

    /// The templates shipped with bulker for `engine`.
    pub fn builtin(engine: Engine) -> Templates {
        let find = |kind: &str| {
            let name = format!("{}_{}.tmpl", engine, kind);
            DEFAULT_TEMPLATES
                .iter()
                .find(|(file, _)| *file == name)
                .map(|(_, content)| content.to_string())
                .unwrap_or_default()
        };
        Templates {
            executable: find("executable"),
            shell: find("shell"),
            build: Some(find("build")),
        }
    }
}

fn default_template_path(config_dir: &Path, engine: Engine, kind: &str) -> PathBuf {
    config_dir
        .join(TEMPLATE_SUBDIR)
        .join(format!("{}_{}.tmpl", engine, kind))
}

/// Writes the built-in templates into `{dir}/templates`.
pub fn write_default_templates(dir: &Path) -> Result<PathBuf> {
    let target = dir.join(TEMPLATE_SUBDIR);
    std::fs::create_dir_all(&target)?;
    for (name, content) in DEFAULT_TEMPLATES {
        std::fs::write(target.join(name), content)?;
    }
    Ok(target)
}
