//! Output file naming

use indexmap::IndexMap;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::core::step::Lineage;

#[derive(Debug, Error)]
pub enum OutputPathError {
    #[error("cannot expand '~' in '{0}': home directory is unknown")]
    NoHome(String),
}

/// How the output suffix is chosen
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Suffix {
    /// The step's own or inherited suffix, else its lower-cased name
    #[default]
    Default,
    /// No suffix at all
    Off,
    Set(String),
}

impl From<&str> for Suffix {
    fn from(suffix: &str) -> Self {
        Suffix::Set(suffix.to_string())
    }
}

/// Arguments to [`make_output_path`]
#[derive(Debug, Clone, Default)]
pub struct OutputPathRequest {
    pub basepath: Option<String>,
    pub ext: Option<String>,
    pub suffix: Suffix,
    /// Extra name components appended after the stem; `None` values are left out
    pub components: IndexMap<String, Option<String>>,
}

impl OutputPathRequest {
    pub fn with_basepath(mut self, basepath: impl Into<String>) -> Self {
        self.basepath = Some(basepath.into());
        self
    }

    pub fn with_ext(mut self, ext: impl Into<String>) -> Self {
        self.ext = Some(ext.into());
        self
    }

    pub fn with_suffix(mut self, suffix: Suffix) -> Self {
        self.suffix = suffix;
        self
    }

    pub fn with_component(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.components.insert(name.into(), value);
        self
    }
}

/// Fills `{field}` placeholders. Fields without a placeholder are appended
/// joined by the separator; empty fields are dropped.
#[derive(Debug, Clone)]
pub struct FormatTemplate {
    pub separator: String,
}

impl Default for FormatTemplate {
    fn default() -> Self {
        Self {
            separator: "_".to_string(),
        }
    }
}

impl FormatTemplate {
    pub fn format(&self, template: &str, fields: &[(&str, Option<&str>)]) -> String {
        let lookup = |name: &str| {
            fields
                .iter()
                .find(|(field, _)| *field == name)
                .and_then(|(_, value)| *value)
                .unwrap_or("")
        };

        let mut out = match placeholder_regex() {
            Some(re) => re
                .replace_all(template, |caps: &regex::Captures<'_>| lookup(&caps[1]).to_string())
                .into_owned(),
            None => template.to_string(),
        };

        for (field, value) in fields {
            let placeholder = format!("{{{}}}", field);
            if template.contains(&placeholder) {
                continue;
            }
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                out.push_str(&self.separator);
                out.push_str(value);
            }
        }
        out
    }
}

fn placeholder_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").ok()).as_ref()
}

fn env_var_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$(?:\{(\w+)\}|(\w+))").ok()).as_ref()
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references. Unknown variables are left as written.
pub fn expand_path(raw: &str) -> Result<String, OutputPathError> {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = dirs::home_dir().ok_or_else(|| OutputPathError::NoHome(raw.to_string()))?;
            format!("{}{}", home.display(), rest)
        }
        _ => raw.to_string(),
    };

    Ok(match env_var_regex() {
        Some(re) => re
            .replace_all(&expanded, |caps: &regex::Captures<'_>| {
                let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
                std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
            })
            .into_owned(),
        None => expanded,
    })
}

/// Split a file name into stem and extension the way most tools do:
/// a leading dot does not start an extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(index) => {
            let index = leading + index;
            (&name[..index], &name[index + 1..])
        }
        None => (name, ""),
    }
}

/// Strip one of the `known` suffixes from a stem, returning the stem and the separator found
pub fn strip_known_suffix(stem: &str, known: &[&str]) -> (String, String) {
    if known.is_empty() {
        return (stem.to_string(), "_".to_string());
    }
    let alternatives = known.iter().map(|s| regex::escape(s)).collect::<Vec<_>>().join("|");
    let pattern = format!(r"^(?P<stem>.+?)(?P<sep>[_-])(?:{})$", alternatives);
    match Regex::new(&pattern).ok().and_then(|re| {
        re.captures(stem)
            .map(|caps| (caps["stem"].to_string(), caps["sep"].to_string()))
    }) {
        Some(found) => found,
        None => (stem.to_string(), "_".to_string()),
    }
}

/// The suffix to use, or `None` when suppressed
pub fn resolve_suffix(lineage: &Lineage<'_>, suffix: &Suffix) -> Option<String> {
    match suffix {
        Suffix::Off => None,
        Suffix::Set(s) => Some(s.clone()),
        Suffix::Default => Some(
            lineage
                .search_str("suffix")
                .unwrap_or_else(|| lineage.core().name().to_lowercase()),
        ),
    }
}

/// The primary input filename searched up the chain, else `step_<name><output_ext>`
pub fn default_output_file(lineage: &Lineage<'_>, input_file: Option<&str>) -> String {
    if let Some(input) = input_file {
        return input.to_string();
    }
    if let Some(input) = lineage.search(|core| core.input_filename().map(str::to_string)) {
        return input;
    }
    let core = lineage.core();
    format!("step_{}{}", core.name(), core.output_ext().unwrap_or(""))
}

/// Compute where a result of this step is written
pub fn make_output_path(
    lineage: &Lineage<'_>,
    request: &OutputPathRequest,
) -> Result<PathBuf, OutputPathError> {
    let core = lineage.core();

    let basepath = request
        .basepath
        .clone()
        .or_else(|| {
            if core.search_output_file() {
                lineage.search_str("output_file")
            } else {
                None
            }
        })
        .unwrap_or_else(|| default_output_file(lineage, None));

    let file_name = Path::new(&basepath)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, base_ext) = split_extension(&file_name);

    let ext = request
        .ext
        .clone()
        .or_else(|| core.output_ext().map(str::to_string))
        .or_else(|| (!base_ext.is_empty()).then(|| base_ext.to_string()))
        .unwrap_or_default();
    let ext = ext.strip_prefix('.').unwrap_or(&ext).to_string();

    let formatter = FormatTemplate::default();
    let components: Vec<(&str, Option<&str>)> = request
        .components
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_deref()))
        .collect();
    let components = formatter.format("", &components);

    let (basename, template, suffix_sep, suffix) = match resolve_suffix(lineage, &request.suffix) {
        Some(suffix) => {
            let (basename, separator) = (core.class().suffix_remover())(stem);
            (basename, "{basename}{components}{suffix_sep}{suffix}", separator, suffix)
        }
        None => (stem.to_string(), "{basename}{components}", String::new(), String::new()),
    };
    let mut name = formatter.format(
        template,
        &[
            ("basename", Some(basename.as_str())),
            ("components", Some(components.as_str())),
            ("suffix_sep", Some(suffix_sep.as_str())),
            ("suffix", Some(suffix.as_str())),
        ],
    );
    if !ext.is_empty() {
        name.push('.');
        name.push_str(&ext);
    }

    let output_dir = match lineage.search_str("output_dir") {
        Some(dir) => expand_path(&dir)?,
        None => String::new(),
    };
    Ok(Path::new(&output_dir).join(name))
}
