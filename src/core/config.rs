//! Configuration fragments: loading, merging and validation

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::error::{ConfigError, ValidationError};
use crate::core::schema::{ParameterSchema, PathContext, SchemaNode};
use crate::core::value::{yaml_key, Origin, Tagged, Value};
use crate::persistence::ParameterFile;

/// Keys a config may carry that are consumed before validation
const CONSTRUCTION_KEYS: &[&str] = &["class", "name", "config_file"];

/// One entry of a fragment
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigEntry {
    Value(Tagged),
    Section(ConfigFragment),
}

/// Ordered, possibly nested set of tagged parameter values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFragment {
    entries: IndexMap<String, ConfigEntry>,
}

impl ConfigFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigEntry> {
        self.entries.get(key)
    }

    pub fn tagged(&self, key: &str) -> Option<&Tagged> {
        match self.entries.get(key) {
            Some(ConfigEntry::Value(tagged)) => Some(tagged),
            _ => None,
        }
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.tagged(key).map(|tagged| &tagged.value)
    }

    pub fn section(&self, key: &str) -> Option<&ConfigFragment> {
        match self.entries.get(key) {
            Some(ConfigEntry::Section(section)) => Some(section),
            _ => None,
        }
    }

    pub fn section_mut(&mut self, key: &str) -> Option<&mut ConfigFragment> {
        match self.entries.get_mut(key) {
            Some(ConfigEntry::Section(section)) => Some(section),
            _ => None,
        }
    }

    pub fn insert_value(&mut self, key: impl Into<String>, tagged: Tagged) {
        self.entries.insert(key.into(), ConfigEntry::Value(tagged));
    }

    pub fn insert_section(&mut self, key: impl Into<String>, section: ConfigFragment) {
        self.entries.insert(key.into(), ConfigEntry::Section(section));
    }

    pub fn remove(&mut self, key: &str) -> Option<ConfigEntry> {
        self.entries.shift_remove(key)
    }

    /// Remove a string value, returning it
    pub fn take_str(&mut self, key: &str) -> Option<String> {
        match self.entries.shift_remove(key) {
            Some(ConfigEntry::Value(Tagged {
                value: Value::Str(s),
                ..
            })) => Some(s),
            Some(ConfigEntry::Value(Tagged { value: Value::None, .. })) | None => None,
            Some(ConfigEntry::Value(tagged)) => Some(tagged.value.to_string()),
            Some(section) => {
                self.entries.insert(key.to_string(), section);
                None
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigEntry)> {
        self.entries.iter()
    }

    /// Build from a YAML mapping, tagging every leaf with `origin`
    pub fn from_yaml(node: &serde_yaml::Value, origin: Origin) -> Option<Self> {
        match node {
            serde_yaml::Value::Null => Some(Self::new()),
            serde_yaml::Value::Mapping(map) => {
                let mut fragment = Self::new();
                for (key, value) in map {
                    let key = yaml_key(key);
                    match value {
                        serde_yaml::Value::Mapping(_) => {
                            let section = Self::from_yaml(value, origin)?;
                            fragment.insert_section(key, section);
                        }
                        other => fragment.insert_value(key, Tagged::new(origin, Value::from_yaml(other))),
                    }
                }
                Some(fragment)
            }
            serde_yaml::Value::Tagged(tagged) => Self::from_yaml(&tagged.value, origin),
            _ => None,
        }
    }

    /// Build from keyword values; nested maps become sections
    pub fn from_values(values: &IndexMap<String, Value>, origin: Origin) -> Self {
        let mut fragment = Self::new();
        for (key, value) in values {
            match value {
                Value::Map(map) => fragment.insert_section(key.clone(), Self::from_values(map, origin)),
                other => fragment.insert_value(key.clone(), Tagged::new(origin, other.clone())),
            }
        }
        fragment
    }

    /// Set `a.b.c` creating intermediate sections
    pub fn set_dotted(&mut self, dotted: &str, tagged: Tagged) {
        match dotted.split_once('.') {
            None => self.insert_value(dotted, tagged),
            Some((head, rest)) => {
                if self.section(head).is_none() {
                    self.insert_section(head, ConfigFragment::new());
                }
                if let Some(section) = self.section_mut(head) {
                    section.set_dotted(rest, tagged);
                }
            }
        }
    }

    /// Build from `key=value` pairs with dotted keys, as given on a command line
    pub fn from_dotted<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>, origin: Origin) -> Self {
        let mut fragment = Self::new();
        for (key, value) in pairs {
            fragment.set_dotted(key, Tagged::new(origin, value));
        }
        fragment
    }

    /// Merge `source` into this fragment in place
    pub fn merge(&mut self, source: &ConfigFragment) {
        merge_config(self, source);
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        serde_yaml::Value::Mapping(
            self.entries
                .iter()
                .map(|(key, entry)| {
                    let value = match entry {
                        ConfigEntry::Value(tagged) => tagged.value.to_yaml(),
                        ConfigEntry::Section(section) => section.to_yaml(),
                    };
                    (serde_yaml::Value::String(key.clone()), value)
                })
                .collect(),
        )
    }

    /// Plain values with provenance dropped
    pub fn to_values(&self) -> IndexMap<String, Value> {
        self.entries
            .iter()
            .map(|(key, entry)| {
                let value = match entry {
                    ConfigEntry::Value(tagged) => tagged.value.clone(),
                    ConfigEntry::Section(section) => Value::Map(section.to_values()),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

/// Recursive merge: sections merge, leaves overwrite, missing keys are added
pub fn merge_config(target: &mut ConfigFragment, source: &ConfigFragment) {
    for (key, entry) in &source.entries {
        match (target.entries.get_mut(key), entry) {
            (Some(ConfigEntry::Section(existing)), ConfigEntry::Section(incoming)) => {
                merge_config(existing, incoming);
            }
            (Some(slot), incoming) => *slot = incoming.clone(),
            (None, incoming) => {
                target.entries.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Load a YAML config file. Leaves are tagged as coming from a file.
///
/// Exported parameter files (`class`, `name`, `parameters`, `steps`) are
/// flattened into the plain layout.
pub fn load_config_file(path: impl AsRef<Path>) -> Result<ConfigFragment, ConfigError> {
    load_config_file_as(path, Origin::File)
}

pub fn load_config_file_as(path: impl AsRef<Path>, origin: Origin) -> Result<ConfigFragment, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let node: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let is_parameter_file = node
        .as_mapping()
        .and_then(|map| map.get("parameters"))
        .is_some_and(serde_yaml::Value::is_mapping);
    if is_parameter_file {
        let file: ParameterFile = serde_yaml::from_value(node).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        return Ok(file.to_fragment(origin));
    }

    ConfigFragment::from_yaml(&node, origin).ok_or_else(|| ConfigError::NotAMapping {
        path: path.to_path_buf(),
    })
}

/// Coerce every leaf against the schema, fill defaults and resolve paths
pub fn validate(
    config: &ConfigFragment,
    schema: &ParameterSchema,
    paths: &PathContext,
) -> Result<ConfigFragment, ValidationError> {
    validate_section(config, schema, paths, false, "")
}

/// Validate a keyword mapping. With `allow_missing`, absent required leaves are skipped.
pub fn config_from_dict(
    values: &IndexMap<String, Value>,
    schema: &ParameterSchema,
    root_dir: impl Into<PathBuf>,
    allow_missing: bool,
) -> Result<ConfigFragment, ValidationError> {
    let fragment = ConfigFragment::from_values(values, Origin::Keyword);
    validate_section(&fragment, schema, &PathContext::new(root_dir), allow_missing, "")
}

fn validate_section(
    config: &ConfigFragment,
    schema: &ParameterSchema,
    paths: &PathContext,
    allow_missing: bool,
    prefix: &str,
) -> Result<ConfigFragment, ValidationError> {
    let dotted = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };

    let mut out = ConfigFragment::new();
    for (key, node) in schema.iter() {
        match (node, config.get(key)) {
            (SchemaNode::Leaf(spec), Some(ConfigEntry::Value(tagged))) => {
                let value = spec.coerce(&dotted(key), tagged, paths)?;
                out.insert_value(key.clone(), Tagged::new(tagged.origin, value));
            }
            (SchemaNode::Leaf(_), Some(ConfigEntry::Section(_))) => {
                return Err(ValidationError::new(dotted(key), "expected a value, found a section"));
            }
            (SchemaNode::Leaf(spec), None) => match &spec.default {
                Some(default) => {
                    let tagged = Tagged::new(Origin::Default, default.clone());
                    let value = spec.coerce(&dotted(key), &tagged, paths)?;
                    out.insert_value(key.clone(), Tagged::new(Origin::Default, value));
                }
                None if allow_missing => {}
                None => return Err(ValidationError::new(dotted(key), "required parameter is missing")),
            },
            (SchemaNode::Section(section_schema), entry) => {
                let empty = ConfigFragment::new();
                let section = match entry {
                    Some(ConfigEntry::Section(section)) => section,
                    Some(ConfigEntry::Value(_)) => {
                        return Err(ValidationError::new(dotted(key), "expected a section, found a value"));
                    }
                    None => &empty,
                };
                let validated = validate_section(section, section_schema, paths, allow_missing, &dotted(key))?;
                out.insert_section(key.clone(), validated);
            }
        }
    }

    for key in config.keys() {
        if schema.contains_key(key) {
            continue;
        }
        if CONSTRUCTION_KEYS.contains(&key.as_str()) {
            debug!("Dropping construction key '{}' during validation", dotted(key));
        } else {
            warn!("Config parameter '{}' is not in the schema and is ignored", dotted(key));
        }
    }

    Ok(out)
}
