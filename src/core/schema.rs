//! Parameter schemas
//!
//! Each step class declares its parameters as text, one declaration per
//! line:
//!
//! ```text
//! # full-line comments and blank lines are ignored
//! threshold = float(default=3.0)   # Rejection threshold
//! mode = option('fast', 'slow', default='fast')
//! output_file = output_file(default=None)
//! ```
//!
//! [`resolve`] merges the declarations of a class and all its bases, adds the
//! reference override parameters and, for pipelines, the `steps` section.

use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::core::class::StepClass;
use crate::core::error::{SchemaError, ValidationError};
use crate::core::output::expand_path;
use crate::core::value::{Origin, Tagged, Value};

/// Keys the command line and `call` reserve for themselves
pub const RESERVED_PARAMETERS: &[&str] = &["debug", "logcfg", "verbose"];

/// Type tag of a schema leaf
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    String,
    Boolean,
    Integer,
    Float,
    List,
    InputFile,
    OutputFile,
    StringOrModel,
    Option(Vec<String>),
}

impl ParamKind {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "string" => ParamKind::String,
            "boolean" | "bool" => ParamKind::Boolean,
            "integer" | "int" => ParamKind::Integer,
            "float" => ParamKind::Float,
            "list" | "string_list" | "int_list" | "float_list" | "force_list" => ParamKind::List,
            "input_file" => ParamKind::InputFile,
            "output_file" => ParamKind::OutputFile,
            "is_string_or_datamodel" => ParamKind::StringOrModel,
            "option" => ParamKind::Option(Vec::new()),
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Boolean => "boolean",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::List => "list",
            ParamKind::InputFile => "input_file",
            ParamKind::OutputFile => "output_file",
            ParamKind::StringOrModel => "is_string_or_datamodel",
            ParamKind::Option(_) => "option",
        }
    }
}

/// Directories used to resolve relative path parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PathContext {
    /// Directory of the config file the values came from
    pub root_dir: PathBuf,
    /// Working directory, used for command-line values
    pub cwd: PathBuf,
}

impl PathContext {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    fn resolve(&self, raw: &str, origin: Origin) -> Result<PathBuf, String> {
        let expanded = expand_path(raw).map_err(|e| e.to_string())?;
        let path = Path::new(&expanded);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let base = match origin {
            Origin::Cli => self.cwd.clone(),
            _ if self.root_dir.is_absolute() => self.root_dir.clone(),
            _ => self.cwd.join(&self.root_dir),
        };
        Ok(normalize(&base.join(path)))
    }
}

fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A schema leaf
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub kind: ParamKind,
    /// `None` means the parameter is required
    pub default: Option<Value>,
    pub comment: Option<String>,
}

impl ParamSpec {
    pub fn new(kind: ParamKind, default: Option<Value>) -> Self {
        Self {
            kind,
            default,
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn allows_none(&self) -> bool {
        matches!(self.default, Some(Value::None))
    }

    /// Coerce a tagged value to this leaf's type
    pub fn coerce(&self, key: &str, tagged: &Tagged, paths: &PathContext) -> Result<Value, ValidationError> {
        let fail = |reason: String| ValidationError::new(key, reason);
        let value = &tagged.value;

        let is_none_literal = matches!(value, Value::Str(s) if s == "None");
        if value.is_none() || (is_none_literal && self.allows_none()) {
            return if self.allows_none() {
                Ok(Value::None)
            } else {
                Err(fail("None is not allowed".to_string()))
            };
        }

        match &self.kind {
            ParamKind::String => match value {
                Value::Str(_) => Ok(value.clone()),
                Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(Value::Str(value.to_string())),
                other => Err(fail(format!("expected a string, found {}", other.kind_name()))),
            },
            ParamKind::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Int(0) => Ok(Value::Bool(false)),
                Value::Int(1) => Ok(Value::Bool(true)),
                Value::Str(s) => parse_bool(s)
                    .map(Value::Bool)
                    .ok_or_else(|| fail(format!("'{}' is not a boolean", s))),
                other => Err(fail(format!("expected a boolean, found {}", other.kind_name()))),
            },
            ParamKind::Integer => match value {
                Value::Int(_) => Ok(value.clone()),
                Value::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| fail(format!("'{}' is not an integer", s))),
                other => Err(fail(format!("expected an integer, found {}", other.kind_name()))),
            },
            ParamKind::Float => match value {
                Value::Float(_) => Ok(value.clone()),
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| fail(format!("'{}' is not a float", s))),
                other => Err(fail(format!("expected a float, found {}", other.kind_name()))),
            },
            ParamKind::List => match value {
                Value::List(_) => Ok(value.clone()),
                Value::Str(s) if s.trim().is_empty() => Ok(Value::List(Vec::new())),
                Value::Str(s) => Ok(Value::List(
                    s.split(',').map(|item| Value::from(item.trim())).collect(),
                )),
                other => Ok(Value::List(vec![other.clone()])),
            },
            ParamKind::InputFile => {
                let raw = path_string(value).ok_or_else(|| fail(format!("expected a path, found {}", value.kind_name())))?;
                let resolved = paths.resolve(&raw, tagged.origin).map_err(fail)?;
                if !resolved.exists() {
                    return Err(fail(format!("input file {} does not exist", resolved.display())));
                }
                Ok(Value::Str(resolved.to_string_lossy().into_owned()))
            }
            ParamKind::OutputFile => {
                let raw = path_string(value).ok_or_else(|| fail(format!("expected a path, found {}", value.kind_name())))?;
                let resolved = paths.resolve(&raw, tagged.origin).map_err(fail)?;
                Ok(Value::Str(resolved.to_string_lossy().into_owned()))
            }
            ParamKind::StringOrModel => match value {
                Value::Str(_) | Value::Model(_) => Ok(value.clone()),
                other => Err(fail(format!("expected a string or data model, found {}", other.kind_name()))),
            },
            ParamKind::Option(choices) => {
                let text = match value {
                    Value::Str(s) => s.clone(),
                    Value::Int(_) | Value::Float(_) | Value::Bool(_) => value.to_string(),
                    other => return Err(fail(format!("expected one of {:?}, found {}", choices, other.kind_name()))),
                };
                if choices.iter().any(|choice| *choice == text) {
                    Ok(Value::Str(text))
                } else {
                    Err(fail(format!("'{}' is not one of {:?}", text, choices)))
                }
            }
        }
    }

    fn render(&self) -> String {
        let mut args: Vec<String> = Vec::new();
        if let ParamKind::Option(choices) = &self.kind {
            args.extend(choices.iter().map(|c| format!("'{}'", c)));
        }
        if let Some(default) = &self.default {
            args.push(format!("default={}", render_literal(default)));
        }
        format!("{}({})", self.kind.name(), args.join(", "))
    }
}

fn path_string(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn render_literal(value: &Value) -> String {
    match value {
        Value::Str(s) => format!("'{}'", s),
        Value::List(items) if items.is_empty() => "list()".to_string(),
        Value::List(items) => format!(
            "[{}]",
            items.iter().map(render_literal).collect::<Vec<_>>().join(", ")
        ),
        other => other.to_string(),
    }
}

/// A node of the schema tree
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    Leaf(ParamSpec),
    Section(ParameterSchema),
}

/// Ordered tree of parameter declarations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    entries: IndexMap<String, SchemaNode>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the declaration text of one class
    pub fn parse(class: &str, text: &str) -> Result<Self, SchemaError> {
        let mut schema = Self::new();
        for (index, raw_line) in text.lines().enumerate() {
            let (code, comment) = split_comment(raw_line);
            let code = code.trim();
            if code.is_empty() {
                continue;
            }
            let captures = declaration_regex().and_then(|re| re.captures(code)).ok_or_else(|| SchemaError::Syntax {
                class: class.to_string(),
                line: index + 1,
                text: raw_line.trim().to_string(),
            })?;
            let key = &captures["key"];
            let kind_name = &captures["kind"];
            let mut kind = ParamKind::parse(kind_name).ok_or_else(|| SchemaError::UnknownKind {
                class: class.to_string(),
                key: key.to_string(),
                kind: kind_name.to_string(),
            })?;

            let mut default = None;
            for argument in split_top_level(&captures["args"]) {
                let bad_argument = || SchemaError::BadArgument {
                    class: class.to_string(),
                    key: key.to_string(),
                    argument: argument.to_string(),
                };
                match argument.split_once('=') {
                    Some((name, literal)) if is_identifier(name.trim()) => {
                        if name.trim() == "default" {
                            default = Some(parse_literal(literal.trim()).ok_or_else(bad_argument)?);
                        }
                        // Range and length bounds are accepted but not enforced
                    }
                    _ => match &mut kind {
                        ParamKind::Option(choices) => {
                            let choice = parse_literal(argument.trim()).ok_or_else(bad_argument)?;
                            choices.push(choice.to_string());
                        }
                        _ => return Err(bad_argument()),
                    },
                }
            }

            let mut spec = ParamSpec::new(kind, default);
            spec.comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
            schema.entries.insert(key.to_string(), SchemaNode::Leaf(spec));
        }
        Ok(schema)
    }

    /// Merge `other` over `self`. Colliding leaves are replaced but keep
    /// their comment unless `other` supplies one.
    pub fn merge(&mut self, other: &ParameterSchema) {
        for (key, node) in &other.entries {
            match (self.entries.get_mut(key), node) {
                (Some(SchemaNode::Section(existing)), SchemaNode::Section(incoming)) => {
                    existing.merge(incoming);
                }
                (Some(SchemaNode::Leaf(existing)), SchemaNode::Leaf(incoming)) => {
                    let comment = incoming.comment.clone().or_else(|| existing.comment.take());
                    *existing = ParamSpec {
                        comment,
                        ..incoming.clone()
                    };
                }
                (Some(slot), incoming) => *slot = incoming.clone(),
                (None, incoming) => {
                    self.entries.insert(key.clone(), incoming.clone());
                }
            }
        }
    }

    pub fn insert_leaf(&mut self, key: impl Into<String>, spec: ParamSpec) {
        self.entries.insert(key.into(), SchemaNode::Leaf(spec));
    }

    pub fn insert_section(&mut self, key: impl Into<String>, section: ParameterSchema) {
        self.entries.insert(key.into(), SchemaNode::Section(section));
    }

    pub fn get(&self, key: &str) -> Option<&SchemaNode> {
        self.entries.get(key)
    }

    pub fn leaf(&self, key: &str) -> Option<&ParamSpec> {
        match self.entries.get(key) {
            Some(SchemaNode::Leaf(spec)) => Some(spec),
            _ => None,
        }
    }

    pub fn section(&self, key: &str) -> Option<&ParameterSchema> {
        match self.entries.get(key) {
            Some(SchemaNode::Section(section)) => Some(section),
            _ => None,
        }
    }

    /// Look up a dotted path such as `steps.flat.threshold`
    pub fn lookup(&self, dotted: &str) -> Option<&SchemaNode> {
        let mut parts = dotted.split('.');
        let mut node = self.entries.get(parts.next()?)?;
        for part in parts {
            match node {
                SchemaNode::Section(section) => node = section.entries.get(part)?,
                SchemaNode::Leaf(_) => return None,
            }
        }
        Some(node)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SchemaNode)> {
        self.entries.iter()
    }

    /// Leaves of this level only
    pub fn leaves(&self) -> impl Iterator<Item = (&String, &ParamSpec)> {
        self.entries.iter().filter_map(|(key, node)| match node {
            SchemaNode::Leaf(spec) => Some((key, spec)),
            SchemaNode::Section(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render back to declaration text, sections as indented `[name]` blocks
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let indent = "    ".repeat(depth);
        for (key, node) in &self.entries {
            match node {
                SchemaNode::Leaf(spec) => {
                    let _ = write!(out, "{}{} = {}", indent, key, spec.render());
                    if let Some(comment) = &spec.comment {
                        let _ = write!(out, "  # {}", comment);
                    }
                    out.push('\n');
                }
                SchemaNode::Section(section) => {
                    let _ = writeln!(out, "{}{}{}{}", indent, "[".repeat(depth + 1), key, "]".repeat(depth + 1));
                    section.render_into(out, depth + 1);
                }
            }
        }
    }
}

fn declaration_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<key>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?P<kind>[A-Za-z_]+)\s*\((?P<args>.*)\)$").ok()
    })
    .as_ref()
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split off a trailing `# comment` that is not inside quotes
fn split_comment(line: &str) -> (&str, Option<&str>) {
    let mut quote: Option<char> = None;
    for (index, c) in line.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '#') => return (&line[..index], Some(&line[index + 1..])),
            (None, _) => {}
        }
    }
    (line, None)
}

/// Split on commas that are not nested in quotes, brackets or parentheses
fn split_top_level(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (index, c) in args.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&args[start..index]);
                start = index + 1;
            }
            (None, _) => {}
        }
    }
    parts.push(&args[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn parse_literal(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match text {
        "None" => return Some(Value::None),
        "True" => return Some(Value::Bool(true)),
        "False" => return Some(Value::Bool(false)),
        "list()" | "[]" => return Some(Value::List(Vec::new())),
        _ => {}
    }
    let quoted = text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\'')) || (text.starts_with('"') && text.ends_with('"')));
    if quoted {
        return Some(Value::Str(text[1..text.len() - 1].to_string()));
    }
    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        return split_top_level(inner)
            .into_iter()
            .map(parse_literal)
            .collect::<Option<Vec<_>>>()
            .map(Value::List);
    }
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Int(i));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Some(Value::Float(f));
    }
    if is_identifier(text) {
        return Some(Value::Str(text.to_string()));
    }
    None
}

fn cache() -> &'static Mutex<HashMap<usize, Arc<ParameterSchema>>> {
    static CACHE: OnceLock<Mutex<HashMap<usize, Arc<ParameterSchema>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// The schema a class declares itself, without inherited parameters
pub fn own_schema(class: &'static StepClass) -> Result<ParameterSchema, SchemaError> {
    ParameterSchema::parse(class.name, class.spec)
}

/// The full schema of a step class, memoized per class
pub fn resolve(class: &'static StepClass) -> Result<Arc<ParameterSchema>, SchemaError> {
    let key = class as *const StepClass as usize;
    if let Some(schema) = cache().lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
        return Ok(Arc::clone(schema));
    }

    let mut schema = ParameterSchema::new();
    for ancestor in class.lineage() {
        schema.merge(&own_schema(ancestor)?);
    }

    for key in schema.keys() {
        if RESERVED_PARAMETERS.contains(&key.as_str()) {
            return Err(SchemaError::Reserved {
                class: class.name.to_string(),
                key: key.clone(),
            });
        }
    }

    for reftype in class.reference_types() {
        schema.insert_leaf(
            crate::reference::override_name(reftype),
            ParamSpec::new(ParamKind::StringOrModel, Some(Value::None))
                .with_comment(format!("Override the {} reference file", reftype)),
        );
    }

    if class.is_pipeline() {
        let mut steps = ParameterSchema::new();
        for def in class.step_defs {
            steps.insert_section(def.name, (*resolve(def.class)?).clone());
        }
        schema.insert_section("steps", steps);
    }

    let schema = Arc::new(schema);
    cache()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key, Arc::clone(&schema));
    Ok(schema)
}
