//! Reference service backed by a local rules file
//!
//! Rules are read from YAML:
//!
//! ```yaml
//! rules:
//!   - reftype: pars-flatfieldstep
//!     path: refs/flat_pars.asdf
//!     observatory: jwst
//!     match:
//!       META.INSTRUMENT.NAME: NIRCAM
//! ```
//!
//! The first rule whose reftype, observatory and match parameters all agree
//! with a lookup wins. Relative paths are taken from the rules file's directory.

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{CrdsError, ReferenceLookup, ReferenceService};
use crate::core::data::CrdsParameters;

/// One lookup rule
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReferenceRule {
    /// Reference type the rule answers, e.g. `flat` or `pars-flatfieldstep`
    pub reftype: String,

    /// File returned on a match, or `N/A`
    pub path: String,

    /// Only match lookups for this observatory
    #[serde(default)]
    pub observatory: Option<String>,

    /// Selection parameters that must all be equal
    #[serde(default, rename = "match")]
    pub matches: IndexMap<String, String>,
}

impl ReferenceRule {
    pub fn new(reftype: &str, path: &str) -> Self {
        Self {
            reftype: reftype.to_string(),
            path: path.to_string(),
            observatory: None,
            matches: IndexMap::new(),
        }
    }

    pub fn with_observatory(mut self, observatory: &str) -> Self {
        self.observatory = Some(observatory.to_string());
        self
    }

    pub fn with_match(mut self, key: &str, value: &str) -> Self {
        self.matches.insert(key.to_string(), value.to_string());
        self
    }

    fn applies(&self, parameters: &CrdsParameters, reftype: &str, observatory: &str) -> bool {
        self.reftype == reftype
            && self
                .observatory
                .as_deref()
                .map_or(true, |wanted| wanted.eq_ignore_ascii_case(observatory))
            && self
                .matches
                .iter()
                .all(|(key, value)| parameters.get(key) == Some(value))
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<ReferenceRule>,
}

/// Reference service answering from an ordered rule list
#[derive(Debug, Clone, Default)]
pub struct LocalReferenceService {
    /// Rules, checked in order
    pub rules: Vec<ReferenceRule>,

    /// Directory relative rule paths are resolved against
    pub base_dir: Option<PathBuf>,
}

impl LocalReferenceService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: ReferenceRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Load rules from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, CrdsError> {
        let content = std::fs::read_to_string(path).map_err(|e| CrdsError::Rules {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file: RulesFile = serde_yaml::from_str(&content).map_err(|e| CrdsError::Rules {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let base_dir = path.parent().map(Path::to_path_buf);
        debug!("Loaded {} reference rules from {}", file.rules.len(), path.display());
        Ok(Self {
            rules: file.rules,
            base_dir,
        })
    }

    fn locate(&self, path: &str) -> String {
        let candidate = Path::new(path);
        match &self.base_dir {
            Some(base) if candidate.is_relative() => base.join(candidate).to_string_lossy().into_owned(),
            _ => path.to_string(),
        }
    }
}

impl ReferenceService for LocalReferenceService {
    fn get_reference_file(
        &self,
        parameters: &CrdsParameters,
        reftype: &str,
        observatory: &str,
    ) -> Result<ReferenceLookup, CrdsError> {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.applies(parameters, reftype, observatory))
            .ok_or_else(|| CrdsError::NoMatch {
                reftype: reftype.to_string(),
                reason: format!("none of {} rules apply", self.rules.len()),
            })?;
        match ReferenceLookup::from_name(&rule.path) {
            ReferenceLookup::Found(path) => Ok(ReferenceLookup::Found(self.locate(&path))),
            ReferenceLookup::NotApplicable => Ok(ReferenceLookup::NotApplicable),
        }
    }

    fn check_reference_open(&self, name: &str) -> Result<String, CrdsError> {
        if Path::new(name).exists() {
            Ok(name.to_string())
        } else {
            Err(CrdsError::Unreadable {
                name: name.to_string(),
                reason: "file does not exist".to_string(),
            })
        }
    }
}
