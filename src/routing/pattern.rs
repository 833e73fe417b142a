//! Pattern definitions and the read-only [`PatternIndex`].
//!
//! A pattern pairs a precomputed response with weighted heuristic
//! indicators. Definitions are loaded once (TOML or JSON), validated, and
//! compiled; nothing about an index changes after construction.
//!
//! ## File format (TOML)
//!
//! ```toml
//! [[patterns]]
//! id = "callback-hell"
//! name = "Callback hell"
//! severity = "medium"
//! threshold = 0.6
//! response = "Flatten the nesting with async/await ..."
//!
//! [[patterns.indicators]]
//! matcher = { keyword = "callback" }
//! weight = 0.4
//! description = "mentions callbacks"
//!
//! [[patterns.negative_indicators]]
//! matcher = { regex = "\\bpromise\\.all\\b" }
//! weight = 0.3
//! ```

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors arising while loading or validating pattern definitions.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The source could not be parsed as TOML/JSON.
    #[error("parse error in {source_name}: {reason}")]
    Parse {
        /// File path or other identifier of the source.
        source_name: String,
        /// Parser message.
        reason: String,
    },

    /// The definition file could not be read.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A definition violates a load-time constraint.
    #[error("pattern '{pattern}': {reason}")]
    Invalid {
        /// Offending pattern id (may be empty if the id itself is missing).
        pattern: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// Two definitions share an id.
    #[error("duplicate pattern id '{0}'")]
    DuplicateId(String),

    /// A regex matcher failed to compile.
    #[error("pattern '{pattern}' indicator {index}: invalid regex: {source}")]
    Regex {
        /// Offending pattern id.
        pattern: String,
        /// Position of the indicator in its list.
        index: usize,
        /// Compilation error.
        #[source]
        source: regex::Error,
    },
}

/// How serious the situation a pattern describes is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Low,
    /// Worth addressing.
    #[default]
    Medium,
    /// Likely to cause problems.
    High,
    /// Needs attention now.
    Critical,
}

/// Declarative matcher as written in a definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherSpec {
    /// Case-insensitive substring.
    Keyword(String),
    /// Matches if any of the case-insensitive substrings is present.
    AnyOf(Vec<String>),
    /// Case-insensitive regular expression.
    Regex(String),
}

/// A positive indicator; its weight is added when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indicator {
    /// What to look for.
    pub matcher: MatcherSpec,
    /// Contribution to the score, in `[-1.0, 1.0]`.
    pub weight: f64,
    /// Evidence text reported when the indicator matches.
    pub description: String,
}

/// A contradicting indicator; its weight is subtracted when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegativeIndicator {
    /// What to look for.
    pub matcher: MatcherSpec,
    /// Amount subtracted from the score, in `[-1.0, 1.0]`.
    pub weight: f64,
}

/// One loaded pattern: identity, detection threshold, static response and
/// indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDefinition {
    /// Unique, stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Severity of the described situation.
    #[serde(default)]
    pub severity: Severity,
    /// Optional grouping label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Minimum confidence for the pattern to count as detected, in `(0, 1]`.
    pub threshold: f64,
    /// Precomputed answer served when this pattern is chosen.
    pub response: String,
    /// Positive indicators, evaluated in order.
    pub indicators: Vec<Indicator>,
    /// Negative indicators, evaluated in order.
    #[serde(default)]
    pub negative_indicators: Vec<NegativeIndicator>,
}

#[derive(Debug, Deserialize)]
struct PatternFile {
    patterns: Vec<PatternDefinition>,
}

/// Compiled form of a [`MatcherSpec`].
#[derive(Debug, Clone)]
pub(crate) enum Matcher {
    /// Lowercased needle.
    Keyword(String),
    /// Lowercased needles.
    AnyOf(Vec<String>),
    Regex(Regex),
}

impl Matcher {
    fn compile(spec: &MatcherSpec, pattern: &str, index: usize) -> Result<Self, PatternError> {
        let invalid = |reason: String| PatternError::Invalid {
            pattern: pattern.to_string(),
            reason,
        };

        match spec {
            MatcherSpec::Keyword(k) => {
                if k.trim().is_empty() {
                    return Err(invalid(format!("indicator {index}: empty keyword matcher")));
                }
                Ok(Self::Keyword(k.to_lowercase()))
            }
            MatcherSpec::AnyOf(list) => {
                if list.is_empty() {
                    return Err(invalid(format!("indicator {index}: empty any_of matcher")));
                }
                if list.iter().any(|k| k.trim().is_empty()) {
                    return Err(invalid(format!(
                        "indicator {index}: any_of matcher contains a blank keyword"
                    )));
                }
                Ok(Self::AnyOf(list.iter().map(|k| k.to_lowercase()).collect()))
            }
            MatcherSpec::Regex(expr) => {
                if expr.is_empty() {
                    return Err(invalid(format!("indicator {index}: empty regex matcher")));
                }
                RegexBuilder::new(expr)
                    .case_insensitive(true)
                    .build()
                    .map(Self::Regex)
                    .map_err(|source| PatternError::Regex {
                        pattern: pattern.to_string(),
                        index,
                        source,
                    })
            }
        }
    }

    /// `lower` must be the lowercased form of `text`.
    pub(crate) fn is_match(&self, text: &str, lower: &str) -> bool {
        match self {
            Self::Keyword(k) => lower.contains(k.as_str()),
            Self::AnyOf(list) => list.iter().any(|k| lower.contains(k.as_str())),
            Self::Regex(re) => re.is_match(text),
        }
    }
}

/// A validated definition plus its compiled matchers.
#[derive(Debug, Clone)]
pub(crate) struct CompiledPattern {
    pub(crate) definition: PatternDefinition,
    pub(crate) positive: Vec<Matcher>,
    pub(crate) negative: Vec<Matcher>,
}

fn check_weight(weight: f64, pattern: &str, what: &str, index: usize) -> Result<(), PatternError> {
    if !weight.is_finite() || !(-1.0..=1.0).contains(&weight) {
        return Err(PatternError::Invalid {
            pattern: pattern.to_string(),
            reason: format!("{what} {index}: weight {weight} must be finite and within [-1, 1]"),
        });
    }
    Ok(())
}

impl CompiledPattern {
    fn compile(definition: PatternDefinition) -> Result<Self, PatternError> {
        let id = definition.id.clone();
        let invalid = |reason: &str| PatternError::Invalid {
            pattern: id.clone(),
            reason: reason.to_string(),
        };

        if id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if definition.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if !definition.threshold.is_finite()
            || definition.threshold <= 0.0
            || definition.threshold > 1.0
        {
            return Err(PatternError::Invalid {
                pattern: id.clone(),
                reason: format!("threshold {} must be within (0, 1]", definition.threshold),
            });
        }
        if definition.response.trim().is_empty() {
            return Err(invalid("response must not be empty"));
        }
        if definition.indicators.is_empty() {
            return Err(invalid("at least one positive indicator is required"));
        }

        let mut positive = Vec::with_capacity(definition.indicators.len());
        for (i, indicator) in definition.indicators.iter().enumerate() {
            check_weight(indicator.weight, &id, "indicator", i)?;
            positive.push(Matcher::compile(&indicator.matcher, &id, i)?);
        }

        let mut negative = Vec::with_capacity(definition.negative_indicators.len());
        for (i, indicator) in definition.negative_indicators.iter().enumerate() {
            check_weight(indicator.weight, &id, "negative indicator", i)?;
            negative.push(Matcher::compile(&indicator.matcher, &id, i)?);
        }

        Ok(Self {
            definition,
            positive,
            negative,
        })
    }
}

/// Immutable collection of compiled patterns.
///
/// Share it behind an `Arc`; it has no interior mutability.
#[derive(Debug, Clone, Default)]
pub struct PatternIndex {
    patterns: Vec<CompiledPattern>,
    by_id: HashMap<String, usize>,
}

impl PatternIndex {
    /// Validate and compile a set of definitions.
    ///
    /// # Errors
    ///
    /// Returns the first violation found: empty ids/names/responses,
    /// thresholds outside `(0, 1]`, non-finite or out-of-range weights, empty
    /// matchers, invalid regexes, missing positive indicators, or duplicate ids.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = PatternDefinition>,
    ) -> Result<Self, PatternError> {
        let mut patterns = Vec::new();
        let mut by_id = HashMap::new();

        for definition in definitions {
            let compiled = CompiledPattern::compile(definition)?;
            let id = compiled.definition.id.clone();
            if by_id.contains_key(&id) {
                return Err(PatternError::DuplicateId(id));
            }
            by_id.insert(id, patterns.len());
            patterns.push(compiled);
        }

        tracing::info!(patterns = patterns.len(), "pattern index loaded");
        Ok(Self { patterns, by_id })
    }

    /// Parse a TOML document with a top-level `[[patterns]]` array.
    ///
    /// # Errors
    ///
    /// [`PatternError::Parse`] on malformed TOML, otherwise as
    /// [`from_definitions`](Self::from_definitions).
    pub fn from_toml_str(content: &str, source_name: &str) -> Result<Self, PatternError> {
        let file: PatternFile = toml::from_str(content).map_err(|e| PatternError::Parse {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_definitions(file.patterns)
    }

    /// Parse a JSON document of the form `{"patterns": [...]}`.
    ///
    /// # Errors
    ///
    /// [`PatternError::Parse`] on malformed JSON, otherwise as
    /// [`from_definitions`](Self::from_definitions).
    pub fn from_json_str(content: &str, source_name: &str) -> Result<Self, PatternError> {
        let file: PatternFile = serde_json::from_str(content).map_err(|e| PatternError::Parse {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_definitions(file.patterns)
    }

    /// Load definitions from disk. Files ending in `.json` are parsed as
    /// JSON, everything else as TOML.
    ///
    /// # Errors
    ///
    /// [`PatternError::Io`] if the file cannot be read, otherwise as the
    /// matching `from_*_str` constructor.
    pub fn load_from_file(path: &Path) -> Result<Self, PatternError> {
        let name = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| PatternError::Io {
            file: name.clone(),
            source: e,
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content, &name)
        } else {
            Self::from_toml_str(&content, &name)
        }
    }

    /// Number of loaded patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// `true` if no patterns are loaded.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Look up a definition by id.
    pub fn get(&self, id: &str) -> Option<&PatternDefinition> {
        self.by_id
            .get(id)
            .and_then(|&i| self.patterns.get(i))
            .map(|p| &p.definition)
    }

    /// Iterate definitions in load order.
    pub fn iter(&self) -> impl Iterator<Item = &PatternDefinition> {
        self.patterns.iter().map(|p| &p.definition)
    }

    pub(crate) fn compiled(&self) -> &[CompiledPattern] {
        &self.patterns
    }
}
