use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ErrorRecord, Priority};

/* ============================= RULE TYPES ============================= */

/// Declarative classification rule. Evaluated in declaration order;
/// the first enabled rule whose criteria all hold wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,

    #[serde(rename = "match")]
    pub matcher: MatchSpec,

    #[serde(default)]
    pub priority: Priority,

    /// Absent means classify-only: the error is recorded but never acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationSpec>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Match criteria. All specified criteria are ANDed; at least one of
/// `pattern` / `keywords` must be present.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MatchSpec {
    /// Regular expression tried against the canonical message and the raw line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Substring match against message or raw line; any hit satisfies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Label matchers. A value starting with `!` must not equal the rest,
    /// `~` compiles the rest as a regex, anything else is exact equality.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Namespace whitelist; `!`-prefixed entries are a blacklist. An
    /// all-negated list admits anything not explicitly negated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

/// What to do when the rule matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationSpec {
    pub action: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    300
}

/// Classification outcome: the matched rule's name and priority, or the
/// defaults when nothing matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule_name: String,
    pub priority: Priority,
}

/* ============================= ERRORS ============================= */

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule '{rule}' must specify a pattern or keywords")]
    EmptyMatch { rule: String },

    #[error("rule '{rule}': invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("rule '{rule}': invalid label matcher for '{key}': {source}")]
    InvalidLabelPattern {
        rule: String,
        key: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("duplicate rule name '{rule}'")]
    DuplicateName { rule: String },
}

/* ============================= COMPILED FORM ============================= */

#[derive(Debug)]
enum LabelMatcher {
    Exact(String),
    NotEqual(String),
    Matches(Regex),
}

#[derive(Debug)]
struct CompiledRule {
    rule: Rule,
    pattern: Option<Regex>,
    labels: Vec<(String, LabelMatcher)>,
}

fn compile_rule(rule: &Rule) -> Result<CompiledRule, RuleError> {
    if rule.matcher.pattern.is_none() && rule.matcher.keywords.is_empty() {
        return Err(RuleError::EmptyMatch {
            rule: rule.name.clone(),
        });
    }

    let pattern = match &rule.matcher.pattern {
        Some(p) => Some(Regex::new(p).map_err(|e| RuleError::InvalidPattern {
            rule: rule.name.clone(),
            source: Box::new(e),
        })?),
        None => None,
    };

    let mut labels = Vec::new();
    for (key, expected) in &rule.matcher.labels {
        let matcher = if let Some(rest) = expected.strip_prefix('!') {
            LabelMatcher::NotEqual(rest.to_string())
        } else if let Some(rest) = expected.strip_prefix('~') {
            let re = Regex::new(rest).map_err(|e| RuleError::InvalidLabelPattern {
                rule: rule.name.clone(),
                key: key.clone(),
                source: Box::new(e),
            })?;
            LabelMatcher::Matches(re)
        } else {
            LabelMatcher::Exact(expected.clone())
        };
        labels.push((key.clone(), matcher));
    }

    Ok(CompiledRule {
        rule: rule.clone(),
        pattern,
        labels,
    })
}

/// Validate a single rule without building an engine. Used by the
/// offline `rules validate` tooling.
pub fn validate_rule(rule: &Rule) -> Result<(), RuleError> {
    compile_rule(rule).map(|_| ())
}

/* ============================= ENGINE ============================= */

/// Immutable, ordered rule set with patterns compiled up front.
/// Construction fails on the first invalid rule; a process must not
/// start with a rule set it cannot evaluate.
#[derive(Debug)]
pub struct RuleEngine {
    compiled: Vec<CompiledRule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Result<Self, RuleError> {
        let mut seen = std::collections::HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in &rules {
            if !seen.insert(rule.name.clone()) {
                return Err(RuleError::DuplicateName {
                    rule: rule.name.clone(),
                });
            }
            compiled.push(compile_rule(rule)?);
        }
        Ok(Self { compiled })
    }

    /// Classify an error record: first enabled rule whose criteria all
    /// hold, else P4 / "default".
    pub fn classify(&self, record: &ErrorRecord) -> RuleMatch {
        for compiled in &self.compiled {
            if !compiled.rule.enabled {
                continue;
            }
            if self.matches(compiled, record) {
                return RuleMatch {
                    rule_name: compiled.rule.name.clone(),
                    priority: compiled.rule.priority,
                };
            }
        }
        RuleMatch {
            rule_name: "default".to_string(),
            priority: Priority::P4,
        }
    }

    fn matches(&self, compiled: &CompiledRule, record: &ErrorRecord) -> bool {
        if !namespace_allowed(&compiled.rule.matcher.namespaces, &record.namespace) {
            return false;
        }

        for (key, matcher) in &compiled.labels {
            let actual = record.labels.get(key);
            let ok = match matcher {
                LabelMatcher::Exact(want) => actual.is_some_and(|v| v == want),
                LabelMatcher::NotEqual(want) => actual != Some(want),
                LabelMatcher::Matches(re) => actual.is_some_and(|v| re.is_match(v)),
            };
            if !ok {
                return false;
            }
        }

        if let Some(re) = &compiled.pattern {
            if !re.is_match(&record.message) && !re.is_match(&record.raw_line) {
                return false;
            }
        }

        if !compiled.rule.matcher.keywords.is_empty() {
            let hit = compiled.rule.matcher.keywords.iter().any(|kw| {
                record.message.contains(kw.as_str()) || record.raw_line.contains(kw.as_str())
            });
            if !hit {
                return false;
            }
        }

        true
    }

    /// Rules in declaration order, for the read API.
    pub fn rules(&self) -> Vec<&Rule> {
        self.compiled.iter().map(|c| &c.rule).collect()
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.compiled
            .iter()
            .map(|c| &c.rule)
            .find(|r| r.name == name)
    }

    /// Compile `pattern` fresh and try it against `sample`. Engine state
    /// is untouched; invalid patterns surface as the compile error.
    pub fn test_pattern(pattern: &str, sample: &str) -> Result<bool, regex::Error> {
        Ok(Regex::new(pattern)?.is_match(sample))
    }
}

fn namespace_allowed(entries: &[String], namespace: &str) -> bool {
    if entries.is_empty() {
        return true;
    }

    let mut has_positive = false;
    let mut positive_hit = false;
    for entry in entries {
        match entry.strip_prefix('!') {
            Some(negated) => {
                if negated == namespace {
                    return false;
                }
            }
            None => {
                has_positive = true;
                if entry == namespace {
                    positive_hit = true;
                }
            }
        }
    }

    !has_positive || positive_hit
}

/* ============================= TESTS ============================= */
