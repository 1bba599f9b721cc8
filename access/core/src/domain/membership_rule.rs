// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Membership Rules
//!
//! Declarative continuous queries that turn windowed stream content into
//! `memberIn` facts. A rule is a basic graph pattern (`where`) evaluated over
//! the union of the graphs currently in its time window, and a template
//! (`construct`) instantiated once per solution.
//!
//! ```yaml
//! id: lab308-presence
//! window: { range_ms: 10000, step_ms: 5000 }
//! where:
//!   - ["?a", "rdf:type", "ex:LocatedAt"]
//!   - ["?a", "consert:assertionSubject", "?agent"]
//!   - ["?a", "consert:assertionObject", "ex:lab308"]
//! construct:
//!   - ["?agent", "cashmere:memberIn", "$group"]
//! ```
//!
//! Pattern terms: `?name` is a variable, `$group` is the owning domain's group
//! IRI, `"text"` is a string literal, a bare integer is an `xsd:integer`
//! literal, and anything else is a prefixed name or IRI.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::rdf::{Graph, Term, Triple};
use crate::domain::vocab::expand_curie;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to read rule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid rule definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("rule '{rule}': unknown prefix in '{term}'")]
    UnknownPrefix { rule: String, term: String },

    #[error("rule '{rule}': variable ?{var} in construct is never bound by where")]
    UnboundVariable { rule: String, var: String },

    #[error("rule '{rule}': {reason}")]
    Invalid { rule: String, reason: String },
}

/// Time window over event timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    #[serde(default = "default_range_ms")]
    pub range_ms: u64,
    /// Report period; 0 reports on every arrival
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
}

fn default_range_ms() -> u64 {
    10_000
}

fn default_step_ms() -> u64 {
    5_000
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            range_ms: default_range_ms(),
            step_ms: default_step_ms(),
        }
    }
}

/// Rule as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRuleDefinition {
    pub id: String,
    #[serde(default)]
    pub window: WindowSpec,
    #[serde(default)]
    pub prefixes: HashMap<String, String>,
    /// Streams feeding this rule; empty means every stream of the domain
    #[serde(default)]
    pub streams: Vec<String>,
    #[serde(rename = "where")]
    pub where_patterns: Vec<[String; 3]>,
    pub construct: Vec<[String; 3]>,
}

impl MembershipRuleDefinition {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RuleError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Resolve names and check the rule against a domain group
    pub fn compile(&self, group_uri: &str) -> Result<MembershipRule, RuleError> {
        if self.where_patterns.is_empty() {
            return Err(RuleError::Invalid {
                rule: self.id.clone(),
                reason: "where clause is empty".to_string(),
            });
        }
        if self.construct.is_empty() {
            return Err(RuleError::Invalid {
                rule: self.id.clone(),
                reason: "construct clause is empty".to_string(),
            });
        }
        if self.window.range_ms == 0 {
            return Err(RuleError::Invalid {
                rule: self.id.clone(),
                reason: "window.range_ms must be positive".to_string(),
            });
        }

        let compile_patterns = |patterns: &[[String; 3]]| -> Result<Vec<TriplePattern>, RuleError> {
            patterns
                .iter()
                .map(|[s, p, o]| -> Result<TriplePattern, RuleError> {
                    Ok(TriplePattern([
                        self.pattern_term(s, group_uri)?,
                        self.pattern_term(p, group_uri)?,
                        self.pattern_term(o, group_uri)?,
                    ]))
                })
                .collect()
        };
        let where_patterns = compile_patterns(&self.where_patterns)?;
        let construct = compile_patterns(&self.construct)?;

        let bound: HashSet<&str> = where_patterns.iter().flat_map(|p| p.variables()).collect();
        if let Some(var) = construct
            .iter()
            .flat_map(|p| p.variables())
            .find(|v| !bound.contains(v))
        {
            return Err(RuleError::UnboundVariable {
                rule: self.id.clone(),
                var: var.to_string(),
            });
        }

        Ok(MembershipRule {
            id: self.id.clone(),
            window: self.window,
            streams: self.streams.clone(),
            where_patterns,
            construct,
        })
    }

    fn pattern_term(&self, raw: &str, group_uri: &str) -> Result<PatternTerm, RuleError> {
        let raw = raw.trim();
        if let Some(var) = raw.strip_prefix('?') {
            return Ok(PatternTerm::Var(var.to_string()));
        }
        if raw == "$group" {
            return Ok(PatternTerm::Const(Term::iri(group_uri)));
        }
        if let Some(text) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            return Ok(PatternTerm::Const(Term::string(text)));
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Ok(PatternTerm::Const(Term::integer(n)));
        }
        expand_curie(raw, &self.prefixes)
            .map(|iri| PatternTerm::Const(Term::iri(iri)))
            .ok_or_else(|| RuleError::UnknownPrefix {
                rule: self.id.clone(),
                term: raw.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternTerm {
    Var(String),
    Const(Term),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern(pub [PatternTerm; 3]);

impl TriplePattern {
    fn variables(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter_map(|t| match t {
            PatternTerm::Var(v) => Some(v.as_str()),
            PatternTerm::Const(_) => None,
        })
    }
}

type Bindings = HashMap<String, Term>;

fn resolve<'a>(term: &'a PatternTerm, bindings: &'a Bindings) -> Option<&'a Term> {
    match term {
        PatternTerm::Const(t) => Some(t),
        PatternTerm::Var(v) => bindings.get(v),
    }
}

fn bind(term: &PatternTerm, value: &Term, bindings: &mut Bindings) -> bool {
    match term {
        PatternTerm::Const(t) => t == value,
        PatternTerm::Var(v) => match bindings.get(v) {
            Some(existing) => existing == value,
            None => {
                bindings.insert(v.clone(), value.clone());
                true
            }
        },
    }
}

/// Compiled rule ready for evaluation
#[derive(Debug, Clone)]
pub struct MembershipRule {
    pub id: String,
    pub window: WindowSpec,
    pub streams: Vec<String>,
    where_patterns: Vec<TriplePattern>,
    construct: Vec<TriplePattern>,
}

impl MembershipRule {
    /// Whether updates from `stream_uri` feed this rule
    pub fn listens_to(&self, stream_uri: &str) -> bool {
        self.streams.is_empty() || self.streams.iter().any(|s| s == stream_uri)
    }

    pub fn reports_on_arrival(&self) -> bool {
        self.window.step_ms == 0
    }

    /// Evaluate the rule over `graph`, returning the constructed triples
    pub fn evaluate(&self, graph: &Graph) -> Vec<Triple> {
        let mut solutions: Vec<Bindings> = vec![Bindings::new()];
        for pattern in &self.where_patterns {
            let mut next = Vec::new();
            for bindings in &solutions {
                let [s, p, o] = &pattern.0;
                let candidates = graph.matching(
                    resolve(s, bindings),
                    resolve(p, bindings),
                    resolve(o, bindings),
                );
                for triple in candidates {
                    let mut extended = bindings.clone();
                    if bind(s, &triple.subject, &mut extended)
                        && bind(p, &triple.predicate, &mut extended)
                        && bind(o, &triple.object, &mut extended)
                    {
                        next.push(extended);
                    }
                }
            }
            if next.is_empty() {
                return Vec::new();
            }
            solutions = next;
        }

        let mut results = Vec::new();
        for bindings in &solutions {
            for pattern in &self.construct {
                let [s, p, o] = &pattern.0;
                let (Some(s), Some(p), Some(o)) = (
                    resolve(s, bindings),
                    resolve(p, bindings),
                    resolve(o, bindings),
                ) else {
                    continue;
                };
                if s.is_literal() || !p.is_iri() {
                    continue;
                }
                results.push(Triple::new(s.clone(), p.clone(), o.clone()));
            }
        }
        results
    }
}

/// Time-based sliding window keyed on event timestamps.
///
/// The window holds events newer than `watermark - range`, where the
/// watermark is the largest timestamp seen. Events already older than that
/// on arrival are discarded.
#[derive(Debug)]
pub struct SlidingWindow {
    range_ms: i64,
    watermark: Option<i64>,
    events: VecDeque<(i64, Arc<Graph>)>,
}

impl SlidingWindow {
    pub fn new(range_ms: u64) -> Self {
        Self {
            range_ms: i64::try_from(range_ms).unwrap_or(i64::MAX),
            watermark: None,
            events: VecDeque::new(),
        }
    }

    /// Add an event; returns `false` if it fell outside the window
    pub fn push(&mut self, timestamp_ms: i64, graph: Arc<Graph>) -> bool {
        let watermark = self.watermark.map_or(timestamp_ms, |w| w.max(timestamp_ms));
        self.watermark = Some(watermark);
        let lower = watermark.saturating_sub(self.range_ms);
        self.events.retain(|(ts, _)| *ts > lower);
        if timestamp_ms <= lower {
            return false;
        }
        self.events.push_back((timestamp_ms, graph));
        true
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Union of the graphs currently in the window
    pub fn contents(&self) -> Graph {
        let mut graph = Graph::new();
        for (_, g) in &self.events {
            graph.merge(g);
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::vocab::{cashmere, consert, ex, rdf};

    const GROUP: &str = "http://example.org/domains/lab308/group";

    const RULE: &str = r#"
id: lab308-presence
window: { range_ms: 10000, step_ms: 0 }
where:
  - ["?a", "rdf:type", "ex:LocatedAt"]
  - ["?a", "consert:assertionSubject", "?agent"]
  - ["?a", "consert:assertionObject", "ex:lab308"]
construct:
  - ["?agent", "cashmere:memberIn", "$group"]
"#;

    fn located_at(assertion: &str, agent: &str, place: &str) -> Graph {
        let a = Term::blank(assertion);
        let mut graph = Graph::new();
        graph.add(a.clone(), rdf::TYPE, ex::LOCATED_AT);
        graph.add(a.clone(), consert::ASSERTION_SUBJECT, Term::iri(agent));
        graph.add(a, consert::ASSERTION_OBJECT, Term::iri(place));
        graph
    }

    fn compiled() -> MembershipRule {
        MembershipRuleDefinition::from_yaml_str(RULE)
            .unwrap()
            .compile(GROUP)
            .unwrap()
    }

    #[test]
    fn test_evaluate_constructs_membership() {
        let rule = compiled();
        let graph = located_at("a1", "http://example.org/alexAgent", "http://example.org/lab308");

        let results = rule.evaluate(&graph);
        assert_eq!(
            results,
            vec![Triple::new(
                Term::iri("http://example.org/alexAgent"),
                cashmere::MEMBER_IN,
                Term::iri(GROUP)
            )]
        );
        assert!(rule.reports_on_arrival());
    }

    #[test]
    fn test_evaluate_requires_join() {
        let rule = compiled();
        let mut graph = located_at("a1", "http://example.org/alexAgent", "http://example.org/lab210");
        // Subject of a different assertion must not join with a1
        graph.add(
            Term::blank("a2"),
            consert::ASSERTION_OBJECT,
            Term::iri("http://example.org/lab308"),
        );

        assert!(rule.evaluate(&graph).is_empty());
    }

    #[test]
    fn test_unbound_construct_variable_rejected() {
        let yaml = r#"
id: broken
where:
  - ["?a", "rdf:type", "ex:LocatedAt"]
construct:
  - ["?agent", "cashmere:memberIn", "$group"]
"#;
        let def = MembershipRuleDefinition::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            def.compile(GROUP),
            Err(RuleError::UnboundVariable { var, .. }) if var == "agent"
        ));
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        let yaml = r#"
id: broken
where:
  - ["?a", "foo:bar", "?b"]
construct:
  - ["?a", "cashmere:memberIn", "$group"]
"#;
        let def = MembershipRuleDefinition::from_yaml_str(yaml).unwrap();
        assert!(matches!(def.compile(GROUP), Err(RuleError::UnknownPrefix { .. })));
    }

    #[test]
    fn test_listens_to_all_streams_by_default() {
        let rule = compiled();
        assert!(rule.listens_to("http://example.org/streams/anything"));
    }

    #[test]
    fn test_window_evicts_by_watermark() {
        let mut window = SlidingWindow::new(1000);
        let g = Arc::new(located_at("a1", "http://example.org/x", "http://example.org/lab308"));

        assert!(window.push(100, g.clone()));
        assert!(window.push(900, g.clone()));
        assert!(window.push(1500, g.clone()));
        // 100 is now older than 1500 - 1000
        assert_eq!(window.len(), 2);
        assert!(!window.push(400, g));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_window_contents_union() {
        let mut window = SlidingWindow::new(10_000);
        window.push(1, Arc::new(located_at("a1", "http://example.org/x", "http://example.org/lab308")));
        window.push(2, Arc::new(located_at("a2", "http://example.org/y", "http://example.org/lab308")));
        assert_eq!(window.contents().len(), 6);
    }
}
