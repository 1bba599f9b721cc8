// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Shape Validation
//!
//! Validates a data graph against access-condition shapes written in a subset
//! of SHACL core.
//!
//! ## Supported
//!
//! | Kind | Terms |
//! |------|-------|
//! | Targets | `sh:targetNode`, `sh:targetClass`, `sh:targetSubjectsOf`, `sh:targetObjectsOf` |
//! | Paths | predicate IRI, `[ sh:inversePath p ]` |
//! | Cardinality | `sh:minCount`, `sh:maxCount` |
//! | Value | `sh:hasValue`, `sh:in`, `sh:class`, `sh:datatype`, `sh:nodeKind`, `sh:pattern` |
//! | Other | `sh:deactivated`, `sh:message` |
//!
//! `sh:targetClass` and `sh:class` follow `rdfs:subClassOf` chains, so an
//! instance of a subclass satisfies a constraint on its superclass.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet, VecDeque};
use thiserror::Error;

use crate::domain::rdf::{Graph, Term};
use crate::domain::vocab::{cashmere, rdf, rdfs, sh};

#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("shape {shape}: invalid value for {parameter}: {value}")]
    InvalidParameter {
        shape: String,
        parameter: &'static str,
        value: String,
    },

    #[error("shape {shape}: unsupported property path {path}")]
    UnsupportedPath { shape: String, path: String },
}

/// Constraint that produced a validation result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintComponent {
    MinCount,
    MaxCount,
    HasValue,
    In,
    Class,
    Datatype,
    NodeKind,
    Pattern,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub shape: String,
    pub focus_node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub component: ConstraintComponent,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub conforms: bool,
    pub results: Vec<ValidationResult>,
}

impl ValidationReport {
    /// One line per violation, for logs and denial reasons
    pub fn summary(&self) -> String {
        self.results
            .iter()
            .map(|r| r.message.clone())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Subjects of the shapes graph that are active node shapes
pub fn node_shapes(shapes: &Graph) -> Vec<Term> {
    let mut out: BTreeSet<Term> = shapes.instances_of(sh::NODE_SHAPE).into_iter().collect();
    for target in [
        sh::TARGET_NODE,
        sh::TARGET_CLASS,
        sh::TARGET_SUBJECTS_OF,
        sh::TARGET_OBJECTS_OF,
    ] {
        let predicate = Term::iri(target);
        out.extend(
            shapes
                .matching(None, Some(&predicate), None)
                .map(|t| t.subject.clone()),
        );
    }
    out.into_iter()
        .filter(|s| !is_deactivated(shapes, s))
        .collect()
}

/// Group IRIs named by `cashmere:ContextDomainCondition` shapes through `sh:hasValue`
pub fn referenced_domain_groups(shapes: &Graph) -> Vec<String> {
    let mut groups = BTreeSet::new();
    for condition in shapes.instances_of(cashmere::CONTEXT_DOMAIN_CONDITION) {
        let mut holders = vec![condition.clone()];
        holders.extend(shapes.objects(&condition, sh::PROPERTY).cloned());
        for holder in holders {
            for value in shapes.objects(&holder, sh::HAS_VALUE) {
                if let Some(iri) = value.as_iri() {
                    groups.insert(iri.to_string());
                }
            }
        }
    }
    groups.into_iter().collect()
}

/// Triples describing `roots` and every node reachable from them.
///
/// Used to cut the access-condition shapes out of a policy document that
/// also carries the authorization rules.
pub fn extract_shapes(policy: &Graph, roots: &[Term]) -> Graph {
    let mut out = Graph::new();
    let mut seen: BTreeSet<Term> = BTreeSet::new();
    let mut pending: Vec<Term> = roots.to_vec();
    while let Some(node) = pending.pop() {
        if !seen.insert(node.clone()) {
            continue;
        }
        for triple in policy.matching(Some(&node), None, None) {
            out.insert(triple.clone());
            if !triple.object.is_literal() && !seen.contains(&triple.object) {
                pending.push(triple.object.clone());
            }
        }
    }
    out
}

fn is_deactivated(shapes: &Graph, shape: &Term) -> bool {
    shapes
        .object(shape, sh::DEACTIVATED)
        .and_then(Term::as_bool)
        .unwrap_or(false)
}

/// Validate `data` against every active node shape in `shapes`
pub fn validate(data: &Graph, shapes: &Graph) -> Result<ValidationReport, ShapeError> {
    let validator = Validator::new(data, shapes);
    let mut results = Vec::new();
    for shape in node_shapes(shapes) {
        validator.validate_node_shape(&shape, &mut results)?;
    }
    Ok(ValidationReport {
        conforms: results.is_empty(),
        results,
    })
}

struct Validator<'a> {
    data: &'a Graph,
    shapes: &'a Graph,
}

enum Path {
    Predicate(Term),
    Inverse(Term),
}

impl Path {
    fn describe(&self) -> String {
        match self {
            Path::Predicate(p) => p.to_string(),
            Path::Inverse(p) => format!("^{}", p),
        }
    }
}

impl<'a> Validator<'a> {
    fn new(data: &'a Graph, shapes: &'a Graph) -> Self {
        Self { data, shapes }
    }

    fn validate_node_shape(
        &self,
        shape: &Term,
        results: &mut Vec<ValidationResult>,
    ) -> Result<(), ShapeError> {
        for focus in self.focus_nodes(shape) {
            let values = vec![focus.clone()];
            self.check_constraints(shape, &focus, None, &values, results)?;

            for property in self.shapes.objects(shape, sh::PROPERTY) {
                if is_deactivated(self.shapes, property) {
                    continue;
                }
                let path = self.path_of(property)?;
                let values = self.values_along(&focus, &path);
                self.check_constraints(property, &focus, Some(&path), &values, results)?;
            }
        }
        Ok(())
    }

    fn focus_nodes(&self, shape: &Term) -> BTreeSet<Term> {
        let mut focus = BTreeSet::new();
        focus.extend(self.shapes.objects(shape, sh::TARGET_NODE).cloned());

        for class in self.shapes.objects(shape, sh::TARGET_CLASS) {
            if let Some(class) = class.as_iri() {
                focus.extend(self.instances_of(class));
            }
        }
        for predicate in self.shapes.objects(shape, sh::TARGET_SUBJECTS_OF) {
            focus.extend(
                self.data
                    .matching(None, Some(predicate), None)
                    .map(|t| t.subject.clone()),
            );
        }
        for predicate in self.shapes.objects(shape, sh::TARGET_OBJECTS_OF) {
            focus.extend(
                self.data
                    .matching(None, Some(predicate), None)
                    .map(|t| t.object.clone()),
            );
        }
        focus
    }

    fn path_of(&self, property: &Term) -> Result<Path, ShapeError> {
        let path = self.shapes.object(property, sh::PATH).ok_or_else(|| ShapeError::InvalidParameter {
            shape: property.to_string(),
            parameter: "sh:path",
            value: "(missing)".to_string(),
        })?;
        match path {
            Term::Iri(_) => Ok(Path::Predicate(path.clone())),
            Term::BlankNode(_) => match self.shapes.object(path, sh::INVERSE_PATH) {
                Some(inverse @ Term::Iri(_)) => Ok(Path::Inverse(inverse.clone())),
                _ => Err(ShapeError::UnsupportedPath {
                    shape: property.to_string(),
                    path: path.to_string(),
                }),
            },
            Term::Literal(_) => Err(ShapeError::UnsupportedPath {
                shape: property.to_string(),
                path: path.to_string(),
            }),
        }
    }

    fn values_along(&self, focus: &Term, path: &Path) -> Vec<Term> {
        let values: BTreeSet<Term> = match path {
            Path::Predicate(p) => self
                .data
                .matching(Some(focus), Some(p), None)
                .map(|t| t.object.clone())
                .collect(),
            Path::Inverse(p) => self
                .data
                .matching(None, Some(p), Some(focus))
                .map(|t| t.subject.clone())
                .collect(),
        };
        values.into_iter().collect()
    }

    fn check_constraints(
        &self,
        shape: &Term,
        focus: &Term,
        path: Option<&Path>,
        values: &[Term],
        results: &mut Vec<ValidationResult>,
    ) -> Result<(), ShapeError> {
        let custom_message = self
            .shapes
            .object(shape, sh::MESSAGE)
            .and_then(Term::as_literal)
            .map(|l| l.lexical.clone());
        let path_text = path.map(Path::describe);
        let mut report = |component: ConstraintComponent, value: Option<&Term>, default: String| {
            results.push(ValidationResult {
                shape: shape.to_string(),
                focus_node: focus.to_string(),
                path: path_text.clone(),
                value: value.map(Term::to_string),
                component,
                message: custom_message.clone().unwrap_or(default),
            });
        };
        let on = path_text
            .as_deref()
            .map(|p| format!("{} of {}", p, focus))
            .unwrap_or_else(|| focus.to_string());

        if let Some(min) = self.integer_param(shape, sh::MIN_COUNT, "sh:minCount")? {
            if (values.len() as i64) < min {
                report(
                    ConstraintComponent::MinCount,
                    None,
                    format!("{} has {} value(s), at least {} required", on, values.len(), min),
                );
            }
        }
        if let Some(max) = self.integer_param(shape, sh::MAX_COUNT, "sh:maxCount")? {
            if (values.len() as i64) > max {
                report(
                    ConstraintComponent::MaxCount,
                    None,
                    format!("{} has {} value(s), at most {} allowed", on, values.len(), max),
                );
            }
        }
        for expected in self.shapes.objects(shape, sh::HAS_VALUE) {
            if !values.contains(expected) {
                report(
                    ConstraintComponent::HasValue,
                    Some(expected),
                    format!("{} does not have value {}", on, expected),
                );
            }
        }
        if let Some(list) = self.shapes.object(shape, sh::IN) {
            let allowed = self.shapes.list(list);
            for value in values.iter().filter(|v| !allowed.contains(v)) {
                report(
                    ConstraintComponent::In,
                    Some(value),
                    format!("{} value {} is not among the allowed values", on, value),
                );
            }
        }
        for class in self.shapes.objects(shape, sh::CLASS) {
            let Some(class) = class.as_iri() else { continue };
            for value in values.iter().filter(|v| !self.is_instance_of(v, class)) {
                report(
                    ConstraintComponent::Class,
                    Some(value),
                    format!("{} value {} is not an instance of <{}>", on, value, class),
                );
            }
        }
        if let Some(datatype) = self.shapes.object(shape, sh::DATATYPE).and_then(Term::as_iri) {
            for value in values.iter().filter(|v| {
                v.as_literal().map_or(true, |l| l.datatype != datatype)
            }) {
                report(
                    ConstraintComponent::Datatype,
                    Some(value),
                    format!("{} value {} is not a literal of type <{}>", on, value, datatype),
                );
            }
        }
        if let Some(kind) = self.shapes.object(shape, sh::NODE_KIND).and_then(Term::as_iri) {
            for value in values.iter().filter(|v| !node_kind_matches(kind, v)) {
                report(
                    ConstraintComponent::NodeKind,
                    Some(value),
                    format!("{} value {} is not of node kind <{}>", on, value, kind),
                );
            }
        }
        if let Some(pattern) = self.shapes.object(shape, sh::PATTERN).and_then(Term::as_literal) {
            let regex = Regex::new(&pattern.lexical).map_err(|_| ShapeError::InvalidParameter {
                shape: shape.to_string(),
                parameter: "sh:pattern",
                value: pattern.lexical.clone(),
            })?;
            for value in values {
                let text = match value {
                    Term::Iri(iri) => Some(iri.as_str()),
                    Term::Literal(lit) => Some(lit.lexical.as_str()),
                    Term::BlankNode(_) => None,
                };
                if !text.is_some_and(|t| regex.is_match(t)) {
                    report(
                        ConstraintComponent::Pattern,
                        Some(value),
                        format!("{} value {} does not match /{}/", on, value, pattern.lexical),
                    );
                }
            }
        }
        Ok(())
    }

    fn integer_param(
        &self,
        shape: &Term,
        predicate: &str,
        parameter: &'static str,
    ) -> Result<Option<i64>, ShapeError> {
        match self.shapes.object(shape, predicate) {
            None => Ok(None),
            Some(term) => term.as_i64().map(Some).ok_or_else(|| ShapeError::InvalidParameter {
                shape: shape.to_string(),
                parameter,
                value: term.to_string(),
            }),
        }
    }

    /// `class` and every class that is a subclass of it, transitively
    fn subclasses_of(&self, class: &str) -> HashSet<Term> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([Term::iri(class)]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for graph in [self.data, self.shapes] {
                queue.extend(graph.subjects(rdfs::SUB_CLASS_OF, &current).cloned());
            }
        }
        seen
    }

    fn instances_of(&self, class: &str) -> BTreeSet<Term> {
        let classes = self.subclasses_of(class);
        let rdf_type = Term::iri(rdf::TYPE);
        self.data
            .matching(None, Some(&rdf_type), None)
            .filter(|t| classes.contains(&t.object))
            .map(|t| t.subject.clone())
            .collect()
    }

    fn is_instance_of(&self, node: &Term, class: &str) -> bool {
        let classes = self.subclasses_of(class);
        self.data
            .objects(node, rdf::TYPE)
            .any(|t| classes.contains(t))
    }
}

fn node_kind_matches(kind: &str, value: &Term) -> bool {
    match kind {
        sh::IRI => value.is_iri(),
        sh::BLANK_NODE => value.is_blank(),
        sh::LITERAL => value.is_literal(),
        sh::BLANK_NODE_OR_IRI => !value.is_literal(),
        sh::BLANK_NODE_OR_LITERAL => !value.is_iri(),
        sh::IRI_OR_LITERAL => !value.is_blank(),
        _ => false,
    }
}
