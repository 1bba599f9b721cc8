// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # RDF Terms and Graphs
//!
//! Minimal owned RDF model shared by every access-control component: policy
//! documents, context graphs, stream updates and membership stores are all
//! [`Graph`] values.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Term`] | IRI, blank node or literal |
//! | [`Triple`] | subject / predicate / object |
//! | [`Graph`] | ordered set of triples, duplicates impossible |
//!
//! Parsing and serialization live in `infrastructure::turtle`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::vocab::{rdf, xsd};

/// Literal value with datatype and optional language tag
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub lexical: String,
    pub datatype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// An RDF term
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Term {
    Iri(String),
    BlankNode(String),
    Literal(Literal),
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn blank(id: impl Into<String>) -> Self {
        Term::BlankNode(id.into())
    }

    /// Plain `xsd:string` literal
    pub fn string(value: impl Into<String>) -> Self {
        Term::Literal(Literal {
            lexical: value.into(),
            datatype: xsd::STRING.to_string(),
            language: None,
        })
    }

    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal(Literal {
            lexical: value.into(),
            datatype: datatype.into(),
            language: None,
        })
    }

    pub fn integer(value: i64) -> Self {
        Self::typed(value.to_string(), xsd::INTEGER)
    }

    pub fn boolean(value: bool) -> Self {
        Self::typed(value.to_string(), xsd::BOOLEAN)
    }

    pub fn lang_string(value: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal(Literal {
            lexical: value.into(),
            datatype: rdf::LANG_STRING.to_string(),
            language: Some(language.into()),
        })
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }

    /// Literal parsed as an integer, if it is one
    pub fn as_i64(&self) -> Option<i64> {
        self.as_literal().and_then(|l| l.lexical.trim().parse().ok())
    }

    /// `true` for the literal `"true"` or `"1"` typed as xsd:boolean
    pub fn as_bool(&self) -> Option<bool> {
        let lit = self.as_literal()?;
        match lit.lexical.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{}>", iri),
            Term::BlankNode(id) => write!(f, "_:{}", id),
            Term::Literal(lit) => {
                write!(f, "\"{}\"", lit.lexical)?;
                if let Some(lang) = &lit.language {
                    write!(f, "@{}", lang)
                } else if lit.datatype != xsd::STRING {
                    write!(f, "^^<{}>", lit.datatype)
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl From<&str> for Term {
    fn from(iri: &str) -> Self {
        Term::Iri(iri.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: impl Into<Term>, predicate: impl Into<Term>, object: impl Into<Term>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    pub fn has_predicate(&self, iri: &str) -> bool {
        self.predicate.as_iri() == Some(iri)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// Set of triples.
///
/// Backed by a `BTreeSet` so iteration order is deterministic, which keeps
/// serialized documents stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    triples: BTreeSet<Triple>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a triple, returning `false` if it was already present
    pub fn insert(&mut self, triple: Triple) -> bool {
        self.triples.insert(triple)
    }

    pub fn add(&mut self, subject: impl Into<Term>, predicate: impl Into<Term>, object: impl Into<Term>) -> bool {
        self.insert(Triple::new(subject, predicate, object))
    }

    pub fn remove(&mut self, triple: &Triple) -> bool {
        self.triples.remove(triple)
    }

    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    /// Add every triple of `other` to this graph
    pub fn merge(&mut self, other: &Graph) {
        self.triples.extend(other.triples.iter().cloned());
    }

    pub fn union(&self, other: &Graph) -> Graph {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// Triples matching a pattern; `None` is a wildcard
    pub fn matching<'a>(
        &'a self,
        subject: Option<&'a Term>,
        predicate: Option<&'a Term>,
        object: Option<&'a Term>,
    ) -> impl Iterator<Item = &'a Triple> + 'a {
        self.triples.iter().filter(move |t| {
            subject.map_or(true, |s| &t.subject == s)
                && predicate.map_or(true, |p| &t.predicate == p)
                && object.map_or(true, |o| &t.object == o)
        })
    }

    pub fn objects<'a>(&'a self, subject: &'a Term, predicate: &'a str) -> impl Iterator<Item = &'a Term> + 'a {
        self.triples
            .iter()
            .filter(move |t| &t.subject == subject && t.has_predicate(predicate))
            .map(|t| &t.object)
    }

    pub fn object<'a>(&'a self, subject: &'a Term, predicate: &'a str) -> Option<&'a Term> {
        self.objects(subject, predicate).next()
    }

    pub fn subjects<'a>(&'a self, predicate: &'a str, object: &'a Term) -> impl Iterator<Item = &'a Term> + 'a {
        self.triples
            .iter()
            .filter(move |t| &t.object == object && t.has_predicate(predicate))
            .map(|t| &t.subject)
    }

    /// Subjects declared with `rdf:type <class>`
    pub fn instances_of(&self, class: &str) -> Vec<Term> {
        let class = Term::iri(class);
        self.subjects(rdf::TYPE, &class).cloned().collect()
    }

    pub fn has_type(&self, node: &Term, class: &str) -> bool {
        self.objects(node, rdf::TYPE).any(|t| t.as_iri() == Some(class))
    }

    /// Read an RDF collection starting at `head`.
    ///
    /// Stops at `rdf:nil`, at a missing `rdf:first`, or on a cycle.
    pub fn list(&self, head: &Term) -> Vec<Term> {
        let mut items = Vec::new();
        let mut seen = BTreeSet::new();
        let mut node = head.clone();
        while node.as_iri() != Some(rdf::NIL) && seen.insert(node.clone()) {
            match self.object(&node, rdf::FIRST) {
                Some(first) => items.push(first.clone()),
                None => break,
            }
            match self.object(&node, rdf::REST) {
                Some(rest) => node = rest.clone(),
                None => break,
            }
        }
        items
    }

    /// Copy of the graph with every object equal to `from` replaced by `to`
    pub fn substitute_object(&self, from: &Term, to: &Term) -> Graph {
        self.triples
            .iter()
            .map(|t| {
                if &t.object == from {
                    Triple::new(t.subject.clone(), t.predicate.clone(), to.clone())
                } else {
                    t.clone()
                }
            })
            .collect()
    }

    /// Triples with `subject` plus, one hop further, those about blank or IRI nodes it points to
    pub fn describe(&self, subject: &Term) -> Graph {
        let mut out = Graph::new();
        for triple in self.matching(Some(subject), None, None) {
            out.insert(triple.clone());
            if triple.object.is_blank() || triple.object.is_iri() {
                for nested in self.matching(Some(&triple.object), None, None) {
                    out.insert(nested.clone());
                }
            }
        }
        out
    }
}

impl FromIterator<Triple> for Graph {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        Self {
            triples: iter.into_iter().collect(),
        }
    }
}

impl Extend<Triple> for Graph {
    fn extend<I: IntoIterator<Item = Triple>>(&mut self, iter: I) {
        self.triples.extend(iter);
    }
}

impl IntoIterator for Graph {
    type Item = Triple;
    type IntoIter = std::collections::btree_set::IntoIter<Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.into_iter()
    }
}

impl<'a> IntoIterator for &'a Graph {
    type Item = &'a Triple;
    type IntoIter = std::collections::btree_set::Iter<'a, Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.iter()
    }
}
