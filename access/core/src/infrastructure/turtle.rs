// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Turtle codec
//!
//! Parsing goes through `sophia_turtle`; every triple is copied into the
//! owned [`Graph`] model. Blank node labels are prefixed with a per-parse
//! scope so graphs parsed from different documents can be merged without
//! accidental node sharing.
//!
//! Serialization is done here: subjects are grouped, well-known namespaces
//! are compacted to prefixed names, and everything else is written as full
//! IRIs.

use sophia_api::source::{StreamError, TripleSource};
use sophia_api::term::{Term as SophiaTerm, TermKind};
use sophia_api::triple::Triple as _;
use sophia_turtle::parser::turtle;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::errors::AccessError;
use crate::domain::rdf::{Graph, Literal, Term, Triple};
use crate::domain::vocab::{acl, annotation, cashmere, consert, rdf, rdfs, sh, xsd};

pub const TURTLE_MEDIA_TYPE: &str = "text/turtle";

#[derive(Debug, Error)]
pub enum TurtleError {
    #[error("turtle syntax error: {0}")]
    Syntax(String),

    #[error("unsupported term in turtle input: {0}")]
    UnsupportedTerm(String),
}

impl From<TurtleError> for AccessError {
    fn from(err: TurtleError) -> Self {
        AccessError::malformed(err.to_string())
    }
}

/// Parse a Turtle document. IRIs must be absolute.
pub fn parse_turtle(input: &str) -> Result<Graph, TurtleError> {
    let scope = Uuid::new_v4().simple().to_string();
    let mut graph = Graph::new();

    turtle::parse_str(input)
        .try_for_each_triple(|t| -> Result<(), TurtleError> {
            let triple = Triple::new(
                convert_term(t.s(), &scope)?,
                convert_term(t.p(), &scope)?,
                convert_term(t.o(), &scope)?,
            );
            graph.insert(triple);
            Ok(())
        })
        .map_err(|err| match err {
            StreamError::SourceError(e) => TurtleError::Syntax(e.to_string()),
            StreamError::SinkError(e) => e,
        })?;

    Ok(graph)
}

fn convert_term<T: SophiaTerm>(term: T, scope: &str) -> Result<Term, TurtleError> {
    match term.kind() {
        TermKind::Iri => term
            .iri()
            .map(|iri| Term::Iri(iri.as_str().to_string()))
            .ok_or_else(|| TurtleError::UnsupportedTerm("IRI without value".to_string())),
        TermKind::BlankNode => term
            .bnode_id()
            .map(|id| Term::BlankNode(format!("b{}_{}", &scope[..12], sanitize_label(id.as_str()))))
            .ok_or_else(|| TurtleError::UnsupportedTerm("blank node without id".to_string())),
        TermKind::Literal => {
            let lexical = term
                .lexical_form()
                .map(|l| l.to_string())
                .ok_or_else(|| TurtleError::UnsupportedTerm("literal without value".to_string()))?;
            let language = term.language_tag().map(|tag| tag.as_str().to_string());
            let datatype = match (&language, term.datatype()) {
                (Some(_), _) => rdf::LANG_STRING.to_string(),
                (None, Some(dt)) => dt.as_str().to_string(),
                (None, None) => xsd::STRING.to_string(),
            };
            Ok(Term::Literal(Literal {
                lexical,
                datatype,
                language,
            }))
        }
        other => Err(TurtleError::UnsupportedTerm(format!("{:?}", other))),
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

const PREFIXES: &[(&str, &str)] = &[
    ("rdf", rdf::NS),
    ("rdfs", rdfs::NS),
    ("xsd", xsd::NS),
    ("acl", acl::NS),
    ("sh", sh::NS),
    ("cashmere", cashmere::NS),
    ("consert", consert::NS),
    ("annotation", annotation::NS),
];

fn compact(iri: &str) -> Option<(&'static str, &str)> {
    PREFIXES.iter().find_map(|(prefix, ns)| {
        let local = iri.strip_prefix(ns)?;
        let simple = !local.is_empty()
            && local
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            && local.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
        simple.then_some((*prefix, local))
    })
}

fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

fn write_term(term: &Term, used: &mut BTreeSet<&'static str>) -> String {
    match term {
        Term::Iri(iri) if iri == rdf::TYPE => "a".to_string(),
        Term::Iri(iri) => match compact(iri) {
            Some((prefix, local)) => {
                used.insert(prefix);
                format!("{}:{}", prefix, local)
            }
            None => format!("<{}>", iri),
        },
        Term::BlankNode(id) => format!("_:{}", id),
        Term::Literal(lit) => {
            let body = format!("\"{}\"", escape_literal(&lit.lexical));
            if let Some(lang) = &lit.language {
                format!("{}@{}", body, lang)
            } else if lit.datatype == xsd::STRING {
                body
            } else {
                let datatype = write_term(&Term::Iri(lit.datatype.clone()), used);
                format!("{}^^{}", body, datatype)
            }
        }
    }
}

/// Serialize a graph as Turtle
pub fn to_turtle(graph: &Graph) -> String {
    let mut used = BTreeSet::new();
    let mut body = String::new();
    let mut current: Option<&Term> = None;

    for triple in graph.iter() {
        // `a` is only valid in predicate position
        let subject = match &triple.subject {
            Term::Iri(iri) if iri == rdf::TYPE => format!("<{}>", iri),
            other => write_term(other, &mut used),
        };
        let predicate = write_term(&triple.predicate, &mut used);
        let object = match &triple.object {
            Term::Iri(iri) if iri == rdf::TYPE => format!("<{}>", iri),
            other => write_term(other, &mut used),
        };

        if current == Some(&triple.subject) {
            let _ = write!(body, " ;\n    {} {}", predicate, object);
        } else {
            if current.is_some() {
                body.push_str(" .\n\n");
            }
            let _ = write!(body, "{} {} {}", subject, predicate, object);
            current = Some(&triple.subject);
        }
    }
    if current.is_some() {
        body.push_str(" .\n");
    }

    let mut out = String::new();
    for (prefix, ns) in PREFIXES {
        if used.contains(prefix) {
            let _ = writeln!(out, "@prefix {}: <{}> .", prefix, ns);
        }
    }
    if !used.is_empty() {
        out.push('\n');
    }
    out.push_str(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
@prefix acl: <http://www.w3.org/ns/auth/acl#> .
@prefix cashmere: <https://aimas.cs.pub.ro/ont/cashmere#> .
@prefix sh: <http://www.w3.org/ns/shacl#> .
@prefix ex: <http://example.org/> .

ex:doorAuth a cashmere:ContextBasedAuthorization ;
    acl:accessTo <http://localhost:8080/workspaces/lab/artifacts/door> ;
    acl:mode acl:Write ;
    cashmere:hasAccessCondition ex:LabShape .

ex:LabShape a sh:NodeShape ;
    sh:targetNode cashmere:accessRequester ;
    sh:property [
        sh:path cashmere:memberIn ;
        sh:hasValue <http://example.org/domains/lab308/group> ;
        sh:minCount 1 ;
        sh:message "requester must be in lab 308"@en
    ] .
"#;

    #[test]
    fn test_parse_policy_document() {
        let graph = parse_turtle(POLICY).unwrap();
        assert_eq!(graph.len(), 11);
        assert!(graph.has_type(
            &Term::iri("http://example.org/doorAuth"),
            cashmere::CONTEXT_BASED_AUTHORIZATION
        ));

        let min_count = graph
            .iter()
            .find(|t| t.has_predicate(sh::MIN_COUNT))
            .map(|t| t.object.clone())
            .unwrap();
        assert_eq!(min_count.as_i64(), Some(1));

        let message = graph
            .iter()
            .find(|t| t.has_predicate(sh::MESSAGE))
            .and_then(|t| t.object.as_literal().cloned())
            .unwrap();
        assert_eq!(message.language.as_deref(), Some("en"));
        assert_eq!(message.datatype, rdf::LANG_STRING);
    }

    #[test]
    fn test_syntax_error_reported() {
        let err = parse_turtle("<http://a> <http://b> .").unwrap_err();
        assert!(matches!(err, TurtleError::Syntax(_)));
    }

    #[test]
    fn test_blank_nodes_scoped_per_parse() {
        let doc = "_:x <http://example.org/p> <http://example.org/o> .";
        let a = parse_turtle(doc).unwrap();
        let b = parse_turtle(doc).unwrap();
        assert_eq!(a.union(&b).len(), 2);
    }

    #[test]
    fn test_serialized_output_parses_back() {
        let graph = parse_turtle(POLICY).unwrap();
        let text = to_turtle(&graph);

        assert!(text.contains("@prefix cashmere:"));
        assert!(text.contains(" a cashmere:ContextBasedAuthorization"));

        let reparsed = parse_turtle(&text).unwrap();
        assert_eq!(reparsed.len(), graph.len());
    }

    #[test]
    fn test_escape_literal() {
        let mut graph = Graph::new();
        graph.add(
            Term::iri("http://example.org/s"),
            Term::iri("http://example.org/p"),
            Term::string("line \"one\"\nline two"),
        );
        let reparsed = parse_turtle(&to_turtle(&graph)).unwrap();
        let lit = reparsed.iter().next().and_then(|t| t.object.as_literal().cloned()).unwrap();
        assert_eq!(lit.lexical, "line \"one\"\nline two");
    }

    #[test]
    fn test_empty_graph_serializes_empty() {
        assert_eq!(to_turtle(&Graph::new()), "");
    }
}
