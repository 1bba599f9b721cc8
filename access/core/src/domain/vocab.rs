// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Vocabulary IRIs used by policy documents, shapes and context assertions.

pub mod rdf {
    pub const NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
    pub const TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    pub const FIRST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#first";
    pub const REST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#rest";
    pub const NIL: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#nil";
    pub const LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
}

pub mod rdfs {
    pub const NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
    pub const SUB_CLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
}

pub mod xsd {
    pub const NS: &str = "http://www.w3.org/2001/XMLSchema#";
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
}

/// W3C Web Access Control
pub mod acl {
    pub const NS: &str = "http://www.w3.org/ns/auth/acl#";
    pub const AUTHORIZATION: &str = "http://www.w3.org/ns/auth/acl#Authorization";
    pub const ACCESS_TO: &str = "http://www.w3.org/ns/auth/acl#accessTo";
    pub const MODE: &str = "http://www.w3.org/ns/auth/acl#mode";
    pub const AGENT: &str = "http://www.w3.org/ns/auth/acl#agent";
    pub const AGENT_CLASS: &str = "http://www.w3.org/ns/auth/acl#agentClass";
    pub const AGENT_GROUP: &str = "http://www.w3.org/ns/auth/acl#agentGroup";
    pub const AUTHENTICATED_AGENT: &str = "http://www.w3.org/ns/auth/acl#AuthenticatedAgent";
    pub const READ: &str = "http://www.w3.org/ns/auth/acl#Read";
    pub const WRITE: &str = "http://www.w3.org/ns/auth/acl#Write";
    pub const APPEND: &str = "http://www.w3.org/ns/auth/acl#Append";
    pub const CONTROL: &str = "http://www.w3.org/ns/auth/acl#Control";
}

pub mod foaf {
    pub const AGENT: &str = "http://xmlns.com/foaf/0.1/Agent";
}

/// Context-based access control vocabulary
pub mod cashmere {
    pub const NS: &str = "https://aimas.cs.pub.ro/ont/cashmere#";
    pub const MEMBER_IN: &str = "https://aimas.cs.pub.ro/ont/cashmere#memberIn";
    pub const ACCESS_REQUESTER: &str = "https://aimas.cs.pub.ro/ont/cashmere#accessRequester";
    pub const CONTEXT_BASED_AUTHORIZATION: &str =
        "https://aimas.cs.pub.ro/ont/cashmere#ContextBasedAuthorization";
    pub const HAS_ACCESS_CONDITION: &str =
        "https://aimas.cs.pub.ro/ont/cashmere#hasAccessCondition";
    pub const CONTEXT_DOMAIN_CONDITION: &str =
        "https://aimas.cs.pub.ro/ont/cashmere#ContextDomainCondition";
    pub const CONTEXT_AUTHORIZED_RESOURCE: &str =
        "https://aimas.cs.pub.ro/ont/cashmere#ContextAuthorizedResource";
    pub const HAS_ACCESS_AUTHORIZATION: &str =
        "https://aimas.cs.pub.ro/ont/cashmere#hasAccessAuthorization";
    pub const HAS_CONTROL_AUTHORIZATION: &str =
        "https://aimas.cs.pub.ro/ont/cashmere#hasControlAuthorization";
}

/// CONSERT context assertion model
pub mod consert {
    pub const NS: &str = "http://pervasive.semanticweb.org/ont/2017/07/consert/core#";
    pub const ASSERTION_SUBJECT: &str =
        "http://pervasive.semanticweb.org/ont/2017/07/consert/core#assertionSubject";
    pub const ASSERTION_OBJECT: &str =
        "http://pervasive.semanticweb.org/ont/2017/07/consert/core#assertionObject";
}

pub mod annotation {
    pub const NS: &str = "http://pervasive.semanticweb.org/ont/2017/07/consert/annotation#";
    pub const HAS_ANNOTATION: &str =
        "http://pervasive.semanticweb.org/ont/2017/07/consert/annotation#hasAnnotation";
    pub const HAS_VALUE: &str =
        "http://pervasive.semanticweb.org/ont/2017/07/consert/annotation#hasValue";
    pub const NUMERIC_TIMESTAMP_ANNOTATION: &str =
        "http://pervasive.semanticweb.org/ont/2017/07/consert/annotation#NumericTimestampAnnotation";
}

/// SHACL core
pub mod sh {
    pub const NS: &str = "http://www.w3.org/ns/shacl#";
    pub const NODE_SHAPE: &str = "http://www.w3.org/ns/shacl#NodeShape";
    pub const PROPERTY_SHAPE: &str = "http://www.w3.org/ns/shacl#PropertyShape";
    pub const TARGET_NODE: &str = "http://www.w3.org/ns/shacl#targetNode";
    pub const TARGET_CLASS: &str = "http://www.w3.org/ns/shacl#targetClass";
    pub const TARGET_SUBJECTS_OF: &str = "http://www.w3.org/ns/shacl#targetSubjectsOf";
    pub const TARGET_OBJECTS_OF: &str = "http://www.w3.org/ns/shacl#targetObjectsOf";
    pub const PROPERTY: &str = "http://www.w3.org/ns/shacl#property";
    pub const PATH: &str = "http://www.w3.org/ns/shacl#path";
    pub const INVERSE_PATH: &str = "http://www.w3.org/ns/shacl#inversePath";
    pub const MIN_COUNT: &str = "http://www.w3.org/ns/shacl#minCount";
    pub const MAX_COUNT: &str = "http://www.w3.org/ns/shacl#maxCount";
    pub const HAS_VALUE: &str = "http://www.w3.org/ns/shacl#hasValue";
    pub const IN: &str = "http://www.w3.org/ns/shacl#in";
    pub const CLASS: &str = "http://www.w3.org/ns/shacl#class";
    pub const DATATYPE: &str = "http://www.w3.org/ns/shacl#datatype";
    pub const NODE_KIND: &str = "http://www.w3.org/ns/shacl#nodeKind";
    pub const PATTERN: &str = "http://www.w3.org/ns/shacl#pattern";
    pub const DEACTIVATED: &str = "http://www.w3.org/ns/shacl#deactivated";
    pub const MESSAGE: &str = "http://www.w3.org/ns/shacl#message";
    pub const IRI: &str = "http://www.w3.org/ns/shacl#IRI";
    pub const BLANK_NODE: &str = "http://www.w3.org/ns/shacl#BlankNode";
    pub const LITERAL: &str = "http://www.w3.org/ns/shacl#Literal";
    pub const BLANK_NODE_OR_IRI: &str = "http://www.w3.org/ns/shacl#BlankNodeOrIRI";
    pub const BLANK_NODE_OR_LITERAL: &str = "http://www.w3.org/ns/shacl#BlankNodeOrLiteral";
    pub const IRI_OR_LITERAL: &str = "http://www.w3.org/ns/shacl#IRIOrLiteral";
}

/// Namespace of the sample environment used by the built-in stream generators
pub mod ex {
    pub const NS: &str = "http://example.org/";
    pub const LOCATED_AT: &str = "http://example.org/LocatedAt";
}

/// Namespace for minted authorization instance IRIs
pub const AUTH_INSTANCES_NS: &str = "http://example.org/context-auth-instances/";

/// Expand a `prefix:local` name against well-known and caller-supplied prefixes.
///
/// `<iri>` and already-absolute IRIs are returned unchanged. Returns `None` for
/// an unknown prefix.
pub fn expand_curie(name: &str, extra: &std::collections::HashMap<String, String>) -> Option<String> {
    if let Some(stripped) = name.strip_prefix('<').and_then(|n| n.strip_suffix('>')) {
        return Some(stripped.to_string());
    }
    if name.starts_with("http://") || name.starts_with("https://") || name.starts_with("urn:") {
        return Some(name.to_string());
    }
    let (prefix, local) = name.split_once(':')?;
    let ns = match extra.get(prefix) {
        Some(ns) => ns.as_str(),
        None => match prefix {
            "rdf" => rdf::NS,
            "rdfs" => rdfs::NS,
            "xsd" => xsd::NS,
            "acl" => acl::NS,
            "sh" => sh::NS,
            "cashmere" => cashmere::NS,
            "consert" => consert::NS,
            "annotation" | "ann" => annotation::NS,
            "ex" => ex::NS,
            _ => return None,
        },
    };
    Some(format!("{}{}", ns, local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_expand_known_prefix() {
        let extra = HashMap::new();
        assert_eq!(
            expand_curie("cashmere:memberIn", &extra).as_deref(),
            Some(cashmere::MEMBER_IN)
        );
        assert_eq!(expand_curie("rdf:type", &extra).as_deref(), Some(rdf::TYPE));
    }

    #[test]
    fn test_expand_custom_prefix_overrides() {
        let extra = HashMap::from([("ex".to_string(), "urn:lab:".to_string())]);
        assert_eq!(expand_curie("ex:door", &extra).as_deref(), Some("urn:lab:door"));
    }

    #[test]
    fn test_expand_absolute_and_bracketed() {
        let extra = HashMap::new();
        assert_eq!(
            expand_curie("<http://a.org/x>", &extra).as_deref(),
            Some("http://a.org/x")
        );
        assert_eq!(
            expand_curie("https://a.org/y", &extra).as_deref(),
            Some("https://a.org/y")
        );
        assert_eq!(expand_curie("nope:x", &extra), None);
    }
}
