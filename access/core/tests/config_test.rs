// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use ctxguard_core::application::membership_engine::load_domain_rules;
use ctxguard_core::domain::context_domain::group_uri_from_domain;
use ctxguard_core::domain::service_config::AccessControlConfig;

const CONFIG: &str = r#"
apiVersion: ctxguard/v1
kind: AccessControlConfig
metadata:
  name: lab-node
spec:
  service:
    base_uri: http://localhost:8080/
    bus_timeout_ms: 1500
  context_management:
    fail_closed_on_missing_shapes: true
    static_context: context/static.ttl
    profiled_context: https://profiles.example.org/agents.ttl
    context_streams:
      - stream_uri: http://example.org/streams/LocatedAt
        generator:
          kind: located-at
          interval_ms: 2000
          agent: http://example.org/alexAgent
          location: http://example.org/lab308
    context_domains:
      - domain_uri: http://example.org/domains/lab308
        streams: [http://example.org/streams/LocatedAt]
        membership_rules: [rules/presence.yaml]
  policies:
    - workspace: lab
      artifact: door
      document: policies/door.ttl
    - resource_uri: http://localhost:8080/workspaces/lab/artifacts/lamp
      document: /srv/policies/lamp.ttl
"#;

const RULE: &str = r#"
id: presence
window: { range_ms: 10000, step_ms: 0 }
where:
  - ["?a", "consert:assertionSubject", "?agent"]
construct:
  - ["?agent", "cashmere:memberIn", "$group"]
"#;

#[test]
fn test_relative_locations_resolve_against_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ctxguard-config.yaml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = AccessControlConfig::from_yaml_file(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.spec.service.bus_timeout_ms, 1500);
    assert!(config.spec.context_management.fail_closed_on_missing_shapes);
    assert_eq!(
        config.resolve_location("context/static.ttl"),
        dir.path().join("context/static.ttl").display().to_string()
    );
    assert_eq!(
        config.resolve_location("https://profiles.example.org/agents.ttl"),
        "https://profiles.example.org/agents.ttl"
    );
    assert_eq!(config.resolve_location("/srv/policies/lamp.ttl"), "/srv/policies/lamp.ttl");

    let base = &config.spec.service.base_uri;
    let resources: Vec<String> = config
        .spec
        .policies
        .iter()
        .filter_map(|p| p.resource_iri(base))
        .collect();
    assert_eq!(
        resources,
        vec![
            "http://localhost:8080/workspaces/lab/artifacts/door".to_string(),
            "http://localhost:8080/workspaces/lab/artifacts/lamp".to_string(),
        ]
    );
    assert_eq!(
        config.stream_callback_url(),
        "http://localhost:8080/context/streams/updates"
    );
}

#[test]
fn test_rule_files_load_from_config_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("rules")).unwrap();
    std::fs::write(dir.path().join("rules/presence.yaml"), RULE).unwrap();
    let path = dir.path().join("ctxguard-config.yaml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = AccessControlConfig::from_yaml_file(&path).unwrap();
    let domain = &config.spec.context_management.context_domains[0];
    let rules = load_domain_rules(domain, &group_uri_from_domain(&domain.domain_uri), &config).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, "presence");
    assert!(rules[0].listens_to("http://example.org/streams/LocatedAt"));
}

#[test]
fn test_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = AccessControlConfig::from_yaml_str(CONFIG).unwrap();
    let out = dir.path().join("saved.yaml");
    config.to_yaml_file(&out).unwrap();

    let reloaded = AccessControlConfig::from_yaml_file(&out).unwrap();
    reloaded.validate().unwrap();
    assert_eq!(reloaded.spec.policies.len(), 2);
    assert_eq!(reloaded.spec.context_management.context_streams.len(), 1);
    let generator = reloaded.spec.context_management.context_streams[0]
        .generator
        .as_ref()
        .unwrap();
    assert_eq!(generator.options.get("location").map(String::as_str), Some("http://example.org/lab308"));
}

#[test]
fn test_invalid_manifests_rejected() {
    for (broken, needle) in [
        (CONFIG.replace("kind: AccessControlConfig", "kind: NodeConfig"), "kind"),
        (CONFIG.replace("bus_timeout_ms: 1500", "bus_timeout_ms: 0"), "bus_timeout_ms"),
        (
            CONFIG.replace(
                "streams: [http://example.org/streams/LocatedAt]",
                "streams: [http://example.org/streams/Temperature]",
            ),
            "undeclared stream",
        ),
        (CONFIG.replace("    - workspace: lab\n", "    - workspace_typo: lab\n"), "resource"),
    ] {
        let config = AccessControlConfig::from_yaml_str(&broken).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(needle), "expected '{needle}' in '{err}'");
    }
}
