// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Membership Engine Application Service
//!
//! Runs the continuous membership rules of one context domain:
//! - Consumes every required context stream of the domain
//! - Keeps one time window per rule and evaluates it on arrival or on its
//!   report period
//! - Offers each result triple to the domain's membership store, which keeps
//!   only new `memberIn` facts for the domain group
//!
//! Updates from one stream are processed in arrival order. Results from
//! different streams are merged by set union, so interleaving never changes
//! the final membership set.

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::context_domain::{ContextDomain, DomainState, MembershipInsert};
use crate::domain::context_stream::{ContextStream, StreamUpdate};
use crate::domain::errors::AccessError;
use crate::domain::events::AccessControlEvent;
use crate::domain::membership_rule::{MembershipRule, MembershipRuleDefinition, RuleError, SlidingWindow};
use crate::domain::rdf::Triple;
use crate::domain::service_config::{AccessControlConfig, ContextDomainConfig, RuleSource};
use crate::infrastructure::event_bus::EventBus;

// ============================================================================
// Rule loading
// ============================================================================

/// Read and compile the membership rules of a configured domain.
///
/// Rule files are resolved relative to the configuration file.
pub fn load_domain_rules(
    domain: &ContextDomainConfig,
    group_uri: &str,
    config: &AccessControlConfig,
) -> Result<Vec<MembershipRule>, RuleError> {
    let mut rules: Vec<MembershipRule> = Vec::with_capacity(domain.membership_rules.len());
    for source in &domain.membership_rules {
        let definition = match source {
            RuleSource::Inline(definition) => definition.clone(),
            RuleSource::Path(path) => {
                let location = config.resolve_location(path);
                MembershipRuleDefinition::from_yaml_file(Path::new(&location))?
            }
        };
        let rule = definition.compile(group_uri)?;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(RuleError::Invalid {
                rule: rule.id,
                reason: "duplicate rule id in domain".to_string(),
            });
        }
        if let Some(stream) = rule
            .streams
            .iter()
            .find(|s| !domain.streams.contains(s))
        {
            return Err(RuleError::Invalid {
                rule: rule.id.clone(),
                reason: format!("stream {} is not consumed by the domain", stream),
            });
        }
        rules.push(rule);
    }
    Ok(rules)
}

// ============================================================================
// Engine
// ============================================================================

/// Continuous membership evaluator for one domain
pub struct MembershipEngine {
    domain: ContextDomain,
    rules: Vec<MembershipRule>,
    events: Option<EventBus>,
}

impl MembershipEngine {
    pub fn new(domain: ContextDomain, rules: Vec<MembershipRule>) -> Self {
        Self {
            domain,
            rules,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn domain(&self) -> &ContextDomain {
        &self.domain
    }

    /// Mark the domain as failed and announce it
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(domain = %self.domain.domain_uri(), reason = %reason, "Context domain failed");
        transition(&self.domain, DomainState::Failed(reason), self.events.as_ref());
    }

    /// Register with every required stream and spawn the evaluation task.
    ///
    /// A required stream missing from `streams` fails the domain. Streams
    /// already marked degraded start the domain as `Degraded`.
    pub fn start(
        self,
        streams: &HashMap<String, ContextStream>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, AccessError> {
        let consumer_id = self.domain.domain_uri().to_string();
        let mut inputs = StreamMap::new();
        let mut degraded = Vec::new();
        let mut registered: Vec<ContextStream> = Vec::new();

        for stream_uri in self.domain.required_streams() {
            let Some(stream) = streams.get(stream_uri) else {
                for stream in &registered {
                    stream.unsubscribe(&consumer_id);
                }
                let reason = format!("required stream {} is not registered", stream_uri);
                self.fail(reason.clone());
                return Err(AccessError::internal(reason));
            };
            let receiver = match stream.subscribe(consumer_id.clone()) {
                Ok(receiver) => receiver,
                Err(e) => {
                    for stream in &registered {
                        stream.unsubscribe(&consumer_id);
                    }
                    self.fail(e.message());
                    return Err(e);
                }
            };
            if let Some(reason) = stream.degraded_reason() {
                degraded.push(format!("{}: {}", stream_uri, reason));
            }
            inputs.insert(stream_uri.clone(), UnboundedReceiverStream::new(receiver));
            registered.push(stream.clone());
        }

        let state = if degraded.is_empty() {
            DomainState::Running
        } else {
            DomainState::Degraded(degraded.join("; "))
        };
        transition(&self.domain, state, self.events.as_ref());
        info!(
            domain = %self.domain.domain_uri(),
            streams = registered.len(),
            rules = self.rules.len(),
            "Membership engine started"
        );

        Ok(tokio::spawn(async move {
            let mut windows = RuleWindows::new(&self.rules);
            let mut ticker = report_ticker(&self.rules);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    Some((_, update)) = inputs.next(), if !inputs.is_empty() => {
                        let inserted = windows.on_update(&self, &update);
                        if inserted > 0 {
                            debug!(
                                domain = %self.domain.domain_uri(),
                                stream = %update.stream_uri,
                                inserted,
                                "Membership updated"
                            );
                        }
                    }
                    _ = next_tick(&mut ticker) => {
                        windows.report_due(&self, Instant::now());
                    }
                }
            }

            for stream in &registered {
                stream.unsubscribe(&consumer_id);
            }
            transition(&self.domain, DomainState::Stopped, self.events.as_ref());
            info!(
                domain = %self.domain.domain_uri(),
                members = self.domain.store().len(),
                "Membership engine stopped"
            );
        }))
    }

    /// Evaluate one rule over a window and store the accepted facts.
    ///
    /// Returns the number of newly inserted facts.
    fn evaluate(&self, rule: &MembershipRule, window: &SlidingWindow) -> usize {
        let results = rule.evaluate(&window.contents());
        self.store_results(rule, &results)
    }

    fn store_results(&self, rule: &MembershipRule, results: &[Triple]) -> usize {
        let mut inserted = 0;
        let mut dropped = 0;
        for triple in results {
            match self.domain.store().offer(triple) {
                MembershipInsert::Inserted => {
                    inserted += 1;
                    metrics::counter!(
                        "ctxguard_memberships_inferred_total",
                        "domain" => self.domain.domain_uri().to_string()
                    )
                    .increment(1);
                    info!(
                        domain = %self.domain.domain_uri(),
                        entity = %triple.subject,
                        rule = %rule.id,
                        "Membership inferred"
                    );
                    if let Some(events) = &self.events {
                        events.publish(AccessControlEvent::MembershipInferred {
                            domain_uri: self.domain.domain_uri().to_string(),
                            entity: triple
                                .subject
                                .as_iri()
                                .map_or_else(|| triple.subject.to_string(), str::to_string),
                            rule_id: rule.id.clone(),
                            inferred_at: Utc::now(),
                        });
                    }
                }
                MembershipInsert::Duplicate => {}
                MembershipInsert::Rejected => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!(
                domain = %self.domain.domain_uri(),
                rule = %rule.id,
                dropped,
                "Dropped rule results that are not memberships of this domain"
            );
        }
        inserted
    }
}

fn transition(domain: &ContextDomain, state: DomainState, events: Option<&EventBus>) {
    debug!(domain = %domain.domain_uri(), state = %state, "Domain state change");
    domain.set_state(state.clone());
    if let Some(events) = events {
        events.publish(AccessControlEvent::DomainStateChanged {
            domain_uri: domain.domain_uri().to_string(),
            state,
            changed_at: Utc::now(),
        });
    }
}

// ============================================================================
// Windows and reporting
// ============================================================================

struct RuleWindow {
    window: SlidingWindow,
    dirty: bool,
    last_report: Instant,
}

/// Per-rule window state, indexed like the engine's rule list
struct RuleWindows {
    windows: Vec<RuleWindow>,
}

impl RuleWindows {
    fn new(rules: &[MembershipRule]) -> Self {
        let now = Instant::now();
        Self {
            windows: rules
                .iter()
                .map(|rule| RuleWindow {
                    window: SlidingWindow::new(rule.window.range_ms),
                    dirty: false,
                    last_report: now,
                })
                .collect(),
        }
    }

    /// Feed an update to every rule listening to its stream
    fn on_update(&mut self, engine: &MembershipEngine, update: &StreamUpdate) -> usize {
        let mut inserted = 0;
        for (rule, state) in engine.rules.iter().zip(self.windows.iter_mut()) {
            if !rule.listens_to(&update.stream_uri) {
                continue;
            }
            if !state.window.push(update.timestamp_ms, update.graph.clone()) {
                debug!(
                    rule = %rule.id,
                    timestamp_ms = update.timestamp_ms,
                    "Update older than the window, discarded"
                );
                continue;
            }
            if rule.reports_on_arrival() {
                inserted += engine.evaluate(rule, &state.window);
            } else {
                state.dirty = true;
            }
        }
        inserted
    }

    /// Evaluate periodic rules whose report period elapsed and whose window changed
    fn report_due(&mut self, engine: &MembershipEngine, now: Instant) -> usize {
        let mut inserted = 0;
        for (rule, state) in engine.rules.iter().zip(self.windows.iter_mut()) {
            if rule.reports_on_arrival() {
                continue;
            }
            let period = Duration::from_millis(rule.window.step_ms);
            if now.duration_since(state.last_report) < period {
                continue;
            }
            state.last_report = now;
            if state.dirty {
                state.dirty = false;
                inserted += engine.evaluate(rule, &state.window);
            }
        }
        inserted
    }
}

/// Ticker at the shortest report period, if any rule reports periodically
fn report_ticker(rules: &[MembershipRule]) -> Option<Interval> {
    let step = rules
        .iter()
        .map(|r| r.window.step_ms)
        .filter(|step| *step > 0)
        .min()?;
    let mut ticker = tokio::time::interval(Duration::from_millis(step));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rdf::{Graph, Term};
    use crate::domain::vocab::{cashmere, consert, ex, rdf};

    const DOMAIN: &str = "http://example.org/domains/lab308";
    const STREAM: &str = "http://example.org/streams/LocatedAt";
    const ALEX: &str = "http://example.org/alexAgent";

    fn rule_yaml(step_ms: u64) -> String {
        format!(
            r#"
id: lab308-presence
window: {{ range_ms: 10000, step_ms: {} }}
where:
  - ["?a", "rdf:type", "ex:LocatedAt"]
  - ["?a", "consert:assertionSubject", "?agent"]
  - ["?a", "consert:assertionObject", "ex:lab308"]
construct:
  - ["?agent", "cashmere:memberIn", "$group"]
  - ["?agent", "rdf:type", "ex:Visitor"]
"#,
            step_ms
        )
    }

    fn located_at(agent: &str, place: &str) -> Graph {
        let a = Term::blank(format!("a{}", uuid::Uuid::new_v4().simple()));
        let mut graph = Graph::new();
        graph.add(a.clone(), rdf::TYPE, ex::LOCATED_AT);
        graph.add(a.clone(), consert::ASSERTION_SUBJECT, Term::iri(agent));
        graph.add(a, consert::ASSERTION_OBJECT, Term::iri(place));
        graph
    }

    fn setup(step_ms: u64) -> (ContextDomain, ContextStream, MembershipEngine) {
        let domain = ContextDomain::new(DOMAIN, vec![STREAM.to_string()]);
        let rule = MembershipRuleDefinition::from_yaml_str(&rule_yaml(step_ms))
            .unwrap()
            .compile(domain.domain_group_uri())
            .unwrap();
        let stream = ContextStream::new(STREAM, None, vec![ex::LOCATED_AT.to_string()]);
        let engine = MembershipEngine::new(domain.clone(), vec![rule]);
        (domain, stream, engine)
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_membership_inferred_on_arrival() {
        let (domain, stream, engine) = setup(0);
        let streams = HashMap::from([(STREAM.to_string(), stream.clone())]);
        let cancel = CancellationToken::new();
        let handle = engine.start(&streams, cancel.clone()).unwrap();
        assert_eq!(domain.state(), DomainState::Running);

        stream.put(located_at(ALEX, "http://example.org/lab308"), 1_000);
        wait_for(|| domain.verify_membership(ALEX)).await;

        // Non-memberIn construct output never reaches the store
        assert_eq!(domain.store().len(), 1);
        assert!(!domain.verify_membership("http://example.org/bobAgent"));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(domain.state(), DomainState::Stopped);
        assert_eq!(stream.consumer_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_fact_stored_once() {
        let (domain, stream, engine) = setup(0);
        let streams = HashMap::from([(STREAM.to_string(), stream.clone())]);
        let cancel = CancellationToken::new();
        let _handle = engine.start(&streams, cancel.clone()).unwrap();

        stream.put(located_at(ALEX, "http://example.org/lab308"), 1_000);
        stream.put(located_at(ALEX, "http://example.org/lab308"), 2_000);
        wait_for(|| domain.verify_membership(ALEX)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(domain.get_membership_statements(Some(ALEX)).len(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_periodic_report() {
        let (domain, stream, engine) = setup(20);
        let streams = HashMap::from([(STREAM.to_string(), stream.clone())]);
        let cancel = CancellationToken::new();
        let _handle = engine.start(&streams, cancel.clone()).unwrap();

        stream.put(located_at(ALEX, "http://example.org/lab308"), 1_000);
        wait_for(|| domain.verify_membership(ALEX)).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_missing_stream_fails_domain() {
        let (domain, _stream, engine) = setup(0);
        let err = engine
            .start(&HashMap::new(), CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, AccessError::Internal(_)));
        assert!(matches!(domain.state(), DomainState::Failed(_)));
    }

    #[tokio::test]
    async fn test_degraded_stream_degrades_domain() {
        let (domain, stream, engine) = setup(0);
        stream.mark_degraded("hub unreachable");
        let streams = HashMap::from([(STREAM.to_string(), stream.clone())]);
        let cancel = CancellationToken::new();
        let _handle = engine.start(&streams, cancel.clone()).unwrap();

        assert!(matches!(domain.state(), DomainState::Degraded(_)));
        assert!(domain.state().is_serving());
        cancel.cancel();
    }

    #[test]
    fn test_foreign_group_rejected() {
        let (domain, _stream, engine) = setup(0);
        let rule = &engine.rules[0];
        let foreign = Triple::new(
            Term::iri(ALEX),
            cashmere::MEMBER_IN,
            Term::iri("http://example.org/domains/lab210/group"),
        );
        assert_eq!(engine.store_results(rule, &[foreign]), 0);
        assert!(domain.store().is_empty());
    }

    #[test]
    fn test_periodic_rule_waits_for_period() {
        let (domain, _stream, engine) = setup(1_000);
        let mut windows = RuleWindows::new(&engine.rules);
        let update = StreamUpdate {
            stream_uri: STREAM.to_string(),
            graph: std::sync::Arc::new(located_at(ALEX, "http://example.org/lab308")),
            timestamp_ms: 10,
        };

        assert_eq!(windows.on_update(&engine, &update), 0);
        assert!(!domain.verify_membership(ALEX));

        let start = windows.windows[0].last_report;
        assert_eq!(windows.report_due(&engine, start + Duration::from_millis(10)), 0);
        assert_eq!(windows.report_due(&engine, start + Duration::from_millis(1_000)), 1);
        assert!(domain.verify_membership(ALEX));
    }

    #[test]
    fn test_load_inline_and_file_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("presence.yaml"), rule_yaml(0)).unwrap();

        let mut config = AccessControlConfig::default();
        config.source_dir = Some(dir.path().to_path_buf());
        let domain_config = ContextDomainConfig {
            domain_uri: DOMAIN.to_string(),
            streams: vec![STREAM.to_string()],
            membership_rules: vec![RuleSource::Path("presence.yaml".to_string())],
        };

        let rules = load_domain_rules(&domain_config, &format!("{}/group", DOMAIN), &config).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "lab308-presence");

        let duplicated = ContextDomainConfig {
            membership_rules: vec![
                RuleSource::Path("presence.yaml".to_string()),
                RuleSource::Path("presence.yaml".to_string()),
            ],
            ..domain_config
        };
        assert!(matches!(
            load_domain_rules(&duplicated, &format!("{}/group", DOMAIN), &config),
            Err(RuleError::Invalid { .. })
        ));
    }
}
