use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ga4q_core::rules::{EVENT_DIMENSIONS, REASON_SESSION_EVENT};
use ga4q_core::{
    AliasTable, GuardConfig, GuardError, PropertyMetadata, QueryValidator, RepairError,
    RepairOracle, RepairRequest, RepairedCandidate, RuleSet, ScopeTag, StaticMetadataProvider,
    ValidationRequest,
};
use proptest::prelude::*;

const KNOWN_METRICS: &[&str] = &["screenPageViews", "eventCount", "conversions", "totalRevenue"];
const KNOWN_DIMENSIONS: &[&str] = &["date", "pagePath", "country", "eventName", "deviceCategory"];

fn metadata() -> PropertyMetadata {
    let mut meta = PropertyMetadata::new().with_metric("sessions", ScopeTag::Session);
    for m in KNOWN_METRICS {
        meta = meta.with_metric(m, ScopeTag::Other);
    }
    for d in KNOWN_DIMENSIONS.iter().chain(EVENT_DIMENSIONS) {
        meta = meta.with_dimension(d);
    }
    meta
}

fn raw_name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z ]{0,16}",
        prop::sample::select(vec![
            "Page Views", "pageviews", "USERS", " sessions ", "event name", "Day", "url",
        ])
        .prop_map(str::to_string),
    ]
}

/// Known names mixed with `zz`-prefixed names that cannot exist.
fn names(known: &'static [&'static str]) -> impl Strategy<Value = (Vec<String>, bool)> {
    prop::collection::vec(
        prop_oneof![
            prop::sample::select(known).prop_map(|s| (s.to_string(), true)),
            "[a-z]{1,8}".prop_map(|s| (format!("zz{s}"), false)),
        ],
        0..=5,
    )
    .prop_map(|items| {
        let all_known = items.iter().all(|(_, known)| *known);
        (items.into_iter().map(|(name, _)| name).collect(), all_known)
    })
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

/// Always proposes the same candidate, or always fails to parse.
struct FixedOracle {
    reply: Result<RepairedCandidate, RepairError>,
    calls: AtomicUsize,
}

#[async_trait]
impl RepairOracle for FixedOracle {
    async fn repair(&self, _: &RepairRequest) -> Result<RepairedCandidate, RepairError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn normalization_preserves_length_and_order(raw in prop::collection::vec(raw_name(), 0..8)) {
        let table = AliasTable::builtin();
        let out = table.normalize_metrics(&raw);
        prop_assert_eq!(out.len(), raw.len());
        for (i, name) in raw.iter().enumerate() {
            prop_assert_eq!(&out[i], &table.normalize_metrics(&[name.clone()])[0]);
        }
    }

    #[test]
    fn canonical_names_are_fixed_points(raw in prop::collection::vec(raw_name(), 0..8)) {
        let table = AliasTable::builtin();
        let once = table.normalize_dimensions(&raw);
        let file = table.to_alias_file();
        for (before, after) in raw.iter().zip(&once) {
            if file.dimensions.values().any(|v| v == after) {
                prop_assert_eq!(&table.normalize_dimensions(&[after.clone()])[0], after);
            } else {
                prop_assert_eq!(before, after);
            }
        }
    }

    #[test]
    fn existence_has_no_false_verdicts(
        (mut metrics, metrics_known) in names(KNOWN_METRICS),
        (dims, dims_known) in names(KNOWN_DIMENSIONS),
    ) {
        metrics.push("conversions".to_string());
        let result = RuleSet::standard().validate(&metrics, &dims, &metadata());
        if metrics_known && dims_known {
            prop_assert!(result.is_ok());
        } else {
            let err = result.unwrap_err();
            prop_assert!(
                err.reason.starts_with("Invalid metric: zz")
                    || err.reason.starts_with("Invalid dimension: zz")
            );
            prop_assert_eq!(err.metrics, metrics);
            prop_assert_eq!(err.dimensions, dims);
        }
    }

    #[test]
    fn session_metrics_never_pass_with_event_dimensions(
        (mut metrics, _) in names(KNOWN_METRICS),
        (mut dims, _) in names(KNOWN_DIMENSIONS),
        event_dim in prop::sample::select(EVENT_DIMENSIONS),
        m_at in 0usize..6,
        d_at in 0usize..6,
    ) {
        metrics.retain(|m| !m.starts_with("zz"));
        dims.retain(|d| !d.starts_with("zz"));
        let m_at = m_at.min(metrics.len());
        let d_at = d_at.min(dims.len());
        metrics.insert(m_at, "sessions".to_string());
        dims.insert(d_at, event_dim.to_string());

        let err = RuleSet::standard().validate(&metrics, &dims, &metadata()).unwrap_err();
        prop_assert_eq!(err.reason, REASON_SESSION_EVENT);
    }

    #[test]
    fn loop_is_bounded_by_budget(budget in 0u32..6, malformed in any::<bool>()) {
        let provider = Arc::new(StaticMetadataProvider::new().with_property("1", metadata()));
        let reply = if malformed {
            Err(RepairError::Malformed("not json".to_string()))
        } else {
            Ok(RepairedCandidate {
                metrics: vec!["sessions".to_string()],
                dimensions: vec!["eventLabel".to_string()],
            })
        };
        let oracle = Arc::new(FixedOracle { reply, calls: AtomicUsize::new(0) });
        let validator = QueryValidator::new(
            GuardConfig::default(),
            Arc::new(AliasTable::builtin()),
            provider.clone(),
            oracle.clone(),
        );

        let request =
            ValidationRequest::new("1", ["sessions"], ["eventName"]).with_retry_budget(budget);
        let err = block_on(validator.validate_with_repair(&request)).unwrap_err();

        prop_assert!(matches!(err, GuardError::Validation(_)));
        prop_assert_eq!(oracle.calls.load(Ordering::SeqCst), budget as usize);
        let expected_fetches = if malformed || budget == 0 { 1 } else { budget as usize + 1 };
        prop_assert_eq!(provider.fetch_count(), expected_fetches);
    }
}
