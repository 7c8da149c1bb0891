//! The validation/repair loop.
//!
//! ```text
//! Start → Normalizing → Validating ─┬─► Success
//!              ▲                    ├─► Repairing ──► Normalizing
//!              └────────────────────┘
//!                                   └─► Exhausted (budget == 0)
//! ```
//!
//! Every repair call spends one unit of budget, whether the oracle returns a
//! candidate or garbage. A malformed answer is retried with the same
//! `ValidationError`; the malformed output itself is never fed back in. With
//! budget `N` the loop makes at most `N` oracle calls and `N + 1` validation
//! passes.

use crate::aliases::AliasTable;
use crate::config::GuardConfig;
use crate::error::{GuardError, RepairError, Stage, ValidationError};
use crate::metadata::{MetadataProvider, PropertyMetadata};
use crate::repair::{RepairOracle, RepairRequest};
use crate::rules::RuleSet;
use crate::QueryCandidate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

// ============================================================================
// Requests and results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub property_id: String,
    pub candidate: QueryCandidate,
    /// Overrides `GuardConfig::retry_budget`.
    #[serde(default)]
    pub retry_budget: Option<u32>,
    /// Property is linked to an ads account (only read when ads gating is on).
    #[serde(default)]
    pub ads_linked: bool,
}

impl ValidationRequest {
    pub fn new<M, D>(property_id: &str, metrics: M, dimensions: D) -> Self
    where
        M: IntoIterator,
        M::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            property_id: property_id.to_string(),
            candidate: QueryCandidate::new(metrics, dimensions),
            retry_budget: None,
            ads_linked: false,
        }
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = Some(budget);
        self
    }

    pub fn with_ads_link(mut self, linked: bool) -> Self {
        self.ads_linked = linked;
        self
    }
}

/// Parameters ready for the report-execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedQuery {
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    /// Validation passes run, including the successful one.
    pub attempts: u32,
    /// Oracle calls made.
    pub repairs: u32,
}

impl ValidatedQuery {
    pub fn candidate(&self) -> QueryCandidate {
        QueryCandidate {
            metrics: self.metrics.clone(),
            dimensions: self.dimensions.clone(),
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cloneable cancellation handle for one request.
///
/// Once cancelled, a pending metadata fetch or oracle call is dropped and no
/// further attempt starts.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Sender is owned by this handle, so this only happens on teardown.
            std::future::pending::<()>().await;
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

enum PassOutcome {
    Valid(QueryCandidate),
    Rejected {
        error: ValidationError,
        metadata: PropertyMetadata,
    },
}

pub struct QueryValidator {
    config: GuardConfig,
    aliases: Arc<AliasTable>,
    metadata: Arc<dyn MetadataProvider>,
    oracle: Arc<dyn RepairOracle>,
}

impl QueryValidator {
    pub fn new(
        config: GuardConfig,
        aliases: Arc<AliasTable>,
        metadata: Arc<dyn MetadataProvider>,
        oracle: Arc<dyn RepairOracle>,
    ) -> Self {
        Self {
            config,
            aliases,
            metadata,
            oracle,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    fn rules_for(&self, request: &ValidationRequest) -> RuleSet {
        RuleSet::standard().with_ads_gating(self.config.ads_gating && !request.ads_linked)
    }

    /// One normalize + validate pass, no repair.
    pub async fn validate_query(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidatedQuery, GuardError> {
        check_request(request)?;
        let cancel = Cancellation::new();
        let rules = self.rules_for(request);

        match self
            .pass(&request.property_id, &request.candidate, &rules, &cancel)
            .await?
        {
            PassOutcome::Valid(c) => Ok(ValidatedQuery {
                metrics: c.metrics,
                dimensions: c.dimensions,
                attempts: 1,
                repairs: 0,
            }),
            PassOutcome::Rejected { error, .. } => Err(error.into()),
        }
    }

    /// Validate, repairing through the oracle until success or the budget
    /// runs out.
    pub async fn validate_with_repair(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidatedQuery, GuardError> {
        self.validate_with_repair_cancellable(request, &Cancellation::new())
            .await
    }

    pub async fn validate_with_repair_cancellable(
        &self,
        request: &ValidationRequest,
        cancel: &Cancellation,
    ) -> Result<ValidatedQuery, GuardError> {
        check_request(request)?;
        let span = tracing::info_span!("validate_query", property_id = %request.property_id);
        self.run_loop(request, cancel).instrument(span).await
    }

    async fn run_loop(
        &self,
        request: &ValidationRequest,
        cancel: &Cancellation,
    ) -> Result<ValidatedQuery, GuardError> {
        let rules = self.rules_for(request);
        let mut budget = request.retry_budget.unwrap_or(self.config.retry_budget);
        let mut candidate = request.candidate.clone();
        let mut attempts: u32 = 0;
        let mut repairs: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(GuardError::Cancelled);
            }
            attempts += 1;

            let (error, metadata) = match self
                .pass(&request.property_id, &candidate, &rules, cancel)
                .await?
            {
                PassOutcome::Valid(valid) => {
                    info!(attempts, repairs, "query validated");
                    return Ok(ValidatedQuery {
                        metrics: valid.metrics,
                        dimensions: valid.dimensions,
                        attempts,
                        repairs,
                    });
                }
                PassOutcome::Rejected { error, metadata } => (error, metadata),
            };

            warn!(
                attempt = attempts,
                budget_left = budget,
                reason = %error.reason,
                "query rejected"
            );

            let mut repaired = None;
            while budget > 0 {
                if cancel.is_cancelled() {
                    return Err(GuardError::Cancelled);
                }
                budget -= 1;
                repairs += 1;

                let repair_request = RepairRequest::from_error(&error, &metadata);
                let outcome = bounded(
                    Stage::Repair,
                    self.config.repair_timeout,
                    cancel,
                    self.oracle.repair(&repair_request),
                )
                .await?;

                match outcome {
                    Ok(fixed) => {
                        debug!(
                            metrics = ?fixed.metrics,
                            dimensions = ?fixed.dimensions,
                            "repair proposed"
                        );
                        repaired = Some(fixed.into_candidate());
                        break;
                    }
                    Err(RepairError::Malformed(message)) => {
                        warn!(budget_left = budget, %message, "discarding malformed repair");
                    }
                    Err(e @ RepairError::Transport(_)) => return Err(GuardError::Repair(e)),
                }
            }

            match repaired {
                Some(next) => candidate = next,
                None => {
                    warn!(attempts, repairs, reason = %error.reason, "retry budget exhausted");
                    return Err(error.into());
                }
            }
        }
    }

    async fn pass(
        &self,
        property_id: &str,
        candidate: &QueryCandidate,
        rules: &RuleSet,
        cancel: &Cancellation,
    ) -> Result<PassOutcome, GuardError> {
        let normalized = self.aliases.normalize(candidate);
        debug!(
            raw_metrics = ?candidate.metrics,
            metrics = ?normalized.metrics,
            raw_dimensions = ?candidate.dimensions,
            dimensions = ?normalized.dimensions,
            "normalized candidate"
        );

        let metadata = bounded(
            Stage::Metadata,
            self.config.metadata_timeout,
            cancel,
            self.metadata.fetch_metadata(property_id),
        )
        .await??;

        match rules.validate(&normalized.metrics, &normalized.dimensions, &metadata) {
            Ok(()) => Ok(PassOutcome::Valid(normalized)),
            Err(error) => Ok(PassOutcome::Rejected { error, metadata }),
        }
    }
}

fn check_request(request: &ValidationRequest) -> Result<(), GuardError> {
    if request.property_id.trim().is_empty() {
        return Err(GuardError::InvalidRequest(
            "property id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Run an external call under the stage timeout, abandoning it on
/// cancellation.
async fn bounded<F: Future>(
    stage: Stage,
    limit: Option<Duration>,
    cancel: &Cancellation,
    call: F,
) -> Result<F::Output, GuardError> {
    let timed = async {
        match limit {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| GuardError::Timeout { stage, after }),
            None => Ok(call.await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GuardError::Cancelled),
        out = timed => out,
    }
}
