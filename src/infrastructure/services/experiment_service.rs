//! Experiment service for content split testing
//!
//! Owns the experiment lifecycle: creation, start/stop, traffic assignment,
//! event recording and significance evaluation. Every read-modify-write
//! cycle on an experiment runs under that experiment's own lock, so counter
//! updates and the completion decision never interleave.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::domain::experiment::{
    equal_split, EvaluationResult, EventKind, Experiment, ExperimentId, ExperimentQuery,
    ExperimentReport, ExperimentRepository, PrimaryMetric, Variant, VariantDefinition, VariantId,
    DEFAULT_MINIMUM_SAMPLE_SIZE, DEFAULT_SIGNIFICANCE_LEVEL,
};
use crate::domain::DomainError;
use crate::infrastructure::experiment::{
    compare_leaders, evaluate_experiment, select_variant, DEFAULT_MIN_ARM_IMPRESSIONS,
};

/// Capacity of the completion notification channel
const COMPLETION_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Request Types
// ============================================================================

/// Request to create a new experiment
#[derive(Debug, Clone)]
pub struct CreateExperimentRequest {
    pub name: String,
    pub content_id: String,
    pub variants: Vec<VariantDefinition>,
    pub primary_metric: PrimaryMetric,
    /// Per-variant weights; an equal split is used when absent
    pub traffic_split: Option<Vec<f64>>,
    pub minimum_sample_size: Option<u64>,
    pub significance_level: Option<f64>,
}

impl CreateExperimentRequest {
    pub fn new(
        name: impl Into<String>,
        content_id: impl Into<String>,
        primary_metric: PrimaryMetric,
    ) -> Self {
        Self {
            name: name.into(),
            content_id: content_id.into(),
            variants: Vec::new(),
            primary_metric,
            traffic_split: None,
            minimum_sample_size: None,
            significance_level: None,
        }
    }

    pub fn with_variant(mut self, variant: VariantDefinition) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn with_traffic_split(mut self, split: Vec<f64>) -> Self {
        self.traffic_split = Some(split);
        self
    }

    pub fn with_minimum_sample_size(mut self, minimum_sample_size: u64) -> Self {
        self.minimum_sample_size = Some(minimum_sample_size);
        self
    }

    pub fn with_significance_level(mut self, significance_level: f64) -> Self {
        self.significance_level = Some(significance_level);
        self
    }
}

// ============================================================================
// Service Configuration
// ============================================================================

/// Defaults applied by the experiment service
#[derive(Debug, Clone, Copy)]
pub struct ExperimentServiceConfig {
    /// Sample size used when a request does not specify one
    pub minimum_sample_size: u64,
    /// Significance level used when a request does not specify one
    pub significance_level: f64,
    /// Impressions each compared arm needs before a z-test is attempted
    pub min_arm_impressions: u64,
}

impl Default for ExperimentServiceConfig {
    fn default() -> Self {
        Self {
            minimum_sample_size: DEFAULT_MINIMUM_SAMPLE_SIZE,
            significance_level: DEFAULT_SIGNIFICANCE_LEVEL,
            min_arm_impressions: DEFAULT_MIN_ARM_IMPRESSIONS,
        }
    }
}

// ============================================================================
// Service Trait
// ============================================================================

/// Trait for the experiment service (for dynamic dispatch in AppState)
#[async_trait]
pub trait ExperimentServiceTrait: Send + Sync + Debug {
    /// Validate and store a new experiment in Draft status
    async fn create_experiment(
        &self,
        request: CreateExperimentRequest,
    ) -> Result<Experiment, DomainError>;

    /// Start a draft experiment
    async fn start_experiment(&self, id: &str) -> Result<Experiment, DomainError>;

    /// Pause a running experiment; paused experiments cannot be resumed
    async fn stop_experiment(&self, id: &str) -> Result<Experiment, DomainError>;

    /// Pick a variant for one content request (`None` unless running)
    async fn select_variant(&self, id: &str) -> Result<Option<VariantId>, DomainError>;

    /// Record one engagement event, completing the experiment on a verdict
    async fn record_event(
        &self,
        id: &str,
        variant_id: &str,
        kind: EventKind,
    ) -> Result<(), DomainError>;

    /// Run the significance evaluator now
    async fn evaluate(&self, id: &str) -> Result<Option<EvaluationResult>, DomainError>;

    /// Get an experiment by ID
    async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>, DomainError>;

    /// List all experiments, newest first
    async fn list_experiments(&self) -> Result<Vec<Experiment>, DomainError>;

    /// List experiments matching a query, newest first
    async fn find_experiments(
        &self,
        query: &ExperimentQuery,
    ) -> Result<Vec<Experiment>, DomainError>;

    /// Read-only report with the current standing of the variants
    async fn get_results(&self, id: &str) -> Result<ExperimentReport, DomainError>;

    /// Subscribe to completion notifications
    fn subscribe(&self) -> broadcast::Receiver<EvaluationResult>;
}

// ============================================================================
// Experiment Service
// ============================================================================

/// Service managing split-test experiments
#[derive(Debug)]
pub struct ExperimentService<R: ExperimentRepository> {
    repository: Arc<R>,
    config: ExperimentServiceConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
    completions: broadcast::Sender<EvaluationResult>,
}

impl<R: ExperimentRepository> ExperimentService<R> {
    /// Create a new experiment service
    pub fn new(repository: Arc<R>) -> Self {
        Self::with_config(repository, ExperimentServiceConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(repository: Arc<R>, config: ExperimentServiceConfig) -> Self {
        let (completions, _) = broadcast::channel(COMPLETION_CHANNEL_CAPACITY);

        Self {
            repository,
            config,
            locks: DashMap::new(),
            completions,
        }
    }

    // ========================================================================
    // Lifecycle Operations
    // ========================================================================

    /// Validate and store a new experiment in Draft status
    pub async fn create_experiment(
        &self,
        request: CreateExperimentRequest,
    ) -> Result<Experiment, DomainError> {
        let experiment_id = ExperimentId::generate();
        debug!(experiment_id = %experiment_id, content_id = %request.content_id, "Creating experiment");

        let variants = request
            .variants
            .into_iter()
            .enumerate()
            .map(|(index, definition)| Variant::from_definition(definition, index))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DomainError::validation(e.to_string()))?;

        let split = request
            .traffic_split
            .unwrap_or_else(|| equal_split(variants.len()));

        let mut experiment = Experiment::new(
            experiment_id,
            request.name,
            request.content_id,
            request.primary_metric,
        )
        .with_traffic_split(split)
        .with_minimum_sample_size(
            request
                .minimum_sample_size
                .unwrap_or(self.config.minimum_sample_size),
        )
        .with_significance_level(
            request
                .significance_level
                .unwrap_or(self.config.significance_level),
        );

        for variant in variants {
            experiment = experiment.with_variant(variant);
        }

        experiment
            .validate()
            .map_err(|e| DomainError::validation(e.to_string()))?;

        if self.repository.exists(experiment.id()).await? {
            return Err(DomainError::conflict(format!(
                "Experiment '{}' already exists",
                experiment.id()
            )));
        }

        let created = self.repository.put(experiment).await?;
        self.locks
            .insert(created.id().as_str().to_string(), Arc::default());

        info!(
            experiment_id = %created.id(),
            variants = created.variants().len(),
            primary_metric = %created.primary_metric(),
            "Experiment created"
        );

        Ok(created)
    }

    /// Start a draft experiment (Draft -> Running)
    pub async fn start_experiment(&self, id: &str) -> Result<Experiment, DomainError> {
        debug!(experiment_id = %id, "Starting experiment");

        let experiment_id = self.parse_id(id)?;
        let lock = self.lock_for(&experiment_id).await?;
        let _guard = lock.lock().await;

        let mut experiment = self.load(&experiment_id).await?;

        experiment
            .start()
            .map_err(|e| DomainError::validation(e.to_string()))?;

        let updated = self.repository.put(experiment).await?;
        info!(experiment_id = %id, "Experiment started");

        Ok(updated)
    }

    /// Stop a running experiment (Running -> Paused)
    pub async fn stop_experiment(&self, id: &str) -> Result<Experiment, DomainError> {
        debug!(experiment_id = %id, "Stopping experiment");

        let experiment_id = self.parse_id(id)?;
        let lock = self.lock_for(&experiment_id).await?;
        let _guard = lock.lock().await;

        let mut experiment = self.load(&experiment_id).await?;

        experiment
            .stop()
            .map_err(|e| DomainError::validation(e.to_string()))?;

        let updated = self.repository.put(experiment).await?;
        info!(experiment_id = %id, "Experiment stopped");

        Ok(updated)
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Pick a variant for one content request.
    ///
    /// Reads a snapshot of the experiment without taking its lock.
    pub async fn select_variant(&self, id: &str) -> Result<Option<VariantId>, DomainError> {
        let experiment_id = self.parse_id(id)?;
        let experiment = self.load(&experiment_id).await?;

        let selected = {
            let mut rng = rand::thread_rng();
            select_variant(&experiment, &mut rng).map(|variant| variant.id().clone())
        };

        match &selected {
            Some(variant_id) => {
                counter!("experiment_assignments_total").increment(1);
                debug!(experiment_id = %id, variant_id = %variant_id, "Assigned variant");
            }
            None => {
                debug!(
                    experiment_id = %id,
                    status = %experiment.status(),
                    "Experiment not running, no variant assigned"
                );
            }
        }

        Ok(selected)
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Record one engagement event.
    ///
    /// Events for unknown variants or for experiments that are not running
    /// are ignored. Once the sample-size threshold is met the evaluator runs
    /// in the same critical section, and a verdict completes the experiment.
    pub async fn record_event(
        &self,
        id: &str,
        variant_id: &str,
        kind: EventKind,
    ) -> Result<(), DomainError> {
        let experiment_id = self.parse_id(id)?;
        let lock = self.lock_for(&experiment_id).await?;
        let _guard = lock.lock().await;

        let mut experiment = self.load(&experiment_id).await?;

        let applied = VariantId::new(variant_id)
            .map(|variant_id| experiment.apply_event(&variant_id, kind))
            .unwrap_or(false);

        if !applied {
            debug!(
                experiment_id = %id,
                variant_id = %variant_id,
                status = %experiment.status(),
                "Ignoring event"
            );
            return Ok(());
        }

        counter!("experiment_events_total", "kind" => kind.as_str()).increment(1);

        let verdict = if experiment.sample_threshold_met() {
            evaluate_experiment(&experiment, self.config.min_arm_impressions)
        } else {
            None
        };

        if let Some(result) = &verdict {
            experiment
                .complete(result.clone())
                .map_err(|e| DomainError::internal(e.to_string()))?;
        }

        self.repository.put(experiment).await?;

        debug!(experiment_id = %id, variant_id = %variant_id, kind = %kind, "Recorded event");

        if let Some(result) = verdict {
            self.publish(result);
        }

        Ok(())
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Run the significance evaluator now.
    ///
    /// Returns `None` unless the experiment is running, its sample-size
    /// threshold is met and a winner is significant.
    pub async fn evaluate(&self, id: &str) -> Result<Option<EvaluationResult>, DomainError> {
        let experiment_id = self.parse_id(id)?;
        let lock = self.lock_for(&experiment_id).await?;
        let _guard = lock.lock().await;

        let mut experiment = self.load(&experiment_id).await?;

        if !experiment.status().is_running() {
            debug!(experiment_id = %id, status = %experiment.status(), "Skipping evaluation");
            return Ok(None);
        }

        if !experiment.sample_threshold_met() {
            debug!(
                experiment_id = %id,
                sample_size = experiment.current_sample_size(),
                minimum_sample_size = experiment.minimum_sample_size(),
                "Sample size threshold not met"
            );
            return Ok(None);
        }

        let Some(result) = evaluate_experiment(&experiment, self.config.min_arm_impressions)
        else {
            debug!(
                experiment_id = %id,
                sample_size = experiment.current_sample_size(),
                "No significant winner yet"
            );
            return Ok(None);
        };

        experiment
            .complete(result.clone())
            .map_err(|e| DomainError::internal(e.to_string()))?;

        self.repository.put(experiment).await?;
        self.publish(result.clone());

        Ok(Some(result))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Get an experiment by ID; unknown or malformed IDs yield `None`
    pub async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>, DomainError> {
        let Ok(experiment_id) = ExperimentId::new(id) else {
            return Ok(None);
        };

        self.repository.get(&experiment_id).await
    }

    /// List all experiments, newest first
    pub async fn list_experiments(&self) -> Result<Vec<Experiment>, DomainError> {
        self.repository.list(&ExperimentQuery::new()).await
    }

    /// List experiments matching a query, newest first
    pub async fn find_experiments(
        &self,
        query: &ExperimentQuery,
    ) -> Result<Vec<Experiment>, DomainError> {
        self.repository.list(query).await
    }

    /// Read-only report with the current standing of the variants
    pub async fn get_results(&self, id: &str) -> Result<ExperimentReport, DomainError> {
        debug!(experiment_id = %id, "Getting experiment results");

        let experiment_id = self.parse_id(id)?;
        let experiment = self.load(&experiment_id).await?;

        let analysis = compare_leaders(
            experiment.snapshot(),
            experiment.primary_metric(),
            self.config.min_arm_impressions,
        )
        .map(|comparison| comparison.analysis())
        .unwrap_or_default();

        Ok(ExperimentReport::new(&experiment, analysis))
    }

    /// Subscribe to completion notifications
    pub fn subscribe(&self) -> broadcast::Receiver<EvaluationResult> {
        self.completions.subscribe()
    }

    // ========================================================================
    // Private Helpers
    // ========================================================================

    /// Malformed IDs can never be stored, so they are reported as missing
    fn parse_id(&self, id: &str) -> Result<ExperimentId, DomainError> {
        ExperimentId::new(id).map_err(|_| not_found(id))
    }

    async fn load(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| not_found(id.as_str()))
    }

    /// Lock entries exist only for stored experiments
    async fn lock_for(&self, id: &ExperimentId) -> Result<Arc<Mutex<()>>, DomainError> {
        if let Some(lock) = self.locks.get(id.as_str()) {
            return Ok(lock.clone());
        }

        if !self.repository.exists(id).await? {
            return Err(not_found(id.as_str()));
        }

        Ok(self
            .locks
            .entry(id.as_str().to_string())
            .or_default()
            .clone())
    }

    fn publish(&self, result: EvaluationResult) {
        counter!("experiment_completions_total", "metric" => result.primary_metric.as_str())
            .increment(1);

        info!(
            experiment_id = %result.test_id,
            winner = %result.winner_variant_id,
            improvement = result.improvement,
            confidence = result.confidence,
            z_score = result.z_score,
            "Experiment completed"
        );

        if self.completions.send(result).is_err() {
            debug!("No completion subscribers");
        }
    }
}

fn not_found(id: &str) -> DomainError {
    DomainError::not_found(format!("Experiment '{}' not found", id))
}

#[async_trait]
impl<R: ExperimentRepository + 'static> ExperimentServiceTrait for ExperimentService<R> {
    async fn create_experiment(
        &self,
        request: CreateExperimentRequest,
    ) -> Result<Experiment, DomainError> {
        ExperimentService::create_experiment(self, request).await
    }

    async fn start_experiment(&self, id: &str) -> Result<Experiment, DomainError> {
        ExperimentService::start_experiment(self, id).await
    }

    async fn stop_experiment(&self, id: &str) -> Result<Experiment, DomainError> {
        ExperimentService::stop_experiment(self, id).await
    }

    async fn select_variant(&self, id: &str) -> Result<Option<VariantId>, DomainError> {
        ExperimentService::select_variant(self, id).await
    }

    async fn record_event(
        &self,
        id: &str,
        variant_id: &str,
        kind: EventKind,
    ) -> Result<(), DomainError> {
        ExperimentService::record_event(self, id, variant_id, kind).await
    }

    async fn evaluate(&self, id: &str) -> Result<Option<EvaluationResult>, DomainError> {
        ExperimentService::evaluate(self, id).await
    }

    async fn get_experiment(&self, id: &str) -> Result<Option<Experiment>, DomainError> {
        ExperimentService::get_experiment(self, id).await
    }

    async fn list_experiments(&self) -> Result<Vec<Experiment>, DomainError> {
        ExperimentService::list_experiments(self).await
    }

    async fn find_experiments(
        &self,
        query: &ExperimentQuery,
    ) -> Result<Vec<Experiment>, DomainError> {
        ExperimentService::find_experiments(self, query).await
    }

    async fn get_results(&self, id: &str) -> Result<ExperimentReport, DomainError> {
        ExperimentService::get_results(self, id).await
    }

    fn subscribe(&self) -> broadcast::Receiver<EvaluationResult> {
        ExperimentService::subscribe(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::ExperimentStatus;
    use crate::infrastructure::experiment::InMemoryExperimentRepository;
    use metrics_exporter_prometheus::PrometheusBuilder;

    type TestService = ExperimentService<InMemoryExperimentRepository>;

    fn create_service() -> TestService {
        ExperimentService::new(Arc::new(InMemoryExperimentRepository::new()))
    }

    fn two_arm_request() -> CreateExperimentRequest {
        CreateExperimentRequest::new("Thumbnail test", "video-42", PrimaryMetric::Clicks)
            .with_variant(VariantDefinition::new("A").with_id("a"))
            .with_variant(VariantDefinition::new("B").with_id("b"))
            .with_traffic_split(vec![50.0, 50.0])
    }

    async fn started(service: &TestService, request: CreateExperimentRequest) -> String {
        let experiment = service.create_experiment(request).await.unwrap();
        let id = experiment.id().to_string();
        service.start_experiment(&id).await.unwrap();
        id
    }

    async fn feed(service: &TestService, id: &str, variant: &str, kind: EventKind, times: u64) {
        for _ in 0..times {
            service.record_event(id, variant, kind).await.unwrap();
        }
    }

    async fn counters(service: &TestService, id: &str, variant: &str) -> (u64, u64) {
        let experiment = service.get_experiment(id).await.unwrap().unwrap();
        let variant = experiment
            .variant(&VariantId::new(variant).unwrap())
            .unwrap();
        (variant.counters().impressions, variant.counters().clicks)
    }

    #[tokio::test]
    async fn test_create_experiment() {
        let service = create_service();

        let experiment = service.create_experiment(two_arm_request()).await.unwrap();

        assert!(experiment.id().as_str().starts_with("exp-"));
        assert_eq!(experiment.status(), ExperimentStatus::Draft);
        assert_eq!(experiment.variants().len(), 2);
        assert_eq!(experiment.minimum_sample_size(), DEFAULT_MINIMUM_SAMPLE_SIZE);
        assert_eq!(experiment.significance_level(), DEFAULT_SIGNIFICANCE_LEVEL);
        assert!(experiment.start_date().is_none());
    }

    #[tokio::test]
    async fn test_create_assigns_positional_ids_and_equal_split() {
        let service = create_service();
        let request = CreateExperimentRequest::new("CTA test", "post-1", PrimaryMetric::Clicks)
            .with_variant(VariantDefinition::new("Control"))
            .with_variant(VariantDefinition::new("Bold").with_change("cta", "Buy now"))
            .with_variant(VariantDefinition::new("Subtle"));

        let experiment = service.create_experiment(request).await.unwrap();

        let ids: Vec<_> = experiment
            .variants()
            .iter()
            .map(|v| v.id().as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["variant-1", "variant-2", "variant-3"]);

        let sum: f64 = experiment.traffic_split().iter().sum();
        assert!((sum - 100.0).abs() <= 0.01);
    }

    #[tokio::test]
    async fn test_create_applies_config_defaults() {
        let config = ExperimentServiceConfig {
            minimum_sample_size: 500,
            significance_level: 0.90,
            min_arm_impressions: 50,
        };
        let service = ExperimentService::with_config(
            Arc::new(InMemoryExperimentRepository::new()),
            config,
        );

        let experiment = service.create_experiment(two_arm_request()).await.unwrap();
        assert_eq!(experiment.minimum_sample_size(), 500);
        assert_eq!(experiment.significance_level(), 0.90);

        let explicit = service
            .create_experiment(two_arm_request().with_minimum_sample_size(20))
            .await
            .unwrap();
        assert_eq!(explicit.minimum_sample_size(), 20);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_requests() {
        let service = create_service();

        let single = CreateExperimentRequest::new("Solo", "video-1", PrimaryMetric::Clicks)
            .with_variant(VariantDefinition::new("Only"));
        let result = service.create_experiment(single).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let bad_split = two_arm_request().with_traffic_split(vec![60.0, 30.0]);
        let result = service.create_experiment(bad_split).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let wrong_length = two_arm_request().with_traffic_split(vec![100.0]);
        let result = service.create_experiment(wrong_length).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let duplicate = CreateExperimentRequest::new("Dup", "video-1", PrimaryMetric::Clicks)
            .with_variant(VariantDefinition::new("A").with_id("same"))
            .with_variant(VariantDefinition::new("B").with_id("same"));
        let result = service.create_experiment(duplicate).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let bad_level = two_arm_request().with_significance_level(1.5);
        let result = service.create_experiment(bad_level).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        assert!(service.list_experiments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let service = create_service();
        let experiment = service.create_experiment(two_arm_request()).await.unwrap();
        let id = experiment.id().to_string();

        let running = service.start_experiment(&id).await.unwrap();
        assert_eq!(running.status(), ExperimentStatus::Running);
        assert!(running.start_date().is_some());

        let result = service.start_experiment(&id).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let paused = service.stop_experiment(&id).await.unwrap();
        assert_eq!(paused.status(), ExperimentStatus::Paused);

        // No resume from paused
        let result = service.start_experiment(&id).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let result = service.stop_experiment(&id).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_stop_draft_fails() {
        let service = create_service();
        let experiment = service.create_experiment(two_arm_request()).await.unwrap();

        let result = service.stop_experiment(experiment.id().as_str()).await;
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_unknown_experiment() {
        let service = create_service();

        assert!(service.get_experiment("exp-missing").await.unwrap().is_none());
        assert!(service.get_experiment("not a valid id").await.unwrap().is_none());

        assert!(service.start_experiment("exp-missing").await.unwrap_err().is_not_found());
        assert!(service.stop_experiment("exp-missing").await.unwrap_err().is_not_found());
        assert!(service.select_variant("exp-missing").await.unwrap_err().is_not_found());
        assert!(service
            .record_event("exp-missing", "a", EventKind::Impression)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(service.evaluate("exp-missing").await.unwrap_err().is_not_found());
        assert!(service.get_results("exp-missing").await.unwrap_err().is_not_found());
        assert!(service.start_experiment("not a valid id").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_ids_leave_no_lock_entries() {
        let service = create_service();

        for i in 0..100 {
            let id = format!("exp-unknown-{}", i);
            assert!(service
                .record_event(&id, "a", EventKind::Impression)
                .await
                .unwrap_err()
                .is_not_found());
            assert!(service.start_experiment(&id).await.unwrap_err().is_not_found());
            assert!(service.stop_experiment(&id).await.unwrap_err().is_not_found());
            assert!(service.evaluate(&id).await.unwrap_err().is_not_found());
        }
        assert_eq!(service.locks.len(), 0);

        let id = started(&service, two_arm_request()).await;
        service.record_event(&id, "a", EventKind::Impression).await.unwrap();
        assert_eq!(service.locks.len(), 1);
    }

    #[tokio::test]
    async fn test_stored_experiment_gets_lock_on_first_mutation() {
        let repository = Arc::new(InMemoryExperimentRepository::new());
        stored_running(&repository, "exp-imported", [("a", 0, 0), ("b", 0, 0)]).await;
        let service = ExperimentService::new(repository);

        service
            .record_event("exp-imported", "a", EventKind::Impression)
            .await
            .unwrap();

        assert_eq!(service.locks.len(), 1);
        assert_eq!(counters(&service, "exp-imported", "a").await, (1, 0));
    }

    #[tokio::test]
    async fn test_select_variant_only_when_running() {
        let service = create_service();
        let experiment = service.create_experiment(two_arm_request()).await.unwrap();
        let id = experiment.id().to_string();

        assert!(service.select_variant(&id).await.unwrap().is_none());

        service.start_experiment(&id).await.unwrap();
        for _ in 0..100 {
            let variant = service.select_variant(&id).await.unwrap().unwrap();
            assert!(["a", "b"].contains(&variant.as_str()));
        }

        service.stop_experiment(&id).await.unwrap();
        assert!(service.select_variant(&id).await.unwrap().is_none());
    }

    #[test]
    fn test_assignment_counter_has_no_variant_label() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let service = create_service();
                let id = started(&service, two_arm_request()).await;
                for _ in 0..10 {
                    service.select_variant(&id).await.unwrap();
                }
            })
        });

        let rendered = handle.render();
        assert!(rendered.contains("experiment_assignments_total 10"));
        assert!(!rendered.contains("variant="));
    }

    #[tokio::test]
    async fn test_select_variant_with_full_weight_on_first_arm() {
        let service = create_service();
        let id = started(&service, two_arm_request().with_traffic_split(vec![100.0, 0.0])).await;

        for _ in 0..1000 {
            let variant = service.select_variant(&id).await.unwrap().unwrap();
            assert_eq!(variant.as_str(), "a");
        }
    }

    #[tokio::test]
    async fn test_selection_does_not_mutate() {
        let service = create_service();
        let id = started(&service, two_arm_request()).await;

        for _ in 0..50 {
            service.select_variant(&id).await.unwrap();
        }

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.current_sample_size(), 0);
    }

    #[tokio::test]
    async fn test_record_event_updates_counters() {
        let service = create_service();
        let id = started(&service, two_arm_request()).await;

        feed(&service, &id, "a", EventKind::Impression, 10).await;
        feed(&service, &id, "a", EventKind::Click, 3).await;
        feed(&service, &id, "b", EventKind::Impression, 4).await;

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        let a = experiment.variant(&VariantId::new("a").unwrap()).unwrap();
        assert_eq!(a.counters().impressions, 10);
        assert_eq!(a.counters().clicks, 3);
        assert!((a.rates().ctr - 30.0).abs() < 1e-9);
        assert_eq!(experiment.current_sample_size(), 14);
    }

    #[tokio::test]
    async fn test_record_event_ignored_when_not_running() {
        let service = create_service();
        let experiment = service.create_experiment(two_arm_request()).await.unwrap();
        let id = experiment.id().to_string();

        service.record_event(&id, "a", EventKind::Impression).await.unwrap();
        assert_eq!(counters(&service, &id, "a").await, (0, 0));

        service.start_experiment(&id).await.unwrap();
        service.record_event(&id, "a", EventKind::Impression).await.unwrap();
        service.stop_experiment(&id).await.unwrap();
        service.record_event(&id, "a", EventKind::Impression).await.unwrap();

        assert_eq!(counters(&service, &id, "a").await, (1, 0));
    }

    #[tokio::test]
    async fn test_record_event_unknown_variant_is_ignored() {
        let service = create_service();
        let id = started(&service, two_arm_request()).await;

        service.record_event(&id, "zzz", EventKind::Click).await.unwrap();
        service.record_event(&id, "Not Valid!", EventKind::Click).await.unwrap();

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.current_sample_size(), 0);
        assert!(experiment
            .variants()
            .iter()
            .all(|v| v.counters().clicks == 0));
    }

    /// Running experiment with the given (impressions, clicks) per arm,
    /// stored without passing through the service
    async fn stored_running(
        repository: &InMemoryExperimentRepository,
        id: &str,
        arms: [(&str, u64, u64); 2],
    ) {
        let mut experiment = Experiment::new(
            ExperimentId::new(id).unwrap(),
            "Thumbnail test",
            "video-42",
            PrimaryMetric::Clicks,
        )
        .with_traffic_split(vec![50.0, 50.0]);
        for (variant, _, _) in arms {
            experiment = experiment.with_variant(Variant::new(
                VariantId::new(variant).unwrap(),
                variant.to_uppercase(),
            ));
        }
        experiment.start().unwrap();

        for (variant, impressions, clicks) in arms {
            let variant_id = VariantId::new(variant).unwrap();
            for _ in 0..impressions {
                experiment.apply_event(&variant_id, EventKind::Impression);
            }
            for _ in 0..clicks {
                experiment.apply_event(&variant_id, EventKind::Click);
            }
        }

        repository.put(experiment).await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_winner_on_explicit_evaluate() {
        let repository = Arc::new(InMemoryExperimentRepository::new());
        stored_running(&repository, "exp-thumbnails", [("a", 1000, 800), ("b", 1000, 600)]).await;
        let service = ExperimentService::new(repository);
        let id = "exp-thumbnails".to_string();

        let result = service.evaluate(&id).await.unwrap().unwrap();
        assert_eq!(result.winner_variant_id.as_str(), "a");
        assert!(result.confidence >= 0.99);
        assert_eq!(result.test_id, id);

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.status(), ExperimentStatus::Completed);
        assert_eq!(experiment.winner().unwrap().as_str(), "a");
        assert!(experiment.end_date().is_some());
        assert_eq!(experiment.outcome(), Some(&result));

        // Completed experiments are never re-evaluated
        assert!(service.evaluate(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_small_samples_abstain() {
        let service = create_service();
        let id = started(&service, two_arm_request().with_minimum_sample_size(100)).await;

        feed(&service, &id, "a", EventKind::Impression, 50).await;
        feed(&service, &id, "a", EventKind::Click, 45).await;
        feed(&service, &id, "b", EventKind::Impression, 50).await;
        feed(&service, &id, "b", EventKind::Click, 5).await;

        assert!(service.evaluate(&id).await.unwrap().is_none());

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.status(), ExperimentStatus::Running);
        assert!(experiment.winner().is_none());
    }

    #[tokio::test]
    async fn test_evaluate_below_sample_threshold_abstains() {
        let service = create_service();
        let id = started(&service, two_arm_request()).await;

        feed(&service, &id, "a", EventKind::Impression, 100).await;
        feed(&service, &id, "a", EventKind::Click, 60).await;
        feed(&service, &id, "b", EventKind::Impression, 100).await;
        feed(&service, &id, "b", EventKind::Click, 20).await;

        assert!(service.evaluate(&id).await.unwrap().is_none());

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.current_sample_size(), 200);
        assert_eq!(experiment.status(), ExperimentStatus::Running);
        assert!(experiment.winner().is_none());
        assert!(experiment.end_date().is_none());
    }

    #[tokio::test]
    async fn test_evaluate_draft_returns_none() {
        let service = create_service();
        let experiment = service.create_experiment(two_arm_request()).await.unwrap();

        assert!(service
            .evaluate(experiment.id().as_str())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_threshold_triggers_completion_and_freezes() {
        let service = create_service();
        let id = started(&service, two_arm_request()).await;
        let mut completions = service.subscribe();

        feed(&service, &id, "a", EventKind::Impression, 1000).await;
        feed(&service, &id, "b", EventKind::Impression, 1000).await;
        feed(&service, &id, "a", EventKind::Click, 800).await;

        // Runner-up still has no clicks, so nothing is decided yet
        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.status(), ExperimentStatus::Running);

        feed(&service, &id, "b", EventKind::Click, 600).await;

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.status(), ExperimentStatus::Completed);
        assert_eq!(experiment.winner().unwrap().as_str(), "a");
        let frozen_end = experiment.end_date();
        let frozen_confidence = experiment.confidence();

        // The first click on b decided the experiment; the rest were ignored
        assert_eq!(counters(&service, &id, "b").await, (1000, 1));

        let notification = completions.try_recv().unwrap();
        assert_eq!(notification.test_id, id);
        assert_eq!(notification.winner, "A");
        assert!(notification.confidence >= 0.99);
        assert!(completions.try_recv().is_err());

        feed(&service, &id, "b", EventKind::Click, 10).await;
        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.end_date(), frozen_end);
        assert_eq!(experiment.confidence(), frozen_confidence);
        assert_eq!(experiment.winner().unwrap().as_str(), "a");
    }

    #[tokio::test]
    async fn test_get_results_reports_standing() {
        let service = create_service();
        let id = started(
            &service,
            two_arm_request().with_minimum_sample_size(u64::MAX),
        )
        .await;

        feed(&service, &id, "a", EventKind::Impression, 200).await;
        feed(&service, &id, "a", EventKind::Click, 60).await;
        feed(&service, &id, "b", EventKind::Impression, 200).await;
        feed(&service, &id, "b", EventKind::Click, 20).await;

        let report = service.get_results(&id).await.unwrap();
        assert_eq!(report.current_sample_size, 400);
        assert_eq!(report.variants.len(), 2);
        assert_eq!(report.analysis.leader_variant_id.as_deref(), Some("a"));
        assert_eq!(report.analysis.runner_up_variant_id.as_deref(), Some("b"));
        assert!(report.analysis.z_score.is_some());
        assert!(report.winner_variant_id.is_none());

        // Reports never change state
        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.status(), ExperimentStatus::Running);
    }

    #[tokio::test]
    async fn test_list_experiments() {
        let service = create_service();
        service.create_experiment(two_arm_request()).await.unwrap();
        let id = started(&service, two_arm_request()).await;

        let all = service.list_experiments().await.unwrap();
        assert_eq!(all.len(), 2);

        let running = service
            .find_experiments(&ExperimentQuery::new().with_status(ExperimentStatus::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id().as_str(), id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_events_lose_no_increments() {
        let service = Arc::new(create_service());
        let id = started(
            &service,
            two_arm_request().with_minimum_sample_size(u64::MAX),
        )
        .await;

        let mut handles = Vec::new();
        for task in 0..8 {
            let service = service.clone();
            let id = id.clone();
            let variant = if task % 2 == 0 { "a" } else { "b" };

            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    service
                        .record_event(&id, variant, EventKind::Impression)
                        .await
                        .unwrap();
                    service
                        .record_event(&id, variant, EventKind::Click)
                        .await
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counters(&service, &id, "a").await, (1000, 1000));
        assert_eq!(counters(&service, &id, "b").await, (1000, 1000));

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.current_sample_size(), 2000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_events_complete_at_most_once() {
        let service = Arc::new(create_service());
        let id = started(&service, two_arm_request().with_minimum_sample_size(200)).await;
        let mut completions = service.subscribe();

        feed(&service, &id, "a", EventKind::Impression, 100).await;
        feed(&service, &id, "b", EventKind::Impression, 100).await;
        feed(&service, &id, "a", EventKind::Click, 50).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let service = service.clone();
            let id = id.clone();

            handles.push(tokio::spawn(async move {
                service.record_event(&id, "b", EventKind::Click).await.unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let experiment = service.get_experiment(&id).await.unwrap().unwrap();
        assert_eq!(experiment.status(), ExperimentStatus::Completed);
        assert_eq!(counters(&service, &id, "b").await, (100, 1));

        assert!(completions.try_recv().is_ok());
        assert!(completions.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_experiments_progress_independently() {
        let service = Arc::new(create_service());
        let first = started(&service, two_arm_request().with_minimum_sample_size(u64::MAX)).await;
        let second = started(&service, two_arm_request().with_minimum_sample_size(u64::MAX)).await;

        let mut handles = Vec::new();
        for id in [first.clone(), second.clone()] {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..300 {
                    service
                        .record_event(&id, "a", EventKind::Impression)
                        .await
                        .unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(counters(&service, &first, "a").await, (300, 0));
        assert_eq!(counters(&service, &second, "a").await, (300, 0));
    }
}
