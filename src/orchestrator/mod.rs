//! Evaluation loop
//!
//! One cycle: build the deduplication context, ask the model for a verdict,
//! record it, publish approvals, compress learnings when rejections pile up,
//! then cool down. Cycles run strictly one after another and the loop only
//! stops on shutdown (or after `max_cycles` when one is given).

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::evaluator::{EvaluationRequest, IdeaModel};
use crate::config::{AgentConfig, Config, ContextConfig};
use crate::ideas::{
    build_context, find_duplicate, HistoryDocument, HistoryStore, IdeaPayload, LearningCompressor,
    Verdict,
};
use crate::sink::IdeaSink;

/// Counters kept for the lifetime of the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub approved: u64,
    /// Includes duplicates
    pub rejected: u64,
    pub duplicates: u64,
    pub failed: u64,
    pub compressions: u64,
    pub sink_failures: u64,
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cycles: {} approved, {} rejected ({} duplicates), {} failed, {} compressions, {} sink failures",
            self.cycles,
            self.approved,
            self.rejected,
            self.duplicates,
            self.failed,
            self.compressions,
            self.sink_failures
        )
    }
}

/// Result of a single cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Recorded as approved; `delivered` is the sink location, `None` if delivery failed
    Approved { title: String, delivered: Option<String> },
    Rejected { title: String, reason: String, compressed: bool },
    /// Approved by the model but already in history; recorded as a rejection
    Duplicate { title: String, existing: String, compressed: bool },
    /// Evaluator call failed; nothing recorded
    Failed(String),
}

impl CycleOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CycleOutcome::Failed(_))
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Approved { title, delivered: Some(location) } => {
                write!(f, "approved \"{}\" -> {}", title, location)
            }
            CycleOutcome::Approved { title, delivered: None } => {
                write!(f, "approved \"{}\" (delivery failed)", title)
            }
            CycleOutcome::Rejected { title, reason, .. } => {
                write!(f, "rejected \"{}\": {}", title, reason)
            }
            CycleOutcome::Duplicate { title, existing, .. } => {
                write!(f, "duplicate \"{}\" of \"{}\"", title, existing)
            }
            CycleOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// The long-lived idea generation loop. Owns the in-memory history and is its
/// only mutator.
pub struct IdeaLoop {
    settings: AgentConfig,
    budget: ContextConfig,
    history: HistoryDocument,
    store: Box<dyn HistoryStore>,
    model: Arc<dyn IdeaModel>,
    sink: Arc<dyn IdeaSink>,
    compressor: LearningCompressor,
    stats: LoopStats,
    consecutive_failures: u32,
}

impl IdeaLoop {
    /// Create the loop and load persisted history from `store`
    pub fn new(
        config: &Config,
        store: Box<dyn HistoryStore>,
        model: Arc<dyn IdeaModel>,
        sink: Arc<dyn IdeaSink>,
    ) -> Self {
        let history = store.load();
        Self {
            settings: config.agent.clone(),
            budget: config.context.clone(),
            history,
            store,
            model,
            sink,
            compressor: LearningCompressor::new(config.agent.compression_threshold),
            stats: LoopStats::default(),
            consecutive_failures: 0,
        }
    }

    pub fn history(&self) -> &HistoryDocument {
        &self.history
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one generate-evaluate-record cycle. Never fails: every error is
    /// absorbed and reflected in the outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;

        let request = EvaluationRequest {
            context: build_context(&self.history, &self.budget),
            max_web_searches: self.settings.max_web_searches,
        };

        let verdict = match self.model.evaluate(&request).await {
            Ok(verdict) => verdict,
            Err(e) => return self.record_failure(format!("{:#}", e)),
        };
        self.consecutive_failures = 0;

        match verdict {
            Verdict::Approved(payload) => self.handle_approval(payload).await,
            Verdict::Rejected { title, reason } => {
                let compressed = self.handle_rejection(&title, &reason).await;
                CycleOutcome::Rejected { title, reason, compressed }
            }
        }
    }

    fn record_failure(&mut self, message: String) -> CycleOutcome {
        self.stats.failed += 1;
        self.consecutive_failures += 1;
        warn!("Evaluation failed, skipping cycle: {}", message);

        let limit = self.settings.max_consecutive_failures;
        if limit > 0 && self.consecutive_failures >= limit {
            error!(
                count = self.consecutive_failures,
                "Evaluator has failed {} cycles in a row; check the API key, quota and network",
                self.consecutive_failures
            );
        }
        CycleOutcome::Failed(message)
    }

    async fn handle_approval(&mut self, payload: IdeaPayload) -> CycleOutcome {
        let title = payload.title.trim().to_string();

        if let Some(existing) = find_duplicate(&self.history, &payload) {
            let existing = existing.title.clone();
            info!(title = %title, "Approved idea duplicates \"{}\", recording as rejection", existing);
            self.stats.duplicates += 1;
            let reason = format!("Duplicate of previously approved idea: {}", existing);
            let compressed = self.handle_rejection(&title, &reason).await;
            return CycleOutcome::Duplicate { title, existing, compressed };
        }

        self.history.record_approval(&payload, Utc::now());
        self.stats.approved += 1;
        // Bookkeeping is persisted before delivery and never rolled back
        self.persist();

        let delivered = match self.sink.publish(&payload).await {
            Ok(location) => Some(location),
            Err(e) => {
                self.stats.sink_failures += 1;
                warn!(title = %title, "{} sink failed: {:#}", self.sink.name(), e);
                None
            }
        };

        CycleOutcome::Approved { title, delivered }
    }

    /// Record a rejection, then compress if the threshold is reached.
    /// Returns whether learnings were compressed.
    async fn handle_rejection(&mut self, title: &str, reason: &str) -> bool {
        self.history.record_rejection(title, reason, Utc::now());
        self.stats.rejected += 1;
        self.persist();

        let outcome = self
            .compressor
            .maybe_compress(&mut self.history, self.model.as_ref())
            .await;
        if outcome.is_compressed() {
            self.stats.compressions += 1;
            self.persist();
        }
        outcome.is_compressed()
    }

    /// Save failures are logged; the in-memory document stays authoritative
    fn persist(&mut self) {
        if let Err(e) = self.store.save(&mut self.history) {
            warn!("Failed to save history, will retry next cycle: {:#}", e);
        }
    }

    /// Pause before the next cycle: the cooldown, or exponential backoff
    /// while the evaluator keeps failing
    pub fn pause_after(&self, outcome: &CycleOutcome) -> Duration {
        if outcome.is_failure() && self.consecutive_failures > 0 {
            let exponent = (self.consecutive_failures - 1).min(32);
            let secs = self
                .settings
                .error_backoff_base_secs
                .saturating_mul(2u64.saturating_pow(exponent))
                .min(self.settings.error_backoff_max_secs);
            Duration::from_secs(secs)
        } else {
            Duration::from_secs(self.settings.cooldown_secs)
        }
    }

    /// Run cycles until shutdown is signalled or `max_cycles` have run.
    ///
    /// A shutdown abandons the in-flight cycle at its current await point.
    /// Every history mutation is saved before the next await, so nothing a
    /// cycle recorded is lost.
    pub async fn run(
        &mut self,
        mut shutdown_rx: broadcast::Receiver<()>,
        max_cycles: Option<u64>,
    ) -> LoopStats {
        info!(
            "Idea loop started ({} approved, {} rejected in history; sink: {})",
            self.history.approved_ideas.len(),
            self.history.rejected_ideas.len(),
            self.sink.name()
        );

        let mut completed: u64 = 0;
        loop {
            if max_cycles.is_some_and(|max| completed >= max) {
                info!("Reached cycle limit");
                break;
            }

            let cycle = self.stats.cycles + 1;
            let id = Uuid::new_v4().simple().to_string();
            let short_id = &id[..8];
            let span = info_span!("cycle", cycle, id = %short_id);

            let outcome = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested, abandoning in-flight cycle");
                    break;
                }
                outcome = self.run_cycle().instrument(span) => outcome,
            };
            completed += 1;

            info!(cycle, "Cycle {}: {}", cycle, outcome);
            info!("{}", self.stats);

            if max_cycles.is_some_and(|max| completed >= max) {
                continue;
            }

            let pause = self.pause_after(&outcome);
            if pause.is_zero() {
                continue;
            }
            if outcome.is_failure() {
                info!("Backing off for {}s", pause.as_secs());
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested during cooldown");
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Idea loop stopped: {}", self.stats);
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ideas::RejectionRecord;
    use crate::sink::MockIdeaSink;
    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// History store that keeps saves in memory
    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Option<HistoryDocument>>,
        fail_saves: bool,
    }

    impl HistoryStore for Arc<MemoryStore> {
        fn load(&self) -> HistoryDocument {
            self.saved.lock().unwrap().clone().unwrap_or_default()
        }

        fn save(&self, doc: &mut HistoryDocument) -> Result<()> {
            if self.fail_saves {
                bail!("disk full");
            }
            *self.saved.lock().unwrap() = Some(doc.clone());
            Ok(())
        }
    }

    /// Model that replays a fixed list of verdicts
    struct ScriptedModel {
        verdicts: Mutex<VecDeque<Result<Verdict>>>,
        summaries: Mutex<u32>,
    }

    impl ScriptedModel {
        fn new(verdicts: Vec<Result<Verdict>>) -> Arc<Self> {
            Arc::new(Self {
                verdicts: Mutex::new(verdicts.into()),
                summaries: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl IdeaModel for ScriptedModel {
        async fn evaluate(&self, _request: &EvaluationRequest) -> Result<Verdict> {
            self.verdicts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("script exhausted")))
        }

        async fn summarize(&self, rejected: &[RejectionRecord], _prior: &str) -> Result<String> {
            *self.summaries.lock().unwrap() += 1;
            Ok(format!("- {} rejections summarized", rejected.len()))
        }

        async fn analyze_batch(&self, _ideas: &[IdeaPayload]) -> Result<crate::analysis::BatchAnalysis> {
            bail!("not scripted")
        }
    }

    fn rejected(title: &str, reason: &str) -> Result<Verdict> {
        Ok(Verdict::Rejected { title: title.to_string(), reason: reason.to_string() })
    }

    fn approved(title: &str) -> Result<Verdict> {
        Ok(Verdict::Approved(IdeaPayload::titled(title)))
    }

    fn config(threshold: usize) -> Config {
        let mut config = Config::default();
        config.agent.compression_threshold = threshold;
        config.agent.error_backoff_base_secs = 60;
        config.agent.error_backoff_max_secs = 3600;
        config
    }

    fn quiet_sink() -> MockIdeaSink {
        let mut sink = MockIdeaSink::new();
        sink.expect_name().return_const("mock");
        sink
    }

    #[tokio::test]
    async fn test_approval_publishes_once() {
        let mut sink = quiet_sink();
        sink.expect_publish()
            .withf(|idea| idea.title == "Acme Analytics")
            .times(1)
            .returning(|_| Ok("ideas/acme.txt".to_string()));

        let store = Arc::new(MemoryStore::default());
        let model = ScriptedModel::new(vec![approved("Acme Analytics")]);
        let mut idea_loop = IdeaLoop::new(&config(100), Box::new(store.clone()), model, Arc::new(sink));

        let outcome = idea_loop.run_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Approved {
                title: "Acme Analytics".to_string(),
                delivered: Some("ideas/acme.txt".to_string()),
            }
        );
        let saved = store.saved.lock().unwrap().clone().unwrap();
        assert_eq!(saved.approved_ideas.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_approval() {
        let mut sink = quiet_sink();
        sink.expect_publish()
            .times(1)
            .returning(|_| Err(anyhow!("smtp down")));

        let model = ScriptedModel::new(vec![approved("Acme Analytics")]);
        let mut idea_loop =
            IdeaLoop::new(&config(100), Box::new(Arc::new(MemoryStore::default())), model, Arc::new(sink));

        let outcome = idea_loop.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Approved { delivered: None, .. }));
        assert_eq!(idea_loop.history().approved_ideas.len(), 1);
        assert_eq!(idea_loop.stats().sink_failures, 1);
    }

    #[tokio::test]
    async fn test_duplicate_is_not_published() {
        let mut sink = quiet_sink();
        sink.expect_publish().times(1).returning(|_| Ok("first".to_string()));

        let model = ScriptedModel::new(vec![approved("Acme Analytics"), approved("ACME  analytics")]);
        let mut idea_loop =
            IdeaLoop::new(&config(100), Box::new(Arc::new(MemoryStore::default())), model, Arc::new(sink));

        idea_loop.run_cycle().await;
        let outcome = idea_loop.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Duplicate { ref existing, .. } if existing == "Acme Analytics"));
        assert_eq!(idea_loop.history().approved_ideas.len(), 1);
        assert_eq!(
            idea_loop.history().rejected_ideas[0].reason,
            "Duplicate of previously approved idea: Acme Analytics"
        );
        assert_eq!(idea_loop.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_evaluator_failure_records_nothing() {
        let store = Arc::new(MemoryStore::default());
        let model = ScriptedModel::new(vec![Err(anyhow!("timeout"))]);
        let mut idea_loop = IdeaLoop::new(&config(100), Box::new(store.clone()), model, Arc::new(quiet_sink()));

        let outcome = idea_loop.run_cycle().await;
        assert!(outcome.is_failure());
        assert!(idea_loop.history().is_empty());
        assert!(store.saved.lock().unwrap().is_none());
        assert_eq!(idea_loop.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_save_failure_does_not_stop_cycle() {
        let store = Arc::new(MemoryStore { saved: Mutex::new(None), fail_saves: true });
        let model = ScriptedModel::new(vec![rejected("Pet Rocks", "TAM too small")]);
        let mut idea_loop = IdeaLoop::new(&config(100), Box::new(store), model, Arc::new(quiet_sink()));

        let outcome = idea_loop.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Rejected { .. }));
        assert_eq!(idea_loop.history().rejected_ideas.len(), 1);
    }

    #[tokio::test]
    async fn test_compression_on_threshold() {
        let model = ScriptedModel::new(vec![
            rejected("A", "crowded"),
            rejected("B", "tiny TAM"),
            rejected("C", "no moat"),
        ]);
        let mut idea_loop = IdeaLoop::new(
            &config(3),
            Box::new(Arc::new(MemoryStore::default())),
            model.clone(),
            Arc::new(quiet_sink()),
        );

        idea_loop.run_cycle().await;
        idea_loop.run_cycle().await;
        assert_eq!(*model.summaries.lock().unwrap(), 0);

        let outcome = idea_loop.run_cycle().await;
        assert!(matches!(outcome, CycleOutcome::Rejected { compressed: true, .. }));
        assert_eq!(*model.summaries.lock().unwrap(), 1);
        assert!(idea_loop.history().rejected_ideas.is_empty());
        assert_eq!(idea_loop.history().compressed_learnings, "- 3 rejections summarized");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let model = ScriptedModel::new(Vec::new());
        let mut idea_loop =
            IdeaLoop::new(&config(100), Box::new(Arc::new(MemoryStore::default())), model, Arc::new(quiet_sink()));
        let failed = CycleOutcome::Failed("x".to_string());

        idea_loop.consecutive_failures = 1;
        assert_eq!(idea_loop.pause_after(&failed).as_secs(), 60);
        idea_loop.consecutive_failures = 2;
        assert_eq!(idea_loop.pause_after(&failed).as_secs(), 120);
        idea_loop.consecutive_failures = 3;
        assert_eq!(idea_loop.pause_after(&failed).as_secs(), 240);
        idea_loop.consecutive_failures = 40;
        assert_eq!(idea_loop.pause_after(&failed).as_secs(), 3600);

        let ok = CycleOutcome::Rejected { title: "t".into(), reason: "r".into(), compressed: false };
        assert_eq!(idea_loop.pause_after(&ok).as_secs(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_after_max_cycles() {
        let model = ScriptedModel::new(vec![rejected("A", "crowded"), rejected("B", "crowded")]);
        let mut idea_loop =
            IdeaLoop::new(&config(100), Box::new(Arc::new(MemoryStore::default())), model, Arc::new(quiet_sink()));
        let (_tx, rx) = broadcast::channel(1);

        let stats = idea_loop.run(rx, Some(2)).await;
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.rejected, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let model = ScriptedModel::new(Vec::new());
        let mut idea_loop =
            IdeaLoop::new(&config(100), Box::new(Arc::new(MemoryStore::default())), model, Arc::new(quiet_sink()));
        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        let stats = idea_loop.run(rx, None).await;
        assert_eq!(stats.cycles, 0);
    }
}
