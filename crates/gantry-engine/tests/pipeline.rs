use async_trait::async_trait;
use gantry_engine::config::PipelineConfig;
use gantry_engine::{
    Artifacts, ContractRegistry, ContractValidator, DecisionRequest, EngineError, HaltReason,
    Orchestrator, ReceiptSource, StepAction, StepActions, StepContext, StepFailure, StepOutput,
};
use gantry_state::{FsStore, InMemoryStore, LeaseStore, Storage};
use gantry_types::{
    DecisionAction, Finding, GateName, GateState, LockKey, OpsTier, ReceiptResult, Run, Stage,
    StepName, StepStatus, Verdict,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STEP_COST: u64 = 10;

/// Writes the step's artifact and counts invocations
#[derive(Debug)]
struct ProduceArtifact {
    step: StepName,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl StepAction for ProduceArtifact {
    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = match self.step {
            StepName::Discovery => json!({
                "topic": "tidal energy",
                "sources": [{ "title": "Harbour turbine survey" }]
            })
            .to_string(),
            StepName::Script => "Tidal turbines hum beneath the harbour while engineers \
                                 watch instruments glow and gulls circle overhead at dusk."
                .to_string(),
            _ => json!({ "step": self.step.as_str() }).to_string(),
        };
        Ok(StepOutput::new(json!({
            "step": self.step.as_str(),
            "revision": ctx.inputs["revision"],
        }))
        .with_cost(STEP_COST)
        .with_artifact(self.step.artifact(), body))
    }
}

#[derive(Debug)]
struct AlwaysFails;

#[async_trait]
impl StepAction for AlwaysFails {
    async fn run(&self, _ctx: &StepContext) -> Result<StepOutput, StepFailure> {
        Err(StepFailure::action_failed("upstream API returned 500"))
    }
}

/// Editorial review that fails once the run reaches gate2
struct EditorialHold;

impl ContractValidator for EditorialHold {
    fn name(&self) -> &str {
        "editorial"
    }

    fn evaluate(&self, run: &Run, _artifacts: &Artifacts) -> gantry_engine::Result<Verdict> {
        if run.is_at_gate(GateName::Gate2) {
            Ok(Verdict::Fail {
                findings: vec![Finding::new("editorial.hold", "legal has not signed off")],
            })
        } else {
            Ok(Verdict::Pass)
        }
    }
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.worker.host_id = "test-host".into();
    config.worker.worker_id = "worker-1".into();
    config
}

fn producing_actions(calls: &Arc<AtomicUsize>) -> StepActions {
    StepName::ALL.iter().fold(StepActions::new(), |actions, step| {
        actions.with(
            *step,
            Arc::new(ProduceArtifact {
                step: *step,
                calls: calls.clone(),
            }),
        )
    })
}

fn orchestrator(store: Arc<dyn Storage>, calls: &Arc<AtomicUsize>) -> Orchestrator {
    let config = config();
    let contracts = ContractRegistry::from_config(&config.contracts).unwrap();
    Orchestrator::new(config, store, producing_actions(calls), contracts).unwrap()
}

async fn full_run(store: Arc<dyn Storage>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(store.clone(), &calls);

    let run = orchestrator.init_run("audio").await.unwrap();
    assert_eq!(run.current_stage, Stage::Discovery);
    assert_eq!(run.gate1_state, GateState::Pending);
    assert_eq!(run.version, 1);

    let progress = orchestrator.run_e2e(&run.run_id).await.unwrap();
    assert_eq!(progress.halted, HaltReason::AwaitingGate { gate: GateName::Gate1 });
    assert_eq!(progress.receipts.len(), 2);
    assert_eq!(progress.run.current_stage, Stage::Assets);

    // Halted at the gate: another pass does nothing
    let again = orchestrator.run_e2e(&run.run_id).await.unwrap();
    assert!(again.receipts.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let outcome = orchestrator
        .decide_gate(&run.run_id, GateName::Gate1, DecisionRequest::approve("editor"))
        .await
        .unwrap();
    assert_eq!(outcome.run.gate1_state, GateState::Approved);
    assert!(outcome.reports.iter().all(|r| r.verdict.is_pass()));

    let progress = orchestrator.run_e2e(&run.run_id).await.unwrap();
    assert_eq!(progress.halted, HaltReason::AwaitingGate { gate: GateName::Gate2 });
    assert_eq!(progress.receipts.len(), 3);

    orchestrator
        .decide_gate(&run.run_id, GateName::Gate2, DecisionRequest::approve("editor"))
        .await
        .unwrap();

    let progress = orchestrator.run_e2e(&run.run_id).await.unwrap();
    assert_eq!(progress.halted, HaltReason::AwaitingRender);
    assert!(progress.receipts.is_empty());

    let render = orchestrator.render_and_upload(&run.run_id).await.unwrap();
    assert_eq!(render.source, ReceiptSource::Executed);
    assert_eq!(render.receipt.result, ReceiptResult::Success);
    assert!(render.run.is_complete());
    assert_eq!(render.run.budget_remaining, 1000 - 6 * STEP_COST);
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    let progress = orchestrator.run_e2e(&run.run_id).await.unwrap();
    assert_eq!(progress.halted, HaltReason::Complete);

    let history = orchestrator.history(&run.run_id).await.unwrap();
    let steps: Vec<StepName> = history.iter().map(|r| r.step_name).collect();
    assert_eq!(steps, StepName::ALL.to_vec());

    for report in ["ops_tier_report.json", "originality_report.json", "render_readiness_report.json"] {
        assert!(
            store.read_artifact(&run.run_id, report).await.unwrap().is_some(),
            "{} missing",
            report
        );
    }

    let summary = orchestrator.summary(&run.run_id).await.unwrap();
    assert_eq!(summary.tier.tier, OpsTier::Normal);
    assert_eq!(summary.latest_receipts.len(), 6);
    assert!(summary.gates.iter().all(|g| g.state == GateState::Approved));
}

#[tokio::test]
async fn full_run_in_memory() {
    full_run(Arc::new(InMemoryStore::new())).await;
}

#[tokio::test]
async fn full_run_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).await.unwrap();
    full_run(Arc::new(store)).await;

    let runs: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert_eq!(runs.len(), 1);
    let run_dir = runs[0].path();
    assert!(run_dir.join("run.json").is_file());
    assert!(run_dir.join("script.md").is_file());
    assert_eq!(std::fs::read_dir(run_dir.join("receipts")).unwrap().count(), 6);
}

#[tokio::test]
async fn init_run_is_unique_per_category_and_day() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(Arc::new(InMemoryStore::new()), &calls);

    orchestrator.init_run("audio").await.unwrap();
    let err = orchestrator.init_run("audio").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
    assert!(orchestrator.init_run("video").await.is_ok());
    assert!(matches!(
        orchestrator.init_run("   ").await,
        Err(EngineError::InvalidTransition(_))
    ));
    assert_eq!(orchestrator.list_runs().await.unwrap().len(), 2);
}

#[tokio::test]
async fn unchanged_inputs_return_the_cached_receipt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(Arc::new(InMemoryStore::new()), &calls);
    let run = orchestrator.init_run("audio").await.unwrap();

    let first = orchestrator
        .execute_step(&run.run_id, StepName::Discovery)
        .await
        .unwrap();
    assert_eq!(first.source, ReceiptSource::Executed);

    let second = orchestrator
        .execute_step(&run.run_id, StepName::Discovery)
        .await
        .unwrap();
    assert_eq!(second.source, ReceiptSource::Cached);
    assert_eq!(second.receipt, first.receipt);
    assert_eq!(second.receipt.outputs_hash, first.receipt.outputs_hash);
    assert_eq!(second.run.version, first.run.version);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.history(&run.run_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failing_contract_blocks_gate2() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn Storage> = Arc::new(FsStore::open(dir.path()).await.unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let contracts = ContractRegistry::new().with(Arc::new(EditorialHold), true);
    let orchestrator =
        Orchestrator::new(config(), store.clone(), producing_actions(&calls), contracts).unwrap();

    let run = orchestrator.init_run("audio").await.unwrap();
    orchestrator.run_e2e(&run.run_id).await.unwrap();
    orchestrator
        .decide_gate(&run.run_id, GateName::Gate1, DecisionRequest::approve("editor"))
        .await
        .unwrap();
    let at_gate = orchestrator.run_e2e(&run.run_id).await.unwrap().run;

    let err = orchestrator
        .decide_gate(
            &run.run_id,
            GateName::Gate2,
            DecisionRequest::approve("editor")
                .with_notes("ship it")
                .acknowledging_warnings(),
        )
        .await
        .unwrap_err();
    match &err {
        EngineError::GateBlocked { gate, validators, .. } => {
            assert_eq!(*gate, GateName::Gate2);
            assert_eq!(validators, &vec!["editorial".to_string()]);
        }
        other => panic!("expected GateBlocked, got {:?}", other),
    }

    let after = orchestrator.load_run(&run.run_id).await.unwrap();
    assert_eq!(after.gate2_state, GateState::Pending);
    assert_eq!(after.version, at_gate.version);
    assert!(dir
        .path()
        .join(run.run_id.as_str())
        .join("editorial_report.json")
        .is_file());

    // Rejection is always available and sends the run back to timeline
    let rejected = orchestrator
        .decide_gate(
            &run.run_id,
            GateName::Gate2,
            DecisionRequest::reject("editor").with_notes("recut the ending"),
        )
        .await
        .unwrap();
    assert_eq!(rejected.run.gate2_state, GateState::Rejected);
    assert_eq!(rejected.run.current_stage, Stage::Timeline);
    assert_eq!(rejected.run.revision(StepName::Timeline), 1);

    // Re-running timeline re-opens the gate
    let calls_before = calls.load(Ordering::SeqCst);
    let progress = orchestrator.run_e2e(&run.run_id).await.unwrap();
    assert_eq!(progress.halted, HaltReason::AwaitingGate { gate: GateName::Gate2 });
    assert_eq!(calls.load(Ordering::SeqCst), calls_before + 1);
    assert_eq!(progress.run.gate2_state, GateState::Pending);
    assert_eq!(
        progress.run.latest_decision(GateName::Gate2).map(|d| d.action),
        Some(DecisionAction::Reset)
    );
}

#[tokio::test]
async fn warnings_need_an_acknowledged_override() {
    struct Wary;
    impl ContractValidator for Wary {
        fn name(&self) -> &str {
            "tone"
        }
        fn evaluate(&self, _run: &Run, _artifacts: &Artifacts) -> gantry_engine::Result<Verdict> {
            Ok(Verdict::Warn {
                findings: vec![Finding::new("tone.sharp", "opening line is harsh")],
            })
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let contracts = ContractRegistry::new().with(Arc::new(Wary), true);
    let orchestrator = Orchestrator::new(
        config(),
        Arc::new(InMemoryStore::new()),
        producing_actions(&calls),
        contracts,
    )
    .unwrap();
    let run = orchestrator.init_run("audio").await.unwrap();
    orchestrator.run_e2e(&run.run_id).await.unwrap();

    let err = orchestrator
        .decide_gate(&run.run_id, GateName::Gate1, DecisionRequest::approve("editor"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OverrideRequired { .. }));

    let outcome = orchestrator
        .decide_gate(
            &run.run_id,
            GateName::Gate1,
            DecisionRequest::approve("editor")
                .with_notes("tone is intentional")
                .acknowledging_warnings(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.run.gate1_state, GateState::Approved);
    let decision = outcome.run.latest_decision(GateName::Gate1).unwrap();
    assert!(decision.acknowledged_warnings);
    assert_eq!(decision.contracts_snapshot.len(), 1);
}

#[tokio::test]
async fn exhausted_budget_pauses_render() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(Arc::new(InMemoryStore::new()), &calls);
    let run = orchestrator.init_run("audio").await.unwrap();

    orchestrator
        .adjust_ops(&run.run_id, Some(0), false)
        .await
        .unwrap();
    let report = orchestrator.ops_tier(&run.run_id).await.unwrap();
    assert_eq!(report.tier, OpsTier::Paused);
    assert_eq!(report.budget_remaining, 0);

    let err = orchestrator.render_and_upload(&run.run_id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::TierBlocked {
            step: StepName::RenderUpload,
            tier: OpsTier::Paused,
            ..
        }
    ));
    let history = orchestrator.history(&run.run_id).await.unwrap();
    assert!(history.iter().all(|r| r.step_name != StepName::RenderUpload));

    let restored = orchestrator
        .adjust_ops(&run.run_id, Some(500), true)
        .await
        .unwrap();
    assert_eq!(restored.budget_remaining, 500);
    assert_eq!(
        orchestrator.ops_tier(&run.run_id).await.unwrap().tier,
        OpsTier::Normal
    );
}

#[tokio::test]
async fn render_requires_approved_gate2() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(Arc::new(InMemoryStore::new()), &calls);
    let run = orchestrator.init_run("audio").await.unwrap();

    let err = orchestrator.render_and_upload(&run.run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_step_leaves_stage_and_records_receipt() {
    let config = config();
    let contracts = ContractRegistry::from_config(&config.contracts).unwrap();
    let actions = StepActions::new().with(StepName::Discovery, Arc::new(AlwaysFails));
    let orchestrator =
        Orchestrator::new(config, Arc::new(InMemoryStore::new()), actions, contracts).unwrap();
    let run = orchestrator.init_run("audio").await.unwrap();

    let err = orchestrator.run_e2e(&run.run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::StepExecution { step: StepName::Discovery, .. }));

    let after = orchestrator.load_run(&run.run_id).await.unwrap();
    assert_eq!(after.current_stage, Stage::Discovery);
    assert_eq!(after.step(StepName::Discovery).status, StepStatus::Failed);
    assert_eq!(after.failure_count, 1);

    let history = orchestrator.history(&run.run_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, ReceiptResult::Failure);
}

#[tokio::test]
async fn held_run_lease_refuses_second_driver() {
    let store: Arc<dyn Storage> = Arc::new(InMemoryStore::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(store.clone(), &calls);
    let run = orchestrator.init_run("audio").await.unwrap();

    store
        .acquire(&LockKey::run(&run.run_id), "other-host:w9", Duration::from_secs(60))
        .await
        .unwrap();

    let err = orchestrator.run_e2e(&run.run_id).await.unwrap_err();
    assert!(matches!(err, EngineError::LockHeld { .. }));
    assert!(err.is_contention());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rewind_reworks_from_an_earlier_step() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(Arc::new(InMemoryStore::new()), &calls);
    let run = orchestrator.init_run("audio").await.unwrap();
    orchestrator.run_e2e(&run.run_id).await.unwrap();
    orchestrator
        .decide_gate(&run.run_id, GateName::Gate1, DecisionRequest::approve("editor"))
        .await
        .unwrap();
    orchestrator.run_e2e(&run.run_id).await.unwrap();

    let rewound = orchestrator
        .rewind(&run.run_id, StepName::Script, "ops")
        .await
        .unwrap();
    assert_eq!(rewound.current_stage, Stage::Script);
    assert_eq!(rewound.gate1_state, GateState::Pending);
    assert_eq!(rewound.step(StepName::Voice).status, StepStatus::Pending);

    let before = calls.load(Ordering::SeqCst);
    let progress = orchestrator.run_e2e(&run.run_id).await.unwrap();
    assert_eq!(progress.halted, HaltReason::AwaitingGate { gate: GateName::Gate1 });
    assert_eq!(calls.load(Ordering::SeqCst), before + 1);
}

#[tokio::test]
async fn missing_run_is_not_found() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = orchestrator(Arc::new(InMemoryStore::new()), &calls);
    let id = gantry_types::RunId::new("ghost-20260101");

    assert!(matches!(
        orchestrator.run_e2e(&id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.summary(&id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.history(&id).await,
        Err(EngineError::NotFound(_))
    ));
}
