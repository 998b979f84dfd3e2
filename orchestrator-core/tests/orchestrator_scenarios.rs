//! End-to-end coverage of the orchestrator's core scenarios against a fake
//! executor transport (see `tests/common`), plus the cancel/queue edge
//! cases.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::config::{BytecodeConfig, PoolConfig};
use orchestrator_core::error::ErrorKind;
use orchestrator_core::orchestrator::{Orchestrator, OrchestratorConfig};
use orchestrator_core::protocol::{ExecutionOptions, ExecutionRequest, Language};
use orchestrator_core::transform::Identity;

use common::{Behavior, FakeFactory};

fn single_handle_config() -> OrchestratorConfig {
    OrchestratorConfig {
        scripted: PoolConfig { ceiling: 1, queue_ceiling: 100, idle_floor: None, idle_timeout: None },
        interpreted: PoolConfig { ceiling: 1, queue_ceiling: 100, idle_floor: None, idle_timeout: None },
        bytecode_modules: HashMap::new(),
        bytecode: BytecodeConfig::default(),
        idle_sweep_interval: None,
    }
}

fn request(id: &str, language: Language, timeout_ms: u64) -> ExecutionRequest {
    ExecutionRequest {
        id: id.to_string(),
        code: "irrelevant to the fake executor".to_string(),
        language,
        options: ExecutionOptions { timeout_ms, ..Default::default() },
        priority: 0,
    }
}

fn orchestrator(behavior: Behavior) -> Orchestrator {
    orchestrator_with(single_handle_config(), behavior)
}

fn orchestrator_with(config: OrchestratorConfig, behavior: Behavior) -> Orchestrator {
    Orchestrator::spawn(config, Arc::new(FakeFactory { behavior }), Arc::new(Identity))
}

#[tokio::test]
async fn happy_path_scripted_completes() {
    let orch = orchestrator(Behavior::EchoComplete);
    let result = orch.submit(request("a", Language::Scripted, 5_000)).await.unwrap();
    assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
}

#[tokio::test]
async fn cooperative_cancel_resolves_as_cancelled() {
    let orch = orchestrator(Behavior::CooperativeCancel);
    let waiter = orch.clone();
    let submitted = tokio::spawn(async move { waiter.submit(request("b", Language::Scripted, 60_000)).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(orch.cancel("b".to_string()).await);

    let outcome = submitted.await.unwrap().unwrap().unwrap_err();
    assert_eq!(outcome.kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn forced_cancel_kills_an_unresponsive_handle() {
    let orch = orchestrator(Behavior::IgnoreCancel);
    let waiter = orch.clone();
    let submitted = tokio::spawn(async move { waiter.submit(request("c", Language::Scripted, 60_000)).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(orch.cancel("c".to_string()).await);

    let outcome = submitted.await.unwrap().unwrap().unwrap_err();
    assert_eq!(outcome.kind, ErrorKind::CancelError);
}

#[tokio::test]
async fn crash_during_execution_reports_worker_crash() {
    let orch = orchestrator(Behavior::CrashOnExecute);
    let outcome = orch
        .submit(request("d", Language::Scripted, 5_000))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(outcome.kind, ErrorKind::WorkerCrash);
}

#[tokio::test]
async fn soft_timeout_starts_cooperative_cancel() {
    let orch = orchestrator(Behavior::CooperativeCancel);
    // Scripted grace margin is fixed at 5s, so the soft timer fires ~5s
    // after dispatch regardless of how small timeout_ms is.
    let outcome = orch
        .submit(request("e", Language::Scripted, 1))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(outcome.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn prompt_round_trip_resolves_with_the_answer() {
    let orch = orchestrator(Behavior::PromptRoundTrip);
    let waiter = orch.clone();
    let submitted = tokio::spawn(async move { waiter.submit(request("f", Language::Interpreted, 5_000)).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    orch.resolve_input("f".to_string(), "Ada".to_string(), None);

    let result = submitted.await.unwrap().unwrap();
    assert_eq!(result.unwrap(), serde_json::json!({"greeting": "hi Ada"}));
}

#[tokio::test]
async fn queue_full_resolves_without_touching_the_pool() {
    let mut config = single_handle_config();
    config.scripted.queue_ceiling = 0;
    let orch = orchestrator_with(config, Behavior::EchoComplete);

    let outcome = orch
        .submit(request("g", Language::Scripted, 5_000))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(outcome.kind, ErrorKind::QueueFull);
}

#[tokio::test]
async fn unregistered_bytecode_module_is_rejected() {
    let orch = orchestrator(Behavior::EchoComplete);
    let outcome = orch
        .submit(request("h", Language::Bytecode("nope".to_string()), 5_000))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(outcome.kind, ErrorKind::UnknownLanguage);
}

#[tokio::test]
async fn cancel_of_a_queued_task_resolves_immediately() {
    let orch = orchestrator(Behavior::CooperativeCancel);

    let first_waiter = orch.clone();
    let first = tokio::spawn(async move { first_waiter.submit(request("i1", Language::Scripted, 60_000)).await });
    tokio::time::sleep(Duration::from_millis(30)).await; // i1 now occupies the single handle

    let second_waiter = orch.clone();
    let second = tokio::spawn(async move { second_waiter.submit(request("i2", Language::Scripted, 60_000)).await });
    tokio::time::sleep(Duration::from_millis(20)).await; // i2 sits in the queue, never dispatched

    assert!(orch.cancel("i2".to_string()).await);
    let outcome = second.await.unwrap().unwrap().unwrap_err();
    assert_eq!(outcome.kind, ErrorKind::Cancelled);

    orch.cancel("i1".to_string()).await;
    let _ = first.await;
}

#[tokio::test]
async fn cancel_of_an_unknown_id_is_a_no_op() {
    let orch = orchestrator(Behavior::EchoComplete);
    assert!(!orch.cancel("missing".to_string()).await);
}
