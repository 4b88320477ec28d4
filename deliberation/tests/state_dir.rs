//! State directory lifecycle: init, missions, a file-backed cycle, validation.

use std::sync::Arc;

use chrono::Utc;

use deliberation::core::mission_queue::EnqueueOutcome;
use deliberation::core::types::{CycleMetrics, MissionSource, StopReason, ThoughtRecord};
use deliberation::cycle::{Collaborators, CycleOrchestrator};
use deliberation::io::config::load_config;
use deliberation::io::state_store::{FileStateStore, load_state, read_jsonl};
use deliberation::missions::add_mission;
use deliberation::status::status_from_root;
use deliberation::test_support::{Harness, initialized_state_dir};
use deliberation::validate::validate_state_dir;

/// Verifies AI missions are capped at 0.79 and a repeat enqueue boosts by 0.05.
#[test]
fn ai_mission_ceiling_and_duplicate_boost() {
    let temp = initialized_state_dir();
    let root = temp.path();
    let now = Utc::now();

    // Occupy the active slot so the AI mission stays queued.
    add_mission(root, "Keep the lights on", MissionSource::User, 0.5, now).expect("add");
    let first = add_mission(root, "X", MissionSource::Ai, 0.95, now).expect("add");
    let second = add_mission(root, "X", MissionSource::Ai, 0.95, now).expect("add");

    assert!(matches!(first.outcome, EnqueueOutcome::Inserted { priority, .. } if (priority - 0.79).abs() < 1e-9));
    assert!(matches!(second.outcome, EnqueueOutcome::Boosted { priority, .. } if (priority - 0.84).abs() < 1e-9));

    let state = load_state(&FileStateStore::new(root).state_path()).expect("state");
    assert_eq!(state.missions.queued_missions.len(), 1);
    assert!((state.missions.queued_missions[0].priority - 0.84).abs() < 1e-9);
}

/// Verifies a cycle persists through the file store and the result validates.
#[tokio::test]
async fn file_backed_cycle_round_trip() {
    let temp = initialized_state_dir();
    let root = temp.path().to_path_buf();
    add_mission(&root, "Study tokio channels", MissionSource::User, 0.6, Utc::now()).expect("add");

    let harness = Harness::default();
    let store = FileStateStore::new(&root);
    let deps = Collaborators {
        store: Arc::new(store.clone()),
        ..harness.collaborators()
    };
    let config = load_config(&store.config_path()).expect("config");
    let mut orchestrator = CycleOrchestrator::new(deps, config);

    let first = orchestrator.run_cycle().await.expect("cycle 1");
    assert_eq!(first.cycle_id, 1);
    let status = status_from_root(&root).expect("status");
    assert_eq!(status.cycle_count, 1);
    assert!(status.active_mission.is_some());
    assert_eq!(status.active_goals.len(), 1);
    assert!(status.active_goals[0].locked);

    harness.tools.push_ok(
        "Tokio offers mpsc, oneshot, broadcast, and watch channels; mpsc is the usual choice \
         for fan-in work queues with bounded capacity and backpressure.",
    );
    let second = orchestrator.run_cycle().await.expect("cycle 2");
    assert_eq!(second.cycle_id, 2);
    assert_eq!(second.stop_reason, StopReason::NaturalStop);
    assert_eq!(second.metrics.goals_completed, 1);

    let metrics: Vec<CycleMetrics> = read_jsonl(&store.metrics_path()).expect("metrics");
    assert_eq!(metrics.iter().map(|m| m.cycle_id).collect::<Vec<_>>(), vec![1, 2]);
    let thoughts: Vec<ThoughtRecord> = read_jsonl(&store.thoughts_path()).expect("thoughts");
    assert!(thoughts.iter().any(|t| t.cycle_id == 2 && t.action_taken));

    let status = status_from_root(&root).expect("status");
    assert_eq!(status.cycle_count, 2);
    assert!(status.active_mission.is_none(), "mission closes with its goal");
    assert!(status.active_goals.is_empty());
    assert_eq!(status.completed_goals, 1);

    let outcome = validate_state_dir(&root, Utc::now()).expect("validate");
    assert!(outcome.is_valid(), "{:?}", outcome.violations);
    assert_eq!(outcome.cycle_count, 2);
}
