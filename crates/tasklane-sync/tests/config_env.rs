//! Engine configuration loaded from the process environment.
//!
//! Values may come from a local `.env`; whatever is set, the loaded config
//! stays within its bounds and drives a working engine.

use tasklane_sync::defaults::REORDER_DEBOUNCE_MIN_MS;
use tasklane_sync::testing::{sample_task, TestHarness};
use tasklane_sync::EngineConfig;

fn load_config() -> EngineConfig {
    dotenvy::dotenv().ok();
    EngineConfig::from_env()
}

#[test]
fn test_env_config_respects_bounds() {
    let config = load_config();
    assert!(config.reorder_debounce_ms >= REORDER_DEBOUNCE_MIN_MS);
    assert!(config.event_bus_capacity >= 1);
    assert!(config.max_pending_per_key >= 1);
    assert_eq!(
        config.reorder_debounce().as_millis(),
        u128::from(config.reorder_debounce_ms)
    );
}

#[tokio::test]
async fn test_engine_runs_with_env_config() {
    let config = load_config();
    let harness = TestHarness::with_config(config.clone()).unwrap();
    assert_eq!(harness.engine.config(), &config);

    harness.remote.seed_tasks(vec![sample_task(None, "from env", 0)]);
    let tasks = harness.engine.tasks().refresh(None).await.unwrap();
    assert_eq!(tasks.len(), 1);
}
