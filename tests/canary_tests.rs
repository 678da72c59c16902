mod common;

use common::{endpoint_of, targets, FakeProvisioner, Harness};
use rollout_orchestrator::traffic::TrafficChange;
use rollout_orchestrator::{
    CanaryConfig, DeploymentStrategyConfig, HealthStatus, RolloutError, TargetRole, TargetStatus,
};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn canary(auto_promote: bool, auto_rollback: bool) -> CanaryConfig {
    CanaryConfig {
        canary_targets: vec!["canary-1".to_string()],
        baseline_target: "primary".to_string(),
        initial_traffic_percent: 5.0,
        traffic_increment_step: 5.0,
        max_traffic_percent: 20.0,
        step_duration: Duration::from_millis(20),
        success_threshold: 0.95,
        error_threshold: 0.05,
        auto_promote,
        auto_rollback,
        monitor_duration: Duration::from_secs(5),
        ..CanaryConfig::default()
    }
}

fn harness() -> Harness {
    let harness = Harness::new(targets(&["primary", "canary-1"]));
    harness.metrics.set("primary", 0.99, 0.01);
    harness.metrics.set("canary-1", 0.99, 0.01);
    harness
}

/// Weights applied to `target`, in order.
async fn weights_of(harness: &Harness, target: &str) -> Vec<f64> {
    harness
        .traffic
        .history()
        .await
        .into_iter()
        .filter_map(|change| match change {
            TrafficChange::Weight { target: t, weight } if t == target => Some(weight),
            _ => None,
        })
        .collect()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn healthy_canary_ramps_then_promotes() {
    let harness = harness();
    let strategy = DeploymentStrategyConfig::Canary(canary(true, true));

    assert_ok!(harness.orchestrator.deploy(&strategy, "v2").await);

    let ramp = weights_of(&harness, "canary-1").await;
    let expected = [0.05, 0.10, 0.15, 0.20];
    assert_eq!(ramp.len(), expected.len());
    for (applied, expected) in ramp.iter().zip(expected) {
        assert!(approx(*applied, expected), "{applied} != {expected}");
    }
    assert!(ramp.windows(2).all(|w| w[0] <= w[1]));

    let history = harness.traffic.history().await;
    assert_eq!(
        history.last(),
        Some(&TrafficChange::Switch {
            from: vec!["primary".to_string()],
            to: vec!["canary-1".to_string()],
        })
    );

    let status = harness.orchestrator.status().await;
    assert_eq!(status["canary-1"].role, TargetRole::Primary);
    assert_eq!(status["canary-1"].traffic_weight, 1.0);
    assert_eq!(status["primary"].role, TargetRole::Standby);
    assert_eq!(status["primary"].traffic_weight, 0.0);
    assert!(approx(status["canary-1"].metrics.availability, 0.99));
}

#[tokio::test]
async fn error_spike_rolls_back_before_second_step() {
    let harness = harness();
    harness.metrics.set("canary-1", 0.99, 0.2);
    let strategy = DeploymentStrategyConfig::Canary(canary(true, true));

    let err = assert_err!(harness.orchestrator.deploy(&strategy, "v2").await);
    let RolloutError::CanaryBreach {
        target,
        reason,
        metrics,
    } = &err
    else {
        panic!("expected a canary breach, got {err}");
    };
    assert_eq!(target, "canary-1");
    assert!(reason.contains("0.200"), "{reason}");
    assert!(reason.contains("0.050"), "{reason}");
    assert!(approx(metrics.as_ref().unwrap().canary_error_rate, 0.2));

    let ramp = weights_of(&harness, "canary-1").await;
    assert_eq!(ramp, vec![0.05, 0.0]);
    assert!(ramp.iter().all(|w| *w < 0.10));
    assert_eq!(harness.traffic.weight("primary").await, 1.0);

    let status = harness.orchestrator.status().await;
    assert_eq!(status["canary-1"].status, TargetStatus::RolledBack);
    assert_eq!(status["canary-1"].traffic_weight, 0.0);
}

#[tokio::test]
async fn breach_without_auto_rollback_leaves_traffic_in_place() {
    let harness = harness();
    harness.metrics.set("canary-1", 0.90, 0.01);
    let strategy = DeploymentStrategyConfig::Canary(canary(true, false));

    let err = assert_err!(harness.orchestrator.deploy(&strategy, "v2").await);
    assert!(matches!(err, RolloutError::CanaryBreach { .. }));

    assert_eq!(weights_of(&harness, "canary-1").await, vec![0.05]);
    let status = harness.orchestrator.status().await;
    assert_eq!(status["canary-1"].status, TargetStatus::Deployed);
    assert_eq!(status["canary-1"].health, HealthStatus::Unhealthy);
}

#[tokio::test]
async fn canary_worse_than_baseline_breaches() {
    let harness = harness();
    harness.metrics.set("primary", 0.99, 0.01);
    harness.metrics.set("canary-1", 0.99, 0.04);
    let strategy = DeploymentStrategyConfig::Canary(canary(true, true));

    let err = assert_err!(harness.orchestrator.deploy(&strategy, "v2").await);
    assert!(err.to_string().contains("above baseline"));
}

#[tokio::test]
async fn failing_canary_endpoint_is_a_breach() {
    let harness = harness();
    harness.health.fail(&endpoint_of("canary-1"));
    let strategy = DeploymentStrategyConfig::Canary(canary(true, true));

    let err = assert_err!(harness.orchestrator.deploy(&strategy, "v2").await);
    assert!(err.to_string().contains("health check failed"));
    assert_eq!(
        harness.orchestrator.status().await["canary-1"].status,
        TargetStatus::RolledBack
    );
}

#[tokio::test]
async fn missing_metrics_are_a_breach() {
    let harness = harness();
    harness.metrics.make_unavailable("canary-1");
    let strategy = DeploymentStrategyConfig::Canary(canary(false, true));

    let err = assert_err!(harness.orchestrator.deploy(&strategy, "v2").await);
    assert!(matches!(
        &err,
        RolloutError::CanaryBreach { metrics: None, .. }
    ));
}

#[tokio::test]
async fn holds_at_max_until_monitoring_ends() {
    let harness = harness();
    let mut config = canary(false, true);
    config.monitor_duration = Duration::from_millis(300);
    let strategy = DeploymentStrategyConfig::Canary(config);

    assert_ok!(harness.orchestrator.deploy(&strategy, "v2").await);

    let ramp = weights_of(&harness, "canary-1").await;
    assert!(approx(*ramp.last().unwrap(), 0.20));
    assert!(ramp.iter().all(|w| *w <= 0.20 + 1e-9));
    assert_eq!(harness.traffic.switch_count().await, 0);

    let status = harness.orchestrator.status().await;
    assert_eq!(status["canary-1"].role, TargetRole::Canary);
    assert_eq!(status["canary-1"].status, TargetStatus::Deployed);
}

#[tokio::test]
async fn monitoring_window_ends_the_ramp_early() {
    let harness = harness();
    let mut config = canary(true, true);
    config.step_duration = Duration::from_millis(100);
    config.monitor_duration = Duration::from_millis(250);
    let strategy = DeploymentStrategyConfig::Canary(config);

    assert_ok!(harness.orchestrator.deploy(&strategy, "v2").await);

    let ramp = weights_of(&harness, "canary-1").await;
    assert_eq!(ramp.len(), 3);
    assert!(approx(ramp[2], 0.15));
    assert_eq!(harness.traffic.switch_count().await, 0);
}

#[tokio::test]
async fn cancellation_interrupts_monitoring() {
    let harness = harness();
    let mut config = canary(true, true);
    config.step_duration = Duration::from_secs(10);
    config.monitor_duration = Duration::from_secs(60);
    let strategy = DeploymentStrategyConfig::Canary(config);

    let token = harness.orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = assert_err!(harness.orchestrator.deploy(&strategy, "v2").await);
    assert!(matches!(err, RolloutError::Cancelled));
    assert_eq!(weights_of(&harness, "canary-1").await, vec![0.05]);
}

#[tokio::test]
async fn failed_canary_deploy_moves_no_traffic() {
    let harness = harness();
    harness.provisioner.fail_deploy("canary-1");
    let strategy = DeploymentStrategyConfig::Canary(canary(true, true));

    assert_err!(harness.orchestrator.deploy(&strategy, "v2").await);
    assert!(harness.traffic.history().await.is_empty());
    assert_eq!(harness.provisioner.deploys(), vec!["canary-1"]);
}

#[tokio::test]
async fn cancellation_during_canary_deploy_moves_no_traffic() {
    let harness = Harness::with_provisioner(
        targets(&["primary", "canary-1"]),
        FakeProvisioner::with_delay(Duration::from_millis(200)),
    );
    let strategy = DeploymentStrategyConfig::Canary(canary(true, true));

    let token = harness.orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = assert_err!(harness.orchestrator.deploy(&strategy, "v2").await);
    assert!(matches!(err, RolloutError::Cancelled));
    assert!(harness.traffic.history().await.is_empty());

    let status = harness.orchestrator.status().await;
    assert_eq!(status["canary-1"].status, TargetStatus::Deployed);
    assert_eq!(status["primary"].traffic_weight, 0.0);
}
