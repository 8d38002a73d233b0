// End-to-end hook behaviour against a fake supervisor

mod common;

use certhook::error::{exit_codes, RotationError};
use certhook::rotation::{Outcome, RecoveryOutcome, RenewalState};
use common::{Harness, PROXY, STORAGE};

#[tokio::test]
async fn test_successful_renewal_cycle() {
    let h = Harness::with_lease("lease-a");
    let old = h.fingerprint().await;

    let pre = h.orchestrator.pre_renewal().await.unwrap();
    assert_eq!(pre.proxy, PROXY);
    assert_eq!(pre.previous_fingerprint, old);
    assert!(!h.supervisor.running(PROXY));
    assert!(h.supervisor.running(STORAGE), "storage keeps running during the challenge");

    let record = h.orchestrator.store().load().await.unwrap();
    assert_eq!(record.state, RenewalState::ChallengeInFlight);

    h.write_lease("lease-b");
    let new = h.fingerprint().await;
    assert_ne!(old, new);

    let post = h.orchestrator.post_renewal().await.unwrap();
    assert_eq!(post.outcome, Outcome::Renewed);
    assert_eq!(post.restarted, vec![PROXY.to_string(), STORAGE.to_string()]);
    assert!(h.supervisor.running(PROXY));
    assert!(h.supervisor.running(STORAGE));

    let record = h.orchestrator.store().load().await.unwrap();
    assert_eq!(record.state, RenewalState::Idle);
    assert_eq!(record.bound_fingerprint, new);
    assert_eq!(record.last_outcome, Some(Outcome::Renewed));
    assert!(record.previous_fingerprint.is_none());
    assert!(record.last_error.is_none());
}

#[tokio::test]
async fn test_pre_hook_with_proxy_already_stopped() {
    let h = Harness::with_lease("lease-a");
    h.supervisor.stop_manually(PROXY);

    let result = h.orchestrator.pre_renewal().await;
    assert!(result.is_ok(), "stopping a stopped proxy must succeed: {:?}", result.err());
    assert_eq!(h.supervisor.count("stop", PROXY), 1);
    assert!(!h.supervisor.running(PROXY));
}

#[tokio::test]
async fn test_repeated_pre_hooks_are_idempotent() {
    let h = Harness::with_lease("lease-a");
    let original = h.fingerprint().await;

    for _ in 0..3 {
        h.orchestrator.pre_renewal().await.unwrap();
    }

    assert!(!h.supervisor.running(PROXY));
    assert_eq!(h.supervisor.count("stop", PROXY), 3);
    assert_eq!(h.supervisor.count("restart", PROXY), 0);

    let record = h.orchestrator.store().load().await.unwrap();
    assert_eq!(record.state, RenewalState::ChallengeInFlight);
    assert_eq!(record.previous_fingerprint, original);
}

#[tokio::test]
async fn test_repeated_post_hooks_bind_latest_lease() {
    let h = Harness::with_lease("lease-a");

    h.orchestrator.post_renewal().await.unwrap();
    h.write_lease("lease-b");
    let report = h.orchestrator.post_renewal().await.unwrap();

    assert_eq!(report.outcome, Outcome::Reloaded);
    assert!(h.supervisor.running(PROXY));
    assert!(h.supervisor.running(STORAGE));
    assert_eq!(h.supervisor.count("restart", PROXY), 2);
    assert_eq!(h.supervisor.count("restart", STORAGE), 2);

    let record = h.orchestrator.store().load().await.unwrap();
    assert_eq!(record.state, RenewalState::Idle);
    assert_eq!(record.bound_fingerprint, h.fingerprint().await);
}

#[tokio::test]
async fn test_failed_issuance_restores_proxy_on_previous_lease() {
    let h = Harness::with_lease("lease-a");
    let previous = h.fingerprint().await;

    h.orchestrator.pre_renewal().await.unwrap();
    assert!(!h.supervisor.running(PROXY));

    // CA client fails the challenge and writes nothing
    let report = h.orchestrator.post_renewal().await.unwrap();

    assert_eq!(report.outcome, Outcome::RestoredPrevious);
    assert_eq!(report.fingerprint, previous);
    assert!(h.supervisor.running(PROXY));

    let record = h.orchestrator.store().load().await.unwrap();
    assert_eq!(record.state, RenewalState::Idle);
    assert_eq!(record.bound_fingerprint, previous);
}

#[tokio::test]
async fn test_storage_failure_still_restarts_proxy() {
    let h = Harness::with_lease("lease-a");
    h.orchestrator.pre_renewal().await.unwrap();
    h.write_lease("lease-b");
    h.supervisor.fail("restart", STORAGE);

    let err = h.orchestrator.post_renewal().await.unwrap_err();
    assert_eq!(err.exit_code(), exit_codes::RELOAD_FAILED);

    match &err {
        RotationError::ReloadFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].service, STORAGE);
            assert!(failures[0].reason.contains("injected restart failure"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert_eq!(h.supervisor.count("restart", PROXY), 1);
    assert!(h.supervisor.running(PROXY));

    let record = h.orchestrator.store().load().await.unwrap();
    assert_eq!(record.state, RenewalState::ServicesReloading);
    assert_eq!(record.last_outcome, Some(Outcome::ReloadFailed));
    assert!(record.last_error.unwrap().contains(STORAGE));

    // CA client retry after the operator fixed storage
    h.supervisor.heal();
    let report = h.orchestrator.post_renewal().await.unwrap();
    assert_eq!(report.outcome, Outcome::Reloaded);
    assert_eq!(
        h.orchestrator.store().load().await.unwrap().bound_fingerprint,
        h.fingerprint().await
    );
}

#[tokio::test]
async fn test_proxy_not_running_after_restart_is_a_failure() {
    let h = Harness::with_lease("lease-a");
    h.supervisor.fail("status", PROXY);

    let err = h.orchestrator.post_renewal().await.unwrap_err();
    match err {
        RotationError::ReloadFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].service, PROXY);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.supervisor.count("restart", STORAGE), 1);
}

#[tokio::test]
async fn test_stop_failure_aborts_cycle() {
    let h = Harness::with_lease("lease-a");
    h.supervisor.fail("stop", PROXY);

    let err = h.orchestrator.pre_renewal().await.unwrap_err();
    assert!(matches!(err, RotationError::PortUnavailable { .. }));
    assert_eq!(err.exit_code(), exit_codes::PORT_UNAVAILABLE);
    assert_eq!(h.supervisor.count("start", PROXY), 1);
    assert_eq!(h.supervisor.count("restart", STORAGE), 0);

    let record = h.orchestrator.store().load().await.unwrap();
    assert_eq!(record.state, RenewalState::Idle);
    assert_eq!(record.last_outcome, Some(Outcome::PortUnavailable));
    assert!(record.previous_fingerprint.is_none());
}

#[tokio::test]
async fn test_port_still_bound_aborts_cycle() {
    let h = Harness::with_lease("lease-a");
    h.supervisor.set_port_stuck(true);

    let err = h.orchestrator.pre_renewal().await.unwrap_err();
    match &err {
        RotationError::PortUnavailable { service, addr, reason } => {
            assert_eq!(service, PROXY);
            assert_eq!(addr, &h.supervisor.proxy_addr().to_string());
            assert!(reason.contains("still accepting connections"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // Proxy is brought back rather than left down
    assert!(h.supervisor.running(PROXY));
}

#[tokio::test]
async fn test_post_hook_without_any_lease() {
    let h = Harness::new();

    let report = h.orchestrator.post_renewal().await.unwrap();
    assert_eq!(report.outcome, Outcome::Reloaded);
    assert!(report.fingerprint.is_none());
    assert!(h.supervisor.running(PROXY));
}

#[tokio::test]
async fn test_first_issuance() {
    let h = Harness::new();
    let pre = h.orchestrator.pre_renewal().await.unwrap();
    assert!(pre.previous_fingerprint.is_none());

    h.write_lease("lease-a");
    let report = h.orchestrator.post_renewal().await.unwrap();
    assert_eq!(report.outcome, Outcome::Renewed);
}

#[tokio::test]
async fn test_recover_when_idle() {
    let h = Harness::with_lease("lease-a");
    let outcome = h.orchestrator.recover(false).await.unwrap();
    assert!(matches!(outcome, RecoveryOutcome::Healthy));
    assert!(h.supervisor.calls().is_empty());
}

#[tokio::test]
async fn test_recover_waits_for_outage_limit() {
    let h = Harness::with_lease("lease-a");
    h.orchestrator.pre_renewal().await.unwrap();

    match h.orchestrator.recover(false).await.unwrap() {
        RecoveryOutcome::Waiting { state, remaining_secs } => {
            assert_eq!(state, RenewalState::ChallengeInFlight);
            assert!(remaining_secs > 0 && remaining_secs <= 900);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!h.supervisor.running(PROXY));
}

#[tokio::test]
async fn test_watchdog_restores_stalled_cycle() {
    let h = Harness::with_max_outage(0);
    h.write_lease("lease-a");
    h.orchestrator.pre_renewal().await.unwrap();

    // CA client crashed; no post-hook
    match h.orchestrator.recover(false).await.unwrap() {
        RecoveryOutcome::Restored(report) => {
            assert_eq!(report.outcome, Outcome::RestoredPrevious);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(h.supervisor.running(PROXY));
    assert_eq!(
        h.orchestrator.store().load().await.unwrap().state,
        RenewalState::Idle
    );
}

#[tokio::test]
async fn test_forced_recovery_picks_up_new_lease() {
    let h = Harness::with_lease("lease-a");
    h.orchestrator.pre_renewal().await.unwrap();
    h.write_lease("lease-b");

    match h.orchestrator.recover(true).await.unwrap() {
        RecoveryOutcome::Restored(report) => {
            assert_eq!(report.outcome, Outcome::Renewed);
            assert_eq!(report.fingerprint, h.fingerprint().await);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_status_reports_lease_and_record() {
    let h = Harness::with_lease("lease-a");
    h.orchestrator.pre_renewal().await.unwrap();

    let status = h.orchestrator.status().await.unwrap();
    assert_eq!(status.record.state, RenewalState::ChallengeInFlight);
    let lease = status.lease.unwrap();
    assert!(lease.domains.contains(&common::DOMAIN.to_string()));
    assert_eq!(Some(lease.fingerprint), h.fingerprint().await);
    assert!(status.lease_error.is_none());
}

/// Push the record's state timestamp into the past
async fn backdate(h: &Harness, secs: i64) {
    let store = h.orchestrator.store();
    let mut record = store.load().await.unwrap();
    record.entered_at = record.entered_at - chrono::Duration::seconds(secs);
    store.save(&record).await.unwrap();
}

#[tokio::test]
async fn test_watchdog_leaves_failed_reload_alone() {
    let h = Harness::with_lease("lease-a");
    h.orchestrator.pre_renewal().await.unwrap();
    h.supervisor.fail("restart", STORAGE);
    h.orchestrator.post_renewal().await.unwrap_err();
    backdate(&h, 1000).await;

    for _ in 0..2 {
        match h.orchestrator.recover(false).await.unwrap() {
            RecoveryOutcome::ReloadPending { last_error, .. } => {
                assert!(last_error.unwrap().contains(STORAGE));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(h.supervisor.count("restart", PROXY), 1, "no restart loop on the proxy");

    h.supervisor.heal();
    match h.orchestrator.recover(true).await.unwrap() {
        RecoveryOutcome::Restored(report) => assert_eq!(report.outcome, Outcome::Reloaded),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(
        h.orchestrator.store().load().await.unwrap().state,
        RenewalState::Idle
    );
}

#[tokio::test]
async fn test_watchdog_finishes_interrupted_reload() {
    let h = Harness::with_lease("lease-a");
    let store = h.orchestrator.store();

    // Post-hook killed after entering the reload state
    let mut record = store.load().await.unwrap();
    record.state = RenewalState::ServicesReloading;
    record.entered_at = chrono::Utc::now() - chrono::Duration::seconds(1000);
    store.save(&record).await.unwrap();

    match h.orchestrator.recover(false).await.unwrap() {
        RecoveryOutcome::Restored(report) => assert_eq!(report.outcome, Outcome::Reloaded),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(h.supervisor.count("restart", PROXY), 1);
}

#[tokio::test]
async fn test_failed_reload_age_counts_from_latest_attempt() {
    let h = Harness::with_lease("lease-a");
    h.supervisor.fail("restart", STORAGE);
    h.orchestrator.post_renewal().await.unwrap_err();
    backdate(&h, 1000).await;

    h.orchestrator.post_renewal().await.unwrap_err();
    let record = h.orchestrator.store().load().await.unwrap();
    assert!(record.age_secs(chrono::Utc::now()) < 60);
}

#[tokio::test]
async fn test_hooks_wait_for_store_lock() {
    let h = Harness::with_lease("lease-a");
    let held = h.orchestrator.store().lock().await.unwrap();

    let orchestrator = h.orchestrator.clone();
    let post = tokio::spawn(async move { orchestrator.post_renewal().await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!post.is_finished());
    assert_eq!(h.supervisor.count("restart", PROXY), 0);

    drop(held);
    let report = post.await.unwrap().unwrap();
    assert_eq!(report.outcome, Outcome::Reloaded);
    assert_eq!(h.supervisor.count("restart", PROXY), 1);
}

#[tokio::test]
async fn test_hook_runs_are_persisted() {
    let h = Harness::with_lease("lease-a");
    h.orchestrator.pre_renewal().await.unwrap();
    h.write_lease("lease-b");
    h.orchestrator.post_renewal().await.unwrap();

    h.supervisor.set_port_stuck(true);
    h.orchestrator.pre_renewal().await.unwrap_err();

    let runs = h.orchestrator.store().load().await.unwrap().hook_runs;
    assert_eq!(runs["pre_hook"]["port_released"], 1);
    assert_eq!(runs["pre_hook"]["port_unavailable"], 1);
    assert_eq!(runs["post_hook"]["renewed"], 1);
}
