//! Integration tests for pool lifecycle: configuration errors, the
//! initial fill, replacement on loss, scale-up/scale-down, and exit
//! reason classification.
//!
//! These tests drive full supervisor runs over real child processes.
//! Shutdown is always requested through the `Control` handle, never by
//! signalling the test process, so the tests can run in parallel.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use brood::{BroodError, Config, ExitReason, Pid, Signal, SpawnReason, Supervisor};

/// Test that running without a command or closure raises the
/// configuration error.
#[test]
fn run_without_worker_definition_fails() {
    let mut sup = Supervisor::new(Config::new());
    let result = sup.run();
    assert!(matches!(result, Err(BroodError::NotConfigured)));
}

/// Test that an inverted envelope is rejected up front.
#[test]
fn run_with_inverted_limits_fails() {
    let mut sup = Supervisor::new(Config::new().command("true").pool(3, 1));
    let result = sup.run();
    assert!(matches!(
        result,
        Err(BroodError::InvalidLimits { min: 3, max: 1 })
    ));
}

/// Test the command lifecycle: a worker terminated from outside is
/// reported with reason `Signal` and replaced, and the replacement's
/// spawn reason is `Replacement`.
#[test]
fn terminated_worker_is_replaced() {
    let spawns = Rc::new(RefCell::new(Vec::new()));
    let exits = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .command("sleep 10")
        .pool(1, 1)
        .on_spawn({
            let spawns = spawns.clone();
            move |ctl, worker| {
                assert!(worker.is_running());
                assert_eq!(worker.exit_reason(), ExitReason::Unknown);
                spawns.borrow_mut().push(worker.spawn_reason());
                match worker.spawn_reason() {
                    SpawnReason::Initial => ctl.signal(worker.pid(), Signal::SIGTERM),
                    _ => ctl.shutdown(),
                }
            }
        })
        .on_exit({
            let exits = exits.clone();
            move |_ctl, worker, reason| {
                assert!(!worker.is_running());
                assert_eq!(worker.exit_reason(), reason);
                exits.borrow_mut().push(reason);
            }
        });

    let mut sup = Supervisor::new(cfg);
    sup.run().unwrap();

    assert_eq!(
        *spawns.borrow(),
        vec![SpawnReason::Initial, SpawnReason::Replacement]
    );
    assert_eq!(*exits.borrow(), vec![ExitReason::Signal]);
    assert_eq!(sup.worker_count(), 0, "registry must drain on shutdown");
}

/// Test that workers exiting on their own are replaced until shutdown
/// is requested, and that normal exits carry reason `Normal`.
#[test]
fn natural_exits_replenish_to_min() {
    let spawns = Rc::new(RefCell::new(Vec::new()));
    let exits = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .command("sleep 0.2")
        .pool(1, 1)
        .on_spawn({
            let spawns = spawns.clone();
            move |_ctl, worker| spawns.borrow_mut().push(worker.spawn_reason())
        })
        .on_exit({
            let exits = exits.clone();
            move |ctl, _worker, reason| {
                exits.borrow_mut().push(reason);
                if exits.borrow().len() == 3 {
                    ctl.shutdown();
                }
            }
        });

    Supervisor::new(cfg).run().unwrap();

    assert_eq!(
        *spawns.borrow(),
        vec![
            SpawnReason::Initial,
            SpawnReason::Replacement,
            SpawnReason::Replacement,
        ]
    );
    assert_eq!(*exits.borrow(), vec![ExitReason::Normal; 3]);
}

/// Test that a non-zero exit status still classifies as `Normal` and
/// preserves the code.
#[test]
fn nonzero_exit_stays_normal() {
    let seen = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .command("exit 7")
        .pool(1, 1)
        .on_exit({
            let seen = seen.clone();
            move |ctl, worker, reason| {
                seen.borrow_mut().push((worker.exit_code(), reason));
                ctl.shutdown();
            }
        });

    Supervisor::new(cfg).run().unwrap();
    assert_eq!(*seen.borrow(), vec![(7, ExitReason::Normal)]);
}

/// Test that SIGKILL is reported as `Killed` and other signals as
/// `Signal`, with exit code zero in both cases.
#[test]
fn signal_exits_classify_by_signal() {
    for (sig, expected) in [
        (Signal::SIGKILL, ExitReason::Killed),
        (Signal::SIGTERM, ExitReason::Signal),
    ] {
        let seen = Rc::new(RefCell::new(Vec::new()));

        let cfg = Config::new()
            .command("sleep 10")
            .pool(1, 1)
            .on_spawn(move |ctl, worker| {
                if worker.spawn_reason() == SpawnReason::Initial {
                    ctl.signal(worker.pid(), sig);
                }
            })
            .on_exit({
                let seen = seen.clone();
                move |ctl, worker, reason| {
                    seen.borrow_mut().push((worker.exit_code(), reason));
                    ctl.shutdown();
                }
            });

        Supervisor::new(cfg).run().unwrap();
        assert_eq!(*seen.borrow(), vec![(0, expected)], "signal {sig}");
    }
}

/// Test that `scale_up` grows the pool within `max` and tags the new
/// worker with reason `ScaleUp`.
#[test]
fn scale_up_spawns_within_envelope() {
    let spawns = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .closure(|_socket| thread::sleep(Duration::from_secs(30)))
        .pool(1, 2)
        .on_spawn({
            let spawns = spawns.clone();
            move |ctl, worker| {
                spawns.borrow_mut().push(worker.spawn_reason());
                if worker.spawn_reason() == SpawnReason::Initial {
                    // One honored, one discarded at max.
                    ctl.scale_up();
                    ctl.scale_up();
                }
                if ctl.worker_count() == 2 {
                    ctl.shutdown();
                }
            }
        });

    let mut sup = Supervisor::new(cfg);
    sup.run().unwrap();

    assert_eq!(
        *spawns.borrow(),
        vec![SpawnReason::Initial, SpawnReason::ScaleUp]
    );
    assert_eq!(sup.worker_count(), 0);
}

/// Test that consecutive `scale_down` calls terminate two distinct
/// workers and that their exits do not trigger replacements.
#[test]
fn scale_down_terminates_distinct_workers() {
    let spawns = Rc::new(RefCell::new(Vec::new()));
    let exited: Rc<RefCell<Vec<(Pid, ExitReason)>>> = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .closure(|_socket| thread::sleep(Duration::from_secs(30)))
        .pool(1, 3)
        .on_spawn({
            let spawns = spawns.clone();
            move |ctl, worker| {
                spawns.borrow_mut().push(worker.spawn_reason());
                if worker.spawn_reason() == SpawnReason::Initial {
                    ctl.scale_up();
                    ctl.scale_up();
                }
                if ctl.worker_count() == 3 {
                    ctl.scale_down();
                    ctl.scale_down();
                }
            }
        })
        .on_exit({
            let exited = exited.clone();
            move |ctl, worker, reason| {
                exited.borrow_mut().push((worker.pid(), reason));
                if exited.borrow().len() == 2 {
                    ctl.shutdown();
                }
            }
        });

    let mut sup = Supervisor::new(cfg);
    sup.run().unwrap();

    let spawns = spawns.borrow();
    assert_eq!(
        *spawns,
        vec![
            SpawnReason::Initial,
            SpawnReason::ScaleUp,
            SpawnReason::ScaleUp,
        ],
        "scale-down exits must not be replaced"
    );

    let exited = exited.borrow();
    assert_eq!(exited.len(), 2);
    assert_ne!(exited[0].0, exited[1].0, "two distinct workers must stop");
    assert!(exited.iter().all(|(_, r)| *r == ExitReason::Signal));
    assert_eq!(sup.worker_count(), 0);
}
