use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lifecycle::{
    LifecycleEnvironment, LifecycleError, ShutdownCoordinator, ShutdownNotifier, ShutdownOutcome,
    Startable, Stoppable,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type EventLog = Arc<Mutex<Vec<String>>>;

fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Managed resource that records every hook call into a shared log, optionally
/// failing its start or stop.
struct Recorder {
    name: &'static str,
    log: EventLog,
    fail_start: bool,
    fail_stop: bool,
}

impl Recorder {
    fn new(name: &'static str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: log.clone(),
            fail_start: false,
            fail_stop: false,
        })
    }

    fn failing_start(name: &'static str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: log.clone(),
            fail_start: true,
            fail_stop: false,
        })
    }

    fn failing_stop(name: &'static str, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            name,
            log: log.clone(),
            fail_start: false,
            fail_stop: true,
        })
    }
}

#[async_trait]
impl Startable for Recorder {
    async fn start(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("start:{}", self.name));
        if self.fail_start {
            anyhow::bail!("{} refused to start", self.name);
        }
        Ok(())
    }
}

#[async_trait]
impl Stoppable for Recorder {
    async fn stop(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push(format!("stop:{}", self.name));
        if self.fail_stop {
            anyhow::bail!("{} refused to stop", self.name);
        }
        Ok(())
    }
}

/// Shutdown observer that records when it was told, like the health manager
/// flipping its published state to DOWN.
struct MarkDown {
    log: EventLog,
    fail: bool,
}

#[async_trait]
impl ShutdownNotifier for MarkDown {
    async fn notify_shutdown_started(&self) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("health:down".to_string());
        if self.fail {
            anyhow::bail!("notifier exploded");
        }
        Ok(())
    }
}

fn test_coordinator(env: Arc<LifecycleEnvironment>, grace: Duration) -> Arc<ShutdownCoordinator> {
    ShutdownCoordinator::builder("test", env)
        .with_trap_signals(false)
        .with_grace_period(grace)
        .build()
}

// ---------------------------------------------------------------------------
// Section 1: Ordered start and stop
// ---------------------------------------------------------------------------

/// stop_all() walks the ledger back to front and keeps going past failures.
#[tokio::test]
async fn stop_all_reverses_registration_order_even_when_stops_fail() {
    let log = event_log();
    let env = LifecycleEnvironment::new("test");
    env.manage("r1", Recorder::new("r1", &log));
    env.manage("r2", Recorder::failing_stop("r2", &log));
    env.manage("r3", Recorder::new("r3", &log));
    env.manage("r4", Recorder::failing_stop("r4", &log));

    env.start_all().await.expect("start failed");
    log.lock().unwrap().clear();

    let report = env.stop_all().await;

    assert_eq!(events(&log), vec!["stop:r4", "stop:r3", "stop:r2", "stop:r1"]);
    assert_eq!(report.stopped, vec!["r4", "r3", "r2", "r1"]);
    assert!(!report.is_clean());
    let failed: Vec<&str> = report.failed.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(failed, vec!["r4", "r2"]);
    assert!(report.failed[0].1.contains("r4 refused to stop"));
}

/// The first start failure aborts startup: nothing after it is started and the
/// error names the failing resource.
#[tokio::test]
async fn start_failure_aborts_remaining_starts() {
    let log = event_log();
    let env = LifecycleEnvironment::new("test");
    env.manage("r1", Recorder::new("r1", &log));
    env.manage("r2", Recorder::failing_start("r2", &log));
    env.manage("r3", Recorder::new("r3", &log));

    let result = env.start_all().await;

    assert!(matches!(
        result,
        Err(LifecycleError::StartFailed { ref name, ref reason })
            if name == "r2" && reason.contains("r2 refused to start")
    ));
    assert_eq!(events(&log), vec!["start:r1", "start:r2"]);

    // Only the resource that actually started gets a stop call.
    log.lock().unwrap().clear();
    let report = env.stop_all().await;
    assert_eq!(events(&log), vec!["stop:r1"]);
    assert_eq!(report.stopped, vec!["r1"]);
}

/// A started resource is stopped exactly once, however often stop_all() runs.
#[tokio::test]
async fn second_stop_all_stops_nothing() {
    let log = event_log();
    let env = LifecycleEnvironment::new("test");
    env.manage("r1", Recorder::new("r1", &log));
    env.start_all().await.unwrap();

    env.stop_all().await;
    let second = env.stop_all().await;

    assert!(second.stopped.is_empty());
    assert_eq!(events(&log), vec!["start:r1", "stop:r1"]);
}

// ---------------------------------------------------------------------------
// Section 2: Shutdown coordination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn trigger_before_register_is_an_error() {
    let env = Arc::new(LifecycleEnvironment::new("test"));
    let coordinator = test_coordinator(env, Duration::ZERO);

    let result = coordinator.trigger_shutdown("test").await;

    assert!(matches!(result, Err(LifecycleError::ShutdownNotRegistered)));
    assert!(!coordinator.is_shutting_down());
}

#[tokio::test]
async fn register_twice_is_a_noop() {
    let env = Arc::new(LifecycleEnvironment::new("test"));
    let coordinator = test_coordinator(env, Duration::ZERO);

    assert!(coordinator.register());
    assert!(!coordinator.register());
}

/// Observers are told first, the grace period runs with the process still up,
/// and only then are resources stopped.
#[tokio::test(start_paused = true)]
async fn observers_are_notified_before_grace_period_and_stop() {
    let log = event_log();
    let env = Arc::new(LifecycleEnvironment::new("test"));
    env.manage("server", Recorder::new("server", &log));
    env.start_all().await.unwrap();

    let coordinator = test_coordinator(env, Duration::from_secs(10));
    coordinator.add_notifier(Arc::new(MarkDown {
        log: log.clone(),
        fail: false,
    }));
    coordinator.register();

    let trigger = coordinator.clone();
    let task = tokio::spawn(async move { trigger.trigger_shutdown("test").await });

    // Part way through the grace period: DOWN is published, nothing is stopped.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(coordinator.is_shutting_down());
    assert_eq!(events(&log), vec!["start:server", "health:down"]);

    let outcome = task.await.unwrap().unwrap();
    assert!(matches!(outcome, ShutdownOutcome::Completed(ref report) if report.is_clean()));
    assert_eq!(
        events(&log),
        vec!["start:server", "health:down", "stop:server"]
    );
}

/// Two triggers (e.g. SIGTERM delivered twice) run the stop sequence once.
#[tokio::test(start_paused = true)]
async fn double_trigger_runs_stop_sequence_once() {
    let stops = Arc::new(AtomicUsize::new(0));

    struct CountingStop(Arc<AtomicUsize>);

    #[async_trait]
    impl Stoppable for CountingStop {
        async fn stop(&self) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let env = Arc::new(LifecycleEnvironment::new("test"));
    env.manage_stoppable("counter", Arc::new(CountingStop(stops.clone())));
    env.start_all().await.unwrap();

    let coordinator = test_coordinator(env, Duration::from_secs(5));
    coordinator.register();

    let (first, second) = tokio::join!(
        coordinator.trigger_shutdown("sigterm"),
        coordinator.trigger_shutdown("sigterm"),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, ShutdownOutcome::AlreadyInProgress))
            .count(),
        1
    );
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    let third = coordinator.trigger_shutdown("sigint").await.unwrap();
    assert_eq!(third, ShutdownOutcome::AlreadyInProgress);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

/// A failing observer is logged and the shutdown carries on.
#[tokio::test(start_paused = true)]
async fn failing_notifier_does_not_block_shutdown() {
    let log = event_log();
    let env = Arc::new(LifecycleEnvironment::new("test"));
    env.manage("server", Recorder::new("server", &log));
    env.start_all().await.unwrap();

    let coordinator = ShutdownCoordinator::builder("test", env)
        .with_trap_signals(false)
        .with_grace_period(Duration::from_secs(1))
        .with_notifier(Arc::new(MarkDown {
            log: log.clone(),
            fail: true,
        }))
        .build();
    coordinator.register();

    let outcome = coordinator.trigger_shutdown("test").await.unwrap();

    assert!(matches!(outcome, ShutdownOutcome::Completed(_)));
    assert_eq!(
        events(&log),
        vec!["start:server", "health:down", "stop:server"]
    );
}

/// expedite() cuts the grace period short; wait() resolves once stopping is done.
#[tokio::test]
async fn expedite_skips_the_rest_of_the_grace_period() {
    let log = event_log();
    let env = Arc::new(LifecycleEnvironment::new("test"));
    env.manage("server", Recorder::new("server", &log));
    env.start_all().await.unwrap();

    let coordinator = test_coordinator(env, Duration::from_secs(3600));
    coordinator.register();

    let trigger = coordinator.clone();
    tokio::spawn(async move { trigger.trigger_shutdown("test").await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.expedite();

    tokio::time::timeout(Duration::from_secs(5), coordinator.wait())
        .await
        .expect("timed out");
    assert_eq!(events(&log), vec!["start:server", "stop:server"]);
}

/// Dropping the triggering future mid-grace-period does not abandon shutdown:
/// resources are still stopped once and wait() resolves.
#[tokio::test(start_paused = true)]
async fn dropped_trigger_still_stops_resources() {
    let log = event_log();
    let env = Arc::new(LifecycleEnvironment::new("test"));
    env.manage("server", Recorder::new("server", &log));
    env.start_all().await.unwrap();

    let coordinator = test_coordinator(env, Duration::from_secs(10));
    coordinator.register();

    let first = tokio::time::timeout(
        Duration::from_secs(1),
        coordinator.trigger_shutdown("sigterm"),
    )
    .await;
    assert!(first.is_err());
    assert!(coordinator.is_shutting_down());
    assert_eq!(events(&log), vec!["start:server"]);

    let second = coordinator.trigger_shutdown("sigterm").await.unwrap();
    assert_eq!(second, ShutdownOutcome::AlreadyInProgress);

    tokio::time::timeout(Duration::from_secs(60), coordinator.wait())
        .await
        .expect("shutdown never completed");
    assert_eq!(events(&log), vec!["start:server", "stop:server"]);
}

/// An observer that never returns is given up on and resources are still stopped.
#[tokio::test(start_paused = true)]
async fn stuck_notifier_does_not_block_stop() {
    struct Stuck;

    #[async_trait]
    impl ShutdownNotifier for Stuck {
        async fn notify_shutdown_started(&self) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    let log = event_log();
    let env = Arc::new(LifecycleEnvironment::new("test"));
    env.manage("server", Recorder::new("server", &log));
    env.start_all().await.unwrap();

    let coordinator = ShutdownCoordinator::builder("test", env)
        .with_trap_signals(false)
        .with_grace_period(Duration::from_secs(1))
        .with_notifier_timeout(Duration::from_secs(2))
        .with_notifier(Arc::new(Stuck))
        .with_notifier(Arc::new(MarkDown {
            log: log.clone(),
            fail: false,
        }))
        .build();
    coordinator.register();

    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        coordinator.trigger_shutdown("test"),
    )
    .await
    .expect("stuck notifier blocked shutdown")
    .unwrap();

    assert!(matches!(outcome, ShutdownOutcome::Completed(_)));
    assert_eq!(
        events(&log),
        vec!["start:server", "health:down", "stop:server"]
    );
}
