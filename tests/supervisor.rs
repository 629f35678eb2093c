use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use vigil_lib::metrics::{
    BatteryHealth, BatteryReading, CpuReading, LoadAverage, MemoryReading, Reading, VolumeReading,
};
use vigil_lib::{
    AlertMetric, AlertRule, Clock, Collector, CollectorError, CollectorKind, Comparison, ManualClock,
    MonitorConfig, ScriptedCollector, Supervisor, SystemClock,
};

fn cpu(usage: f64) -> Reading {
    Reading::Cpu(CpuReading {
        usage_percent: usage,
        per_core_load: vec![usage; 4],
        temperature: None,
        load_average: LoadAverage {
            one: 1.0,
            five: 1.0,
            fifteen: 1.0,
        },
        uptime_seconds: 3600,
    })
}

fn battery(percentage: f64, is_charging: bool) -> Reading {
    Reading::Battery(Some(BatteryReading {
        percentage,
        is_charging,
        time_remaining_seconds: None,
        health: BatteryHealth::Good,
        cycle_count: 42,
    }))
}

fn volume(total: u64, used: u64) -> VolumeReading {
    VolumeReading {
        name: "Macintosh HD".into(),
        mount_point: "/".into(),
        total_bytes: total,
        used_bytes: used,
        free_bytes: total - used,
    }
}

fn config_with_rules(rules: Vec<AlertRule>) -> MonitorConfig {
    MonitorConfig {
        alert_rules: rules,
        dispatch_budget_ms: 50,
        ..MonitorConfig::default()
    }
}

fn cpu_rule(cooldown_secs: u64) -> AlertRule {
    AlertRule::new("cpu_80", "CPU Alert (80%)", AlertMetric::CpuUsage, Comparison::AtLeast, 80.0)
        .with_cooldown(Duration::from_secs(cooldown_secs))
}

fn manual(config: MonitorConfig, collectors: Vec<Box<dyn Collector>>) -> (Supervisor, ManualClock) {
    let clock = ManualClock::new();
    let supervisor = Supervisor::new(config, collectors, Arc::new(clock.clone()));
    (supervisor, clock)
}

#[tokio::test]
async fn cached_value_is_reused_within_the_kind_interval() {
    let disk = ScriptedCollector::new(CollectorKind::Disk)
        .then_ok(Reading::Disk(vec![volume(100, 10)]))
        .then_ok(Reading::Disk(vec![volume(100, 20)]));
    let calls = disk.handle();
    let fast = ScriptedCollector::new(CollectorKind::Cpu).then_ok(cpu(5.0));
    let (supervisor, clock) = manual(MonitorConfig::default(), vec![Box::new(disk), Box::new(fast)]);

    supervisor.tick(clock.now()).await;
    let first = supervisor.latest().disk.clone();

    for _ in 0..9 {
        clock.advance(Duration::from_secs(1));
        let report = supervisor.tick(clock.now()).await;
        assert!(!report.dispatched.contains(&CollectorKind::Disk));
        assert_eq!(supervisor.latest().disk, first);
    }
    assert_eq!(calls.calls(), 1);

    clock.advance(Duration::from_secs(1));
    let report = supervisor.tick(clock.now()).await;
    assert!(report.dispatched.contains(&CollectorKind::Disk));
    assert_eq!(calls.calls(), 2);
    assert_eq!(
        supervisor.latest().disk.value.as_ref().map(|d| d.used_bytes),
        Some(20)
    );
}

#[tokio::test]
async fn at_most_one_refresh_in_flight_per_kind() {
    let stuck = ScriptedCollector::new(CollectorKind::Cpu).then_ok(cpu(10.0)).gated();
    let handle = stuck.handle();
    let (supervisor, clock) = manual(config_with_rules(vec![]), vec![Box::new(stuck)]);

    let first = supervisor.tick(clock.now()).await;
    assert_eq!(first.dispatched, vec![CollectorKind::Cpu]);

    for _ in 0..4 {
        clock.advance(Duration::from_secs(1));
        let report = supervisor.tick(clock.now()).await;
        assert!(report.dispatched.is_empty());
        assert_eq!(report.in_flight, vec![CollectorKind::Cpu]);
    }
    assert_eq!(handle.calls(), 1);
    assert_eq!(handle.max_active(), 1);

    handle.release(1);
    let cache = supervisor.cache();
    timeout(Duration::from_secs(2), async {
        while cache.is_in_flight(CollectorKind::Cpu) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("refresh never completed");

    handle.release(1);
    clock.advance(Duration::from_secs(1));
    let report = supervisor.tick(clock.now()).await;
    assert_eq!(report.dispatched, vec![CollectorKind::Cpu]);
    assert_eq!(handle.calls(), 2);
    assert_eq!(handle.max_active(), 1);
}

#[tokio::test]
async fn cooldown_limits_repeat_alerts() {
    let collector = ScriptedCollector::new(CollectorKind::Cpu).then_ok(cpu(90.0));
    let (supervisor, clock) = manual(config_with_rules(vec![cpu_rule(60)]), vec![Box::new(collector)]);

    let mut fired = 0;
    for _ in 0..59 {
        fired += supervisor.tick(clock.now()).await.alerts.len();
        clock.advance(Duration::from_secs(1));
    }
    assert_eq!(fired, 1);

    clock.advance(Duration::from_secs(1));
    fired += supervisor.tick(clock.now()).await.alerts.len();
    assert_eq!(fired, 2);
    assert_eq!(supervisor.recent_alerts(50).await.len(), 2);
}

#[tokio::test]
async fn recent_fire_blocks_a_new_breach() {
    let collector = ScriptedCollector::new(CollectorKind::Cpu)
        .then_ok(cpu(85.0))
        .then_ok(cpu(81.0));
    let (supervisor, clock) = manual(config_with_rules(vec![cpu_rule(60)]), vec![Box::new(collector)]);

    assert_eq!(supervisor.tick(clock.now()).await.alerts.len(), 1);
    clock.advance(Duration::from_secs(30));
    let report = supervisor.tick(clock.now()).await;
    assert_eq!(supervisor.latest().cpu.value.as_ref().map(|c| c.usage_percent), Some(81.0));
    assert!(report.alerts.is_empty());
}

#[tokio::test]
async fn battery_low_is_silent_while_charging() {
    let rule = AlertRule::new("battery_low", "Battery Low (20%)", AlertMetric::BatteryCharge, Comparison::AtMost, 20.0);
    let collector = ScriptedCollector::new(CollectorKind::Battery)
        .then_ok(battery(10.0, true))
        .then_ok(battery(10.0, true))
        .then_ok(battery(10.0, false));
    let (supervisor, clock) = manual(config_with_rules(vec![rule]), vec![Box::new(collector)]);

    for _ in 0..2 {
        assert!(supervisor.tick(clock.now()).await.alerts.is_empty());
        clock.advance(Duration::from_secs(10));
    }
    let report = supervisor.tick(clock.now()).await;
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.alerts[0].title, "Low Battery");
}

#[tokio::test]
async fn alert_history_keeps_the_newest_hundred() {
    let collector = ScriptedCollector::new(CollectorKind::Cpu).then_ok(cpu(99.0));
    let (supervisor, clock) = manual(config_with_rules(vec![cpu_rule(0)]), vec![Box::new(collector)]);
    let history = supervisor.subscribe_history();

    let mut first_id = None;
    for i in 0..101 {
        let report = supervisor.tick(clock.now()).await;
        assert_eq!(report.alerts.len(), 1);
        if i == 0 {
            first_id = Some(report.alerts[0].id.clone());
        }
        clock.advance(Duration::from_secs(1));
    }

    let events = history.borrow().clone();
    assert_eq!(events.len(), 100);
    assert!(events.iter().all(|e| Some(&e.id) != first_id.as_ref()));
    assert!(events[0].timestamp >= events[99].timestamp);
}

#[tokio::test]
async fn zero_totals_report_zero_percent() {
    let memory = ScriptedCollector::new(CollectorKind::Memory).then_ok(Reading::Memory(MemoryReading::default()));
    let disk = ScriptedCollector::new(CollectorKind::Disk).then_ok(Reading::Disk(vec![volume(0, 0)]));
    let (supervisor, clock) = manual(MonitorConfig::default(), vec![Box::new(memory), Box::new(disk)]);

    let report = supervisor.tick(clock.now()).await;
    let snapshot = supervisor.latest();
    assert_eq!(snapshot.memory.value.as_ref().map(|m| m.used_percentage), Some(0.0));
    assert_eq!(snapshot.disk.value.as_ref().map(|d| d.usage_percentage), Some(0.0));
    assert!(report.alerts.is_empty());
}

#[tokio::test]
async fn failures_then_recovery() {
    let collector = ScriptedCollector::new(CollectorKind::Cpu)
        .then_err(CollectorError::unavailable("host_processor_info failed"))
        .then_err(CollectorError::unavailable("host_processor_info failed"))
        .then_ok(cpu(42.0));
    let (supervisor, clock) = manual(MonitorConfig::default(), vec![Box::new(collector)]);

    for _ in 0..2 {
        let report = supervisor.tick(clock.now()).await;
        assert!(report.published.is_some());
        let snapshot = supervisor.latest();
        assert!(snapshot.cpu.is_absent());
        assert!(matches!(snapshot.cpu.error, Some(CollectorError::SourceUnavailable(_))));
        clock.advance(Duration::from_secs(1));
    }

    supervisor.tick(clock.now()).await;
    let snapshot = supervisor.latest();
    assert_eq!(snapshot.cpu.value.as_ref().map(|c| c.usage_percent), Some(42.0));
    assert_eq!(snapshot.cpu.error, None);
}

#[tokio::test]
async fn failure_after_success_keeps_last_known_good() {
    let collector = ScriptedCollector::new(CollectorKind::Cpu)
        .then_ok(cpu(33.0))
        .then_err(CollectorError::parse("garbled"));
    let (supervisor, clock) = manual(MonitorConfig::default(), vec![Box::new(collector)]);

    supervisor.tick(clock.now()).await;
    clock.advance(Duration::from_secs(1));
    supervisor.tick(clock.now()).await;

    let snapshot = supervisor.latest();
    assert_eq!(snapshot.cpu.value.as_ref().map(|c| c.usage_percent), Some(33.0));
    assert!(matches!(snapshot.cpu.error, Some(CollectorError::ParseFailure(_))));
    assert!(snapshot.cpu.captured_at >= snapshot.cpu.refreshed_at.unwrap());
}

#[tokio::test]
async fn disk_at_ninety_percent_triggers_low_space() {
    let collector =
        ScriptedCollector::new(CollectorKind::Disk).then_ok(Reading::Disk(vec![volume(1_000_000_000, 900_000_000)]));
    let (supervisor, clock) = manual(MonitorConfig::default(), vec![Box::new(collector)]);
    let mut events = supervisor.alert_events();

    supervisor.tick(clock.now()).await;
    assert_eq!(supervisor.latest().disk.value.as_ref().map(|d| d.usage_percentage), Some(90.0));

    let event = events.try_recv().expect("disk alert was not broadcast");
    assert_eq!(event.rule_id, "disk_low");
    assert_eq!(event.title, "Low Disk Space");
    assert!(event.play_sound);
}

#[tokio::test]
async fn apply_config_keeps_cooldown_state() {
    let collector = ScriptedCollector::new(CollectorKind::Cpu).then_ok(cpu(90.0));
    let (supervisor, clock) = manual(config_with_rules(vec![cpu_rule(60)]), vec![Box::new(collector)]);

    assert_eq!(supervisor.tick(clock.now()).await.alerts.len(), 1);

    let mut updated = config_with_rules(vec![cpu_rule(60)]);
    updated.alert_rules[0].threshold = 85.0;
    updated.update_interval_secs = 2.0;
    supervisor.apply_config(updated).await;
    assert_eq!(supervisor.config().base_interval(), Duration::from_secs(2));

    clock.advance(Duration::from_secs(10));
    assert!(supervisor.tick(clock.now()).await.alerts.is_empty());

    clock.advance(Duration::from_secs(50));
    assert_eq!(supervisor.tick(clock.now()).await.alerts.len(), 1);
}

#[tokio::test]
async fn disabled_notifications_emit_nothing() {
    let collector = ScriptedCollector::new(CollectorKind::Cpu).then_ok(cpu(99.0));
    let mut config = config_with_rules(vec![cpu_rule(60)]);
    config.notifications_enabled = false;
    let (supervisor, clock) = manual(config, vec![Box::new(collector)]);

    assert!(supervisor.tick(clock.now()).await.alerts.is_empty());
    assert!(supervisor.recent_alerts(50).await.is_empty());
}

#[tokio::test]
async fn running_supervisor_publishes_until_stopped() {
    let collector = ScriptedCollector::new(CollectorKind::Memory).then_ok(Reading::Memory(MemoryReading {
        total_bytes: 8,
        used_bytes: 2,
        ..Default::default()
    }));
    let calls = collector.handle();
    let config = MonitorConfig {
        update_interval_secs: 0.5,
        ..MonitorConfig::default()
    };
    let supervisor = Supervisor::new(config, vec![Box::new(collector)], Arc::new(SystemClock));
    let mut rx = supervisor.subscribe();
    let handle = supervisor.start();
    assert!(handle.is_running());

    timeout(Duration::from_secs(5), async {
        while rx.borrow_and_update().sequence < 2 {
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("supervisor did not publish twice");
    assert_eq!(handle.latest().memory.value.as_ref().map(|m| m.used_percentage), Some(25.0));

    handle.stop().await;
    let stopped_at = calls.calls();
    sleep(Duration::from_millis(1200)).await;
    assert_eq!(calls.calls(), stopped_at);
}

#[tokio::test]
async fn stop_discards_results_that_arrive_late() {
    let collector = ScriptedCollector::new(CollectorKind::Weather)
        .then_ok(Reading::Weather(None))
        .gated();
    let gate = collector.handle();
    let config = MonitorConfig {
        dispatch_budget_ms: 10,
        ..MonitorConfig::default()
    };
    let supervisor = Supervisor::new(config, vec![Box::new(collector)], Arc::new(SystemClock));
    let cache = supervisor.cache();
    let handle = supervisor.start();

    timeout(Duration::from_secs(2), async {
        while gate.active() == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("weather refresh never started");

    handle.stop().await;
    gate.release(1);
    timeout(Duration::from_secs(2), async {
        while cache.is_in_flight(CollectorKind::Weather) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("in-flight flag was never cleared");

    let entry = cache.get(CollectorKind::Weather);
    assert!(entry.is_absent());
    assert!(entry.error.is_none());
    assert_eq!(gate.calls(), 1);
}

#[tokio::test]
async fn interval_change_takes_effect_without_restart() {
    let collector = ScriptedCollector::new(CollectorKind::Cpu).then_ok(cpu(1.0));
    let calls = collector.handle();
    let config = MonitorConfig {
        update_interval_secs: 10.0,
        alert_rules: vec![],
        ..MonitorConfig::default()
    };
    let supervisor = Supervisor::new(config.clone(), vec![Box::new(collector)], Arc::new(SystemClock));
    let handle = supervisor.start();

    timeout(Duration::from_secs(2), async {
        while calls.calls() < 1 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first tick never ran");
    sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.calls(), 1);

    handle
        .apply_config(MonitorConfig {
            update_interval_secs: 0.5,
            ..config
        })
        .await;
    timeout(Duration::from_secs(5), async {
        while calls.calls() < 3 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("new interval was not picked up");
    handle.stop().await;
}
