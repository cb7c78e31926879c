//! Integration tests for waveplus-core
//!
//! These drive the acquisition loop end to end against [`MockRadio`], with
//! tokio's clock paused so read intervals, cooldowns and the watchdog elapse
//! instantly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use waveplus_core::acquisition::{AcquisitionConfig, AcquisitionLoop, Exit, State};
use waveplus_core::mock::MockRadio;
use waveplus_core::sink::{CycleReport, Sink};
use waveplus_core::watchdog::{self, Expiry, WatchdogConfig, WatchdogHandle};
use waveplus_core::{DeviceIdentity, SensorValues};

/// The reference frame: humidity 50, radon 100/200, 36.25 °C, 700.96 hPa,
/// CO₂ 89, VOC 100.
fn reference_frame() -> Vec<u8> {
    vec![
        0, 100, 0, 0, 0x64, 0x00, 0xC8, 0x00, 0x29, 0x0E, 0xE8, 0x88, 0x59, 0x00, 0x64, 0x00, 0,
        0, 0, 0,
    ]
}

#[derive(Default)]
struct RecordingSink {
    published: Mutex<Vec<(DeviceIdentity, SensorValues)>>,
    reports: Mutex<Vec<CycleReport>>,
    recoveries: Mutex<Vec<String>>,
    scans: Mutex<Vec<bool>>,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn publish(&self, identity: &DeviceIdentity, values: SensorValues) {
        self.published.lock().await.push((*identity, values));
    }

    async fn cycle_completed(&self, report: &CycleReport) {
        self.reports.lock().await.push(*report);
    }

    async fn recovered(&self, action: &str) {
        self.recoveries.lock().await.push(action.to_string());
    }

    async fn scanned(&self, ok: bool) {
        self.scans.lock().await.push(ok);
    }
}

fn config() -> AcquisitionConfig {
    AcquisitionConfig {
        scan_duration: Duration::from_secs(1),
        read_interval: Duration::from_secs(10),
        retries: 3,
        pulse_interval: Duration::from_secs(1),
        watchdog_min: Duration::from_secs(60),
        watchdog_multiplier: 3,
        cooldown: Duration::from_secs(2),
    }
}

struct Harness {
    radio: MockRadio,
    sink: Arc<RecordingSink>,
    acquisition: AcquisitionLoop,
    cancel: CancellationToken,
    watchdog: WatchdogHandle,
    _expiry: Expiry,
}

async fn harness(radio: MockRadio) -> Harness {
    use waveplus_core::Radio;

    radio.open().await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let acquisition = AcquisitionLoop::new(Arc::new(radio.clone()), sink.clone(), config());
    let cancel = CancellationToken::new();
    // Generous threshold; step-level tests never wait on expiry
    let (watchdog, expiry) = watchdog::spawn(
        WatchdogConfig::new(Duration::from_secs(3600), Duration::from_secs(86_400)),
        cancel.child_token(),
    );
    Harness {
        radio,
        sink,
        acquisition,
        cancel,
        watchdog,
        _expiry: expiry,
    }
}

impl Harness {
    async fn step(&self, state: State) -> State {
        self.acquisition
            .step(state, &self.cancel, &self.watchdog)
            .await
            .unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_reference_device() {
    let radio = MockRadio::new();
    radio.advertise(waveplus_core::Advertisement::new(
        "AA:BB:CC:DD:EE:01",
        vec![0x34, 0x03, 0x01, 0x00, 0x00, 0x00],
    ));
    radio.set_frame("AA:BB:CC:DD:EE:01", reference_frame());
    let h = harness(radio).await;

    let state = h.step(State::Scanning).await;
    let State::Reading(sessions) = &state else {
        panic!("expected reading, got {}", state.name());
    };
    assert_eq!(sessions.len(), 1);

    let state = h.step(state).await;
    assert!(matches!(state, State::Scanning));

    let published = h.sink.published.lock().await;
    assert_eq!(published.len(), 1);
    let (identity, values) = published[0];
    assert_eq!(identity.to_string(), "1");
    assert_eq!(values.humidity, 50.0);
    assert_eq!(values.radon_short, 100);
    assert_eq!(values.radon_long, 200);
    assert!((values.temperature - 36.25).abs() < 1e-4);
    assert!((values.pressure - 700.96).abs() < 1e-3);
    assert_eq!(values.co2, 89.0);
    assert_eq!(values.voc, 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_failing_device_does_not_block_others() {
    let radio = MockRadio::new()
        .with_device("AA:01", 1, reference_frame())
        .with_device("AA:02", 2, reference_frame())
        .with_device("AA:03", 3, reference_frame());
    radio.fail_reads("AA:02", u32::MAX);
    let h = harness(radio).await;

    let state = h.step(State::Scanning).await;
    let state = h.step(state).await;
    assert!(matches!(state, State::Scanning));

    let identities: Vec<String> = h
        .sink
        .published
        .lock()
        .await
        .iter()
        .map(|(id, _)| id.to_string())
        .collect();
    assert_eq!(identities, vec!["1", "3"]);

    assert_eq!(
        h.sink.reports.lock().await.as_slice(),
        &[CycleReport {
            discovered: 3,
            read: 2,
            failed: 1
        }]
    );

    let stats = h.radio.stats();
    assert_eq!(stats.max_active, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.leaked, 0);
    // 1 + 3 + 1 connects, each torn down
    assert_eq!(stats.connects, 5);
    assert_eq!(stats.disconnects, 5);
    assert_eq!(stats.waits, 5);
}

#[tokio::test(start_paused = true)]
async fn test_all_devices_failing_enters_cooldown() {
    let radio = MockRadio::new()
        .with_device("AA:01", 1, reference_frame())
        .with_device("AA:02", 2, vec![0u8; 4]);
    radio.fail_reads("AA:01", u32::MAX);
    let h = harness(radio).await;

    let state = h.step(State::Scanning).await;
    let state = h.step(state).await;
    assert!(matches!(state, State::Cooldown));
    assert!(h.sink.published.lock().await.is_empty());

    let state = h.step(state).await;
    assert!(matches!(state, State::Scanning));

    let stats = h.radio.stats();
    assert_eq!(stats.closes, 1);
    assert_eq!(stats.opens, 2);
    assert!(h.radio.is_open());
    assert_eq!(h.sink.recoveries.lock().await.as_slice(), &["reopen radio"]);
}

#[tokio::test(start_paused = true)]
async fn test_no_devices_enters_cooldown() {
    let h = harness(MockRadio::new()).await;

    let state = h.step(State::Scanning).await;
    assert!(matches!(&state, State::Reading(s) if s.is_empty()));

    let state = h.step(state).await;
    assert!(matches!(state, State::Cooldown));
    assert_eq!(
        h.sink.reports.lock().await.as_slice(),
        &[CycleReport::default()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_scan_exhaustion_enters_cooldown() {
    let radio = MockRadio::new().with_device("AA:01", 1, reference_frame());
    radio.fail_scans(3);
    let h = harness(radio).await;

    let state = h.step(State::Scanning).await;
    assert!(matches!(state, State::Cooldown));
    assert_eq!(h.radio.stats().scans, 3);
    assert_eq!(h.sink.scans.lock().await.as_slice(), &[false]);
}

#[tokio::test(start_paused = true)]
async fn test_read_retry_budget() {
    let radio = MockRadio::new().with_device("AA:01", 1, reference_frame());
    radio.fail_reads("AA:01", 2);
    let h = harness(radio).await;

    let state = h.step(State::Scanning).await;
    let state = h.step(state).await;
    assert!(matches!(state, State::Scanning));
    assert_eq!(h.sink.published.lock().await.len(), 1);
    assert_eq!(h.radio.stats().connects, 3);
}

#[tokio::test(start_paused = true)]
async fn test_step_cancelled_during_read_interval() {
    let radio = MockRadio::new().with_device("AA:01", 1, reference_frame());
    let h = harness(radio).await;

    let state = h.step(State::Scanning).await;

    let cancel = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });

    let result = h.acquisition.step(state, &h.cancel, &h.watchdog).await;
    assert!(matches!(result, Err(waveplus_core::Error::Cancelled)));
    assert_eq!(h.sink.published.lock().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_exits_on_watchdog_when_nothing_is_readable() {
    let radio = MockRadio::new();
    let sink = Arc::new(RecordingSink::default());
    let acquisition = AcquisitionLoop::new(Arc::new(radio.clone()), sink.clone(), config());

    let started = tokio::time::Instant::now();
    let exit = acquisition.run(&CancellationToken::new()).await.unwrap();

    let Exit::WatchdogExpired { silent_for } = exit else {
        panic!("expected watchdog expiry, got {:?}", exit);
    };
    assert!(silent_for > Duration::from_secs(60));
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(!sink.recoveries.lock().await.is_empty());
    assert!(!radio.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_expiry_tears_down_stalled_read() {
    let radio = MockRadio::new().with_device("AA:01", 1, reference_frame());
    radio.delay_reads("AA:01", Duration::from_secs(3600));
    let sink = Arc::new(RecordingSink::default());
    let config = AcquisitionConfig {
        retries: 1,
        ..config()
    };
    let acquisition = AcquisitionLoop::new(Arc::new(radio.clone()), sink.clone(), config);

    let exit = acquisition.run(&CancellationToken::new()).await.unwrap();

    assert!(matches!(exit, Exit::WatchdogExpired { .. }));
    let stats = radio.stats();
    assert_eq!(stats.connects, 1);
    assert_eq!(stats.disconnects, stats.connects);
    assert_eq!(stats.waits, stats.connects);
    assert_eq!(stats.leaked, 0);
    assert_eq!(stats.active, 0);
    assert!(sink.published.lock().await.is_empty());
    assert!(!radio.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_run_keeps_going_while_reads_succeed() {
    let radio = MockRadio::new().with_device("AA:01", 1, reference_frame());
    let sink = Arc::new(RecordingSink::default());
    let acquisition = AcquisitionLoop::new(Arc::new(radio.clone()), sink.clone(), config());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(600)).await;
        trigger.cancel();
    });

    let exit = acquisition.run(&cancel).await.unwrap();

    assert_eq!(exit, Exit::Shutdown);
    // One read per ~11s cycle over 600s
    assert!(sink.published.lock().await.len() > 10);
    assert!(sink.recoveries.lock().await.is_empty());
    assert!(!radio.is_open());
    assert_eq!(radio.stats().leaked, 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_recovers_when_device_returns() {
    let radio = MockRadio::new();
    let sink = Arc::new(RecordingSink::default());
    let acquisition = AcquisitionLoop::new(Arc::new(radio.clone()), sink.clone(), config());
    let cancel = CancellationToken::new();

    let late = radio.clone();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let _ = late.with_device("AA:01", 1, reference_frame());
        tokio::time::sleep(Duration::from_secs(120)).await;
        trigger.cancel();
    });

    let exit = acquisition.run(&cancel).await.unwrap();

    assert_eq!(exit, Exit::Shutdown);
    assert!(!sink.recoveries.lock().await.is_empty());
    assert!(!sink.published.lock().await.is_empty());
}

#[tokio::test]
async fn test_run_rejects_invalid_config() {
    let acquisition = AcquisitionLoop::new(
        Arc::new(MockRadio::new()),
        Arc::new(RecordingSink::default()),
        AcquisitionConfig {
            retries: 0,
            ..config()
        },
    );

    let result = acquisition.run(&CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(waveplus_core::Error::InvalidConfig(_))
    ));
}
