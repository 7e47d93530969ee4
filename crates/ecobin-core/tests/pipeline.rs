use chrono::{NaiveDate, NaiveDateTime};
use ecobin_core::config::default_roster;
use ecobin_core::simulation::Clock;
use ecobin_core::{
    BinIdentity, ConnectionState, LoopSettings, LoopbackLink, PublisherConfig, Reading,
    RelayStatus, SimulationLoop, SqliteStore, Status, TelemetryPublisher, TelemetryStore,
    classify,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn publisher_config() -> PublisherConfig {
    PublisherConfig {
        retry_delay: Duration::from_millis(5),
        ..PublisherConfig::default()
    }
}

fn stepping_clock() -> Clock {
    let tick = AtomicI64::new(0);
    Box::new(move || {
        let n = tick.fetch_add(1, Ordering::SeqCst);
        let base: NaiveDateTime = NaiveDate::from_ymd_opt(2024, 5, 20)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        base + chrono::Duration::seconds(5 * n)
    })
}

fn memory_store() -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.ensure_schema().unwrap();
    store
}

fn assert_invariants(reading: &Reading) {
    assert!((0.0..=100.0).contains(&reading.fill_level));
    assert!((15.0..=40.0).contains(&reading.temperature));
    assert!((20.0..=80.0).contains(&reading.humidity));
    assert_eq!(
        reading.relay_status == RelayStatus::On,
        reading.fill_level > 90.0
    );
    assert_eq!(reading.status, classify(reading));
}

#[tokio::test]
async fn test_three_bins_ten_ticks_end_to_end() {
    let (link, controller) = LoopbackLink::connected();
    let publisher = TelemetryPublisher::connect(link, publisher_config())
        .await
        .unwrap();
    let store = memory_store();

    let mut sim = SimulationLoop::new(
        default_roster(),
        LoopSettings {
            interval: Duration::from_millis(1),
            max_ticks: Some(10),
            seed: Some(2024),
        },
        publisher,
        store.clone(),
    )
    .with_clock(stepping_clock());

    let stats = sim.run(CancellationToken::new()).await;

    assert_eq!(stats.ticks, 10);
    assert_eq!(stats.readings, 30);
    assert_eq!(stats.published, 30);
    assert_eq!(store.count().unwrap(), 30);
    assert_eq!(controller.message_count(), 30);

    let stored = store.latest(30).unwrap();
    stored.iter().for_each(assert_invariants);

    for message in controller.messages() {
        let reading: Reading = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(message.topic, format!("smart_city/waste/{}", reading.bin_id));
        assert_invariants(&reading);
    }
}

#[tokio::test]
async fn test_per_bin_readings_stay_in_tick_order() {
    let publisher = TelemetryPublisher::offline(publisher_config());
    let store = memory_store();
    let mut sim = SimulationLoop::new(
        default_roster(),
        LoopSettings {
            seed: Some(77),
            ..LoopSettings::default()
        },
        publisher,
        store.clone(),
    )
    .with_clock(stepping_clock());

    for _ in 0..6 {
        sim.tick().await;
    }

    let latest = store.latest(18).unwrap();
    for bin in default_roster() {
        let series: Vec<&Reading> = latest.iter().filter(|r| r.bin_id == bin.bin_id).collect();
        assert_eq!(series.len(), 6);
        assert!(series.windows(2).all(|w| w[0].timestamp > w[1].timestamp));
        // Newest first, and fill only accumulates
        assert!(series.windows(2).all(|w| w[0].fill_level >= w[1].fill_level));
    }
}

#[tokio::test]
async fn test_latest_five_of_seven_for_one_bin() {
    let publisher = TelemetryPublisher::offline(publisher_config());
    let store = memory_store();
    let mut sim = SimulationLoop::new(
        vec![BinIdentity::new("EBIN009", "Harbour")],
        LoopSettings {
            seed: Some(4),
            ..LoopSettings::default()
        },
        publisher,
        store.clone(),
    )
    .with_clock(stepping_clock());

    let mut produced = Vec::new();
    for _ in 0..7 {
        produced.extend(sim.tick().await.readings);
    }

    let latest = store.latest(5).unwrap();
    let expected: Vec<Reading> = produced.into_iter().rev().take(5).collect();
    assert_eq!(latest, expected);
}

#[tokio::test]
async fn test_publishing_resumes_after_transport_drop() {
    let (link, controller) = LoopbackLink::connected();
    let publisher = TelemetryPublisher::connect(link, publisher_config())
        .await
        .unwrap();
    let store = memory_store();
    let mut sim = SimulationLoop::new(
        default_roster(),
        LoopSettings {
            seed: Some(10),
            ..LoopSettings::default()
        },
        publisher,
        store.clone(),
    )
    .with_clock(stepping_clock());

    let first = sim.tick().await;
    assert_eq!(first.published, 3);

    controller.drop_connection("broker restarted");
    assert!(
        sim.publisher()
            .wait_for_state(ConnectionState::Connecting, Duration::from_secs(1))
            .await
    );
    let during = sim.tick().await;
    assert_eq!(during.published, 0);
    assert_eq!(during.publish_dropped, 3);

    controller.connect();
    assert!(
        sim.publisher()
            .wait_for_state(ConnectionState::Connected, Duration::from_secs(1))
            .await
    );
    let after = sim.tick().await;
    assert_eq!(after.published, 3);

    // Every tick reached storage, including the one published while down
    assert_eq!(store.count().unwrap(), 9);
    assert_eq!(controller.message_count(), 6);
    let stats = sim.stats();
    assert_eq!(stats.publish_dropped, 3);
    assert_eq!(stats.stored, 9);
}

#[tokio::test]
async fn test_schema_setup_is_repeatable_across_runs() {
    let store = memory_store();
    let publisher = TelemetryPublisher::offline(publisher_config());
    let mut sim = SimulationLoop::new(
        default_roster(),
        LoopSettings {
            seed: Some(1),
            ..LoopSettings::default()
        },
        publisher,
        store.clone(),
    );
    sim.tick().await;

    store.ensure_schema().unwrap();
    assert_eq!(store.count().unwrap(), 3);
    assert!(
        store
            .latest(3)
            .unwrap()
            .iter()
            .all(|r| r.status != Status::HighTemperature || r.temperature > 35.0)
    );
}
