use std::sync::Arc;

use pos_scale::device::{DeviceError, ScaleRegistry};
use pos_scale::serial::mock::{MockBehavior, MockConnector};
use pos_scale::serial::{PortConnector, ScaleSession, SerialError, Weight};
use pos_scale::ScaleConfig;

#[tokio::test(start_paused = true)]
async fn no_configured_port_means_no_session() {
    let mock = MockConnector::new().with_port("COM1", MockBehavior::Silent);
    let registry = ScaleRegistry::new(Arc::new(ScaleConfig::default()), Arc::new(mock.clone()));

    assert!(registry.current().await.expect("current").is_none());
    assert_eq!(mock.open_count("COM1"), 0);
}

#[tokio::test(start_paused = true)]
async fn creates_session_from_config_once() {
    let mock = MockConnector::new().with_port("COM4", MockBehavior::Scale(Weight::from_hundredths(990)));
    let registry = ScaleRegistry::new(Arc::new(ScaleConfig::with_port("COM4")), Arc::new(mock.clone()));

    let first = registry.current().await.expect("current").expect("session");
    let second = registry.current().await.expect("current").expect("session");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.port_name(), "COM4");
    assert_eq!(second.read_value().await, Weight::from_hundredths(990));
    assert_eq!(mock.open_count("COM4"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_shares_one_session() {
    let mock = MockConnector::new().with_port("COM4", MockBehavior::Silent);
    let registry = Arc::new(ScaleRegistry::new(
        Arc::new(ScaleConfig::with_port("COM4")),
        Arc::new(mock.clone()),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.current().await.expect("current").expect("session") })
        })
        .collect();

    let mut sessions = Vec::new();
    for handle in handles {
        sessions.push(handle.await.expect("task"));
    }
    assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    assert_eq!(mock.open_count("COM4"), 1);
}

#[tokio::test(start_paused = true)]
async fn unopenable_configured_port_is_an_error() {
    let mock = MockConnector::new().with_port("COM4", MockBehavior::Unplugged);
    let registry = ScaleRegistry::new(Arc::new(ScaleConfig::with_port("COM4")), Arc::new(mock.clone()));

    let result = registry.current().await;
    assert!(matches!(
        result,
        Err(DeviceError::SerialError(SerialError::ConnectionFailed(_)))
    ));

    // A later call retries once the scale is back.
    mock.set_behavior("COM4", MockBehavior::Silent);
    assert!(registry.current().await.expect("current").is_some());
}

#[tokio::test(start_paused = true)]
async fn install_replaces_active_session() {
    let mock = MockConnector::new()
        .with_port("COM1", MockBehavior::Silent)
        .with_port("COM2", MockBehavior::Silent);
    let connector: Arc<dyn PortConnector> = Arc::new(mock.clone());
    let registry = ScaleRegistry::new(Arc::new(ScaleConfig::with_port("COM1")), connector.clone());

    let configured = registry.current().await.expect("current").expect("session");
    let replacement = Arc::new(ScaleSession::open("COM2", connector).expect("open"));

    let previous = registry.install(replacement.clone()).await.expect("previous session");
    assert!(Arc::ptr_eq(&previous, &configured));
    let active = registry.current().await.expect("current").expect("session");
    assert_eq!(active.port_name(), "COM2");

    let taken = registry.take().await.expect("taken");
    assert!(Arc::ptr_eq(&taken, &replacement));
}
