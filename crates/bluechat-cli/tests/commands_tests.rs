//! Command handlers driven against the mock radio

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

use bluechat_cli::commands::{self, chat, host, scan};
use bluechat_cli::{BluechatApp, CliAppConfig, CliError, JsonFileStore};
use bluechat_core::{
    BluechatConfig, ChatStore, KnownPeer, NewMessage, PeerIdentity, RadioTransport, Timestamp,
};
use bluechat_harness::MockRadio;

const PEER: PeerIdentity = PeerIdentity::new(0x5eed_1234);
const PEER_ADDRESS: &str = "AA:BB:CC:DD:EE:01";

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn test_config(dir: &Path) -> CliAppConfig {
    let mut config = CliAppConfig::default();
    config.core = BluechatConfig::testing();
    config.storage.data_dir = Some(dir.to_path_buf());
    config
}

fn open_app(config: CliAppConfig, radio: &Arc<MockRadio>) -> BluechatApp {
    let transport: Arc<dyn RadioTransport> = radio.clone();
    BluechatApp::open(config, transport).expect("app should open")
}

fn output(buffer: Vec<u8>) -> String {
    String::from_utf8(buffer).expect("output is UTF-8")
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should hold in time");
}

/// Advertise `PEER` as soon as the node starts scanning
fn advertise_peer_when_scanning(radio: &Arc<MockRadio>) -> tokio::task::JoinHandle<()> {
    let radio = Arc::clone(radio);
    tokio::spawn(async move {
        wait_until(|| radio.is_scanning()).await;
        let advertisement = MockRadio::advertisement_for(PEER, PEER_ADDRESS, Some("BlueChat-peer"));
        assert!(radio.inject_advertisement(advertisement).await);
    })
}

// ----------------------------------------------------------------------------
// Offline Commands
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_identity_is_stable_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let radio = Arc::new(MockRadio::ideal());

    let first = open_app(test_config(dir.path()), &radio).local_identity();
    let app = open_app(test_config(dir.path()), &radio);
    assert_eq!(app.local_identity(), first);

    let mut out = Vec::new();
    commands::show_identity(&app, &mut out).unwrap();
    let text = output(out);
    assert!(text.contains(&first.to_string()));
    assert!(text.contains("BlueChat-"));
}

#[tokio::test]
async fn test_history_forget_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cli.history_limit = 1;

    {
        let store = JsonFileStore::open(config.history_path().unwrap()).unwrap();
        let local = PeerIdentity::new(0x0101_0101);
        store.insert_message(NewMessage::sent(local, PEER, "first")).await.unwrap();
        store.insert_message(NewMessage::sent(local, PEER, "second")).await.unwrap();
        store
            .upsert_known_peer(KnownPeer::new(PEER).messaged_at(Timestamp::now()))
            .await
            .unwrap();
    }

    let radio = Arc::new(MockRadio::ideal());
    let app = open_app(config, &radio);

    let mut out = Vec::new();
    commands::list_peers(&app, &mut out).await.unwrap();
    assert!(output(out).contains(&PEER.to_string()));

    let mut out = Vec::new();
    commands::show_history(&app, PEER, &mut out).await.unwrap();
    let text = output(out);
    assert!(text.contains("... 1 older messages"));
    assert!(text.contains("second"));
    assert!(!text.contains("first"));

    let mut out = Vec::new();
    commands::forget(&app, PEER, &mut out).await.unwrap();
    commands::forget(&app, PEER, &mut out).await.unwrap();
    let text = output(out);
    assert!(text.contains(&format!("Forgot {}", PEER)));
    assert!(text.contains("is not a known peer"));

    let mut out = Vec::new();
    commands::clear(&app, &mut out).await.unwrap();
    assert!(output(out).contains("Deleted 2 messages"));

    let mut out = Vec::new();
    commands::list_peers(&app, &mut out).await.unwrap();
    assert!(output(out).contains("No known peers yet"));
}

// ----------------------------------------------------------------------------
// Radio Commands
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_host_prints_inbound_messages() {
    let dir = tempfile::tempdir().unwrap();
    let radio = Arc::new(MockRadio::ideal());
    let mut app = open_app(test_config(dir.path()), &radio);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let remote = Arc::clone(&radio);
    let driver = tokio::spawn(async move {
        wait_until(|| remote.is_server_open()).await;
        assert!(remote.client_write(PEER_ADDRESS, b"hello host".to_vec(), true).await.is_some());
        sleep(Duration::from_millis(200)).await;
        let _ = stop_tx.send(());
    });

    let mut out = Vec::new();
    host(&mut app, &mut out, async {
        let _ = stop_rx.await;
    })
    .await
    .unwrap();
    driver.await.unwrap();

    assert!(output(out).contains("hello host"));
    assert!(!radio.is_server_open());
    assert!(!radio.is_advertising());
}

#[tokio::test]
async fn test_scan_lists_each_peer_once() {
    let dir = tempfile::tempdir().unwrap();
    let radio = Arc::new(MockRadio::ideal());
    let mut app = open_app(test_config(dir.path()), &radio);

    let remote = Arc::clone(&radio);
    let driver = tokio::spawn(async move {
        wait_until(|| remote.is_scanning()).await;
        for _ in 0..3 {
            let advertisement = MockRadio::advertisement_for(PEER, PEER_ADDRESS, Some("BlueChat-peer"));
            remote.inject_advertisement(advertisement).await;
        }
    });

    let mut out = Vec::new();
    scan(&mut app, &mut out, Duration::from_millis(500)).await.unwrap();
    driver.await.unwrap();

    let text = output(out);
    assert_eq!(text.matches(&PEER.to_string()).count(), 1);
    assert!(text.contains("1 peers found"));
    assert!(!radio.is_scanning());
}

#[tokio::test]
async fn test_chat_sends_each_line() {
    let dir = tempfile::tempdir().unwrap();
    let radio = Arc::new(MockRadio::ideal());
    let mut app = open_app(test_config(dir.path()), &radio);
    let injector = advertise_peer_when_scanning(&radio);

    let mut out = Vec::new();
    let input: &[u8] = b"hello there\n\n/quit\n";
    chat(&mut app, PEER, input, &mut out).await.unwrap();
    injector.await.unwrap();

    let link = radio.last_link().expect("a link was opened");
    assert_eq!(radio.writes(link), vec![b"hello there".to_vec()]);

    let history = app.coordinator().history(PEER).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hello there");
    assert!(output(out).contains(&format!("Connected to {}", PEER)));
}

#[tokio::test]
async fn test_chat_rejects_oversized_line() {
    let dir = tempfile::tempdir().unwrap();
    let radio = Arc::new(MockRadio::ideal());
    let mut app = open_app(test_config(dir.path()), &radio);
    let injector = advertise_peer_when_scanning(&radio);

    let mut out = Vec::new();
    let long_line = format!("{}\n/quit\n", "x".repeat(400));
    chat(&mut app, PEER, long_line.as_bytes(), &mut out).await.unwrap();
    injector.await.unwrap();

    assert!(output(out).contains("! "));
    assert!(app.coordinator().history(PEER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_with_absent_peer_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.core = config.core.with_scan_timeout(Duration::from_millis(200));
    let radio = Arc::new(MockRadio::ideal());
    let mut app = open_app(config, &radio);

    let mut out = Vec::new();
    let input: &[u8] = b"/quit\n";
    let result = chat(&mut app, PEER, input, &mut out).await;
    assert!(matches!(result, Err(CliError::PeerNotSeen(_))));
    assert!(radio.last_link().is_none());
}
