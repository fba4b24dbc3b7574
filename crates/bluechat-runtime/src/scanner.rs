//! Discovery Scanner
//!
//! Turns raw advertisements into [`ScanSighting`]s of BlueChat peers. Every
//! matching advertisement refreshes presence and the peer directory; the
//! returned stream only yields a peer the first time it is seen in a scan.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use bluechat_core::protocol::{self, BLUECHAT_SERVICE_UUID};
use bluechat_core::transport::{Advertisement, RadioTransport, ScanFilter};
use bluechat_core::{BluechatError, PeerIdentity, PresenceTracker, Result, ScanSighting};

use crate::directory::PeerDirectory;

/// How long an address mapping outlives its last sighting
pub const DIRECTORY_RETENTION: Duration = Duration::from_secs(10 * 60);

// ----------------------------------------------------------------------------
// Scan Stream
// ----------------------------------------------------------------------------

/// Sightings of newly discovered peers; ends when the scan stops
#[derive(Debug)]
pub struct ScanStream {
    receiver: mpsc::Receiver<ScanSighting>,
}

impl ScanStream {
    pub async fn recv(&mut self) -> Option<ScanSighting> {
        self.receiver.recv().await
    }
}

impl Stream for ScanStream {
    type Item = ScanSighting;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

// ----------------------------------------------------------------------------
// Scanner
// ----------------------------------------------------------------------------

/// Runs at most one discovery scan at a time
pub struct Scanner {
    transport: Arc<dyn RadioTransport>,
    presence: Arc<PresenceTracker>,
    directory: Arc<PeerDirectory>,
    buffer: usize,
    active: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(
        transport: Arc<dyn RadioTransport>,
        presence: Arc<PresenceTracker>,
        directory: Arc<PeerDirectory>,
        buffer: usize,
    ) -> Self {
        Self {
            transport,
            presence,
            directory,
            buffer: buffer.max(1),
            active: Mutex::new(None),
        }
    }

    /// Start a scan that stops itself after `timeout`, replacing any running scan
    pub async fn start_scan(
        &self,
        filter_prefix: Option<String>,
        timeout: Duration,
    ) -> Result<ScanStream> {
        if !self.transport.is_radio_available().await {
            return Err(BluechatError::RadioUnavailable);
        }
        self.stop_scan().await?;

        let offline = self.presence.prune();
        let forgotten = self.directory.prune(DIRECTORY_RETENTION);
        if offline + forgotten > 0 {
            debug!(
                "Pruned {} presence entries and {} stale addresses",
                offline, forgotten
            );
        }

        let advertisements = self
            .transport
            .start_scan(ScanFilter {
                service_uuids: vec![BLUECHAT_SERVICE_UUID],
            })
            .await?;
        let (tx, rx) = mpsc::channel(self.buffer);

        info!("Starting discovery scan for {:?}", timeout);
        let task = tokio::spawn(run_scan(
            Arc::clone(&self.transport),
            Arc::clone(&self.presence),
            Arc::clone(&self.directory),
            advertisements,
            tx,
            filter_prefix,
            Instant::now() + timeout,
        ));
        *self.lock() = Some(task);

        Ok(ScanStream { receiver: rx })
    }

    /// Stop the running scan, if any
    pub async fn stop_scan(&self) -> Result<()> {
        let task = self.lock().take();
        if let Some(task) = task {
            if !task.is_finished() {
                task.abort();
                self.transport.stop_scan().await?;
                info!("Discovery scan stopped");
            }
        }
        Ok(())
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if let Some(task) = self.lock().take() {
            task.abort();
        }
    }
}

/// Identity carried by a BlueChat advertisement, if any
pub fn identity_from_advertisement(advertisement: &Advertisement) -> Option<PeerIdentity> {
    advertisement
        .service_uuids
        .iter()
        .map(|uuid| uuid.to_string())
        .filter(|candidate| protocol::is_our_protocol(candidate))
        .find_map(|candidate| protocol::extract_peer_identity(&candidate))
}

async fn run_scan(
    transport: Arc<dyn RadioTransport>,
    presence: Arc<PresenceTracker>,
    directory: Arc<PeerDirectory>,
    mut advertisements: mpsc::Receiver<Advertisement>,
    sightings: mpsc::Sender<ScanSighting>,
    filter_prefix: Option<String>,
    deadline: Instant,
) {
    let mut seen = HashSet::new();

    loop {
        tokio::select! {
            advertisement = advertisements.recv() => {
                let Some(advertisement) = advertisement else {
                    debug!("Advertisement source closed");
                    break;
                };
                let Some(identity) = identity_from_advertisement(&advertisement) else {
                    continue;
                };
                if let Some(prefix) = &filter_prefix {
                    let matches = advertisement
                        .local_name
                        .as_deref()
                        .is_some_and(|name| name.starts_with(prefix.as_str()));
                    if !matches {
                        continue;
                    }
                }

                let sighting = ScanSighting {
                    peer_identity: identity,
                    address: advertisement.address,
                    display_name: advertisement.local_name,
                    rssi: advertisement.rssi,
                    observed_at: Instant::now(),
                };
                presence.record(&sighting);
                directory.record(&sighting);

                if seen.insert(identity) {
                    debug!("Discovered peer {} at {}", identity, sighting.address);
                    if sightings.send(sighting).await.is_err() {
                        debug!("Scan stream dropped");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                info!("Discovery scan timed out after {} peers", seen.len());
                break;
            }
        }
    }

    if let Err(e) = transport.stop_scan().await {
        warn!("Failed to stop scan: {}", e);
    }
}
