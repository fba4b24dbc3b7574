//! Ownership of an open client link

use std::sync::Arc;

use tracing::{debug, error};

use bluechat_core::transport::{LinkHandle, RadioTransport};

/// Holds a link handle and closes it exactly once
///
/// `release` closes the link immediately; dropping an unreleased guard
/// schedules the close on the current runtime.
pub struct LinkGuard {
    transport: Arc<dyn RadioTransport>,
    link: Option<LinkHandle>,
}

impl LinkGuard {
    pub fn new(transport: Arc<dyn RadioTransport>, link: LinkHandle) -> Self {
        Self {
            transport,
            link: Some(link),
        }
    }

    /// The held link, until released
    pub fn handle(&self) -> Option<LinkHandle> {
        self.link
    }

    pub fn is_released(&self) -> bool {
        self.link.is_none()
    }

    /// Close the link; later calls do nothing
    pub async fn release(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Releasing {}", link);
            if let Err(e) = self.transport.close(link).await {
                error!("Failed to close {}: {}", link, e);
            }
        }
    }
}

impl Drop for LinkGuard {
    fn drop(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = Arc::clone(&self.transport);
                handle.spawn(async move {
                    if let Err(e) = transport.close(link).await {
                        error!("Failed to close {} on drop: {}", link, e);
                    }
                });
            }
            Err(_) => error!("{} dropped outside a runtime and was not closed", link),
        }
    }
}
