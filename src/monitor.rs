// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Platform event delivery.
//!
//! The host reports package and user changes as [`PlatformEvent`]s. These are
//! posted to an [`EventMonitor`], which hands them to a dedicated background
//! worker so the host's own event dispatch is never blocked by file I/O.
//!
//! The worker handles one event at a time, in the order they were posted.
//! Each event runs to completion before the next one is taken.

use crate::{
    helper::LocaleBackupHelper,
    host::{BackupNotifier, Clock, LocaleService, PackageQuery, UserId},
};

use std::sync::Arc;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use tracing::{debug, error};

/// Package or user change reported by the host.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PlatformEvent {
    /// Package was installed.
    PackageAdded { package_name: String, uid: u32 },

    /// Data of package was cleared.
    PackageDataCleared { package_name: String, uid: u32 },

    /// Package was fully removed.
    PackageRemoved { package_name: String, uid: u32 },

    /// User was removed.
    UserRemoved { user_id: UserId },
}

/// Cloneable handle for posting events to the worker.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: UnboundedSender<PlatformEvent>,
}

impl EventSender {
    /// Post event to worker without waiting for it to be handled.
    ///
    /// # Errors
    ///
    /// - Return [`MonitorError::Closed`] if worker has stopped.
    pub fn post(&self, event: PlatformEvent) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|err| MonitorError::Closed(err.0))
    }
}

/// Background worker handling platform events.
#[derive(Debug)]
pub struct EventMonitor {
    sender: EventSender,
    worker: JoinHandle<()>,
}

impl EventMonitor {
    /// Spawn worker on current tokio runtime.
    ///
    /// # Panics
    ///
    /// - Panics if called outside of a tokio runtime.
    pub fn spawn<H, C>(helper: Arc<LocaleBackupHelper<H, C>>) -> Self
    where
        H: LocaleService + PackageQuery + BackupNotifier,
        C: Clock,
    {
        let (sender, receiver) = unbounded_channel();
        let worker = tokio::spawn(run_worker(helper, receiver));

        Self {
            sender: EventSender { sender },
            worker,
        }
    }

    /// Handle for posting events.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Post event to worker without waiting for it to be handled.
    ///
    /// # Errors
    ///
    /// - Return [`MonitorError::Closed`] if worker has stopped.
    pub fn post(&self, event: PlatformEvent) -> Result<()> {
        self.sender.post(event)
    }

    /// Stop accepting events, and wait for worker to drain pending ones.
    ///
    /// The worker only stops once every [`EventSender`] handed out by
    /// [`EventMonitor::sender`] has been dropped as well.
    ///
    /// # Errors
    ///
    /// - Return [`MonitorError::Join`] if worker task failed.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.sender);
        self.worker.await?;

        Ok(())
    }
}

async fn run_worker<H, C>(
    helper: Arc<LocaleBackupHelper<H, C>>,
    mut receiver: UnboundedReceiver<PlatformEvent>,
) where
    H: LocaleService + PackageQuery + BackupNotifier,
    C: Clock,
{
    while let Some(event) = receiver.recv().await {
        debug!("handle {event:?}");
        let helper = Arc::clone(&helper);
        let handled = tokio::task::spawn_blocking(move || {
            helper.handle_event(&event);
        })
        .await;

        // INVARIANT: One failed event never stops the worker.
        if let Err(err) = handled {
            error!("exception while handling platform event: {err}");
        }
    }

    debug!("platform event channel closed, worker stopped");
}

/// Event monitor error types.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Worker no longer accepts events.
    #[error("event worker stopped, dropped {0:?}")]
    Closed(PlatformEvent),

    /// Worker task failed.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Friendly result alias :3
pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
