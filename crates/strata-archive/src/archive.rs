//! Archive handle with serialized status transitions
//!
//! Status changes go through [`Archive::set_status`], which validates the
//! transition, publishes the new metadata and then notifies every registered
//! listener. Transitions on one archive are serialized end to end, so
//! listeners observe them in order.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use strata_common::{ArchiveId, Result, now_millis};
use tracing::{debug, info};

use crate::metadata::ArchiveMetadata;
use crate::status::ArchiveStatus;

/// Callback invoked after an archive changes status
pub trait ArchiveStatusListener: Send + Sync {
    /// `archive` is a snapshot taken right after the change.
    fn on_status_change(&self, archive: &ArchiveMetadata, old: ArchiveStatus, new: ArchiveStatus);
}

/// One physical storage device
pub struct Archive {
    metadata: RwLock<ArchiveMetadata>,
    listeners: RwLock<Vec<Arc<dyn ArchiveStatusListener>>>,
    /// Held across validate, publish and notify
    transition: Mutex<()>,
}

impl Archive {
    /// Wrap metadata read from (or about to be written to) a device
    #[must_use]
    pub fn new(metadata: ArchiveMetadata) -> Self {
        Self {
            metadata: RwLock::new(metadata),
            listeners: RwLock::new(Vec::new()),
            transition: Mutex::new(()),
        }
    }

    /// Register a listener for status changes
    pub fn add_listener(&self, listener: Arc<dyn ArchiveStatusListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Snapshot of the current metadata
    #[must_use]
    pub fn metadata(&self) -> ArchiveMetadata {
        self.metadata.read().clone()
    }

    #[must_use]
    pub fn archive_id(&self) -> Option<ArchiveId> {
        self.metadata.read().archive_id
    }

    #[must_use]
    pub fn status(&self) -> ArchiveStatus {
        self.metadata.read().status()
    }

    /// Whether I/O may be issued, read under the same lock transitions publish with
    #[must_use]
    pub fn can_do_io(&self) -> bool {
        self.metadata.read().status().can_do_io()
    }

    #[must_use]
    pub fn logical_free_space(&self) -> u64 {
        self.metadata.read().logical_free_space
    }

    /// Update the free space counter
    pub fn set_logical_free_space(&self, bytes: u64) {
        self.metadata.write().logical_free_space = bytes;
    }

    /// Move the archive to `new`, returning the previous status.
    ///
    /// A rejected transition leaves the archive unchanged and notifies nobody.
    /// Listeners are not called when the status stays the same.
    pub fn set_status(&self, new: ArchiveStatus) -> Result<ArchiveStatus> {
        let _serial = self.transition.lock();
        let (old, snapshot) = {
            let mut metadata = self.metadata.write();
            let old = metadata.status();
            old.validate(new)?;
            metadata.status = Some(new);
            metadata.updated_time = now_millis();
            (old, metadata.clone())
        };

        if old == new {
            debug!("archive {:?} stays {}", snapshot.archive_id, new);
        } else {
            info!(
                "archive {:?} status change: {} -> {}",
                snapshot.archive_id, old, new
            );
            self.notify(&snapshot, old, new);
        }
        Ok(old)
    }

    /// Merge a newer metadata snapshot.
    ///
    /// A status carried by the snapshot goes through the normal transition
    /// guard and listeners; if it is rejected nothing is merged. A snapshot
    /// without a status keeps the current one. Returns whether anything
    /// changed.
    pub fn refresh(&self, newer: &ArchiveMetadata) -> Result<bool> {
        let _serial = self.transition.lock();
        let (old, snapshot, changed) = {
            let mut metadata = self.metadata.write();
            let old = metadata.status();
            if let Some(status) = newer.status {
                old.validate(status)?;
            }
            let changed = metadata.merge_from(newer);
            (old, metadata.clone(), changed)
        };

        let new = snapshot.status();
        if old != new {
            info!(
                "archive {:?} status change on refresh: {} -> {}",
                snapshot.archive_id, old, new
            );
            self.notify(&snapshot, old, new);
        }
        Ok(changed)
    }

    fn notify(&self, snapshot: &ArchiveMetadata, old: ArchiveStatus, new: ArchiveStatus) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.on_status_change(snapshot, old, new);
        }
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let metadata = self.metadata.read();
        f.debug_struct("Archive")
            .field("archive_id", &metadata.archive_id)
            .field("device_name", &metadata.device_name)
            .field("status", &metadata.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::ArchiveType;
    use strata_common::Error;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ArchiveStatus, ArchiveStatus)>>,
    }

    impl ArchiveStatusListener for Recorder {
        fn on_status_change(
            &self,
            archive: &ArchiveMetadata,
            old: ArchiveStatus,
            new: ArchiveStatus,
        ) {
            assert_eq!(archive.status(), new);
            self.events.lock().push((old, new));
        }
    }

    fn archive(status: ArchiveStatus) -> Archive {
        let metadata = ArchiveMetadata {
            status: Some(status),
            ..ArchiveMetadata::new(ArchiveId::new(1), ArchiveType::RawDisk)
        };
        Archive::new(metadata)
    }

    #[test]
    fn test_set_status_notifies() {
        let archive = archive(ArchiveStatus::Good);
        let recorder = Arc::new(Recorder::default());
        archive.add_listener(recorder.clone());
        assert_eq!(archive.listener_count(), 1);

        let old = archive.set_status(ArchiveStatus::Degraded).unwrap();
        assert_eq!(old, ArchiveStatus::Good);
        assert_eq!(archive.status(), ArchiveStatus::Degraded);
        assert!(archive.can_do_io());
        assert!(archive.metadata().updated_time > 0);

        archive.set_status(ArchiveStatus::Broken).unwrap();
        assert!(!archive.can_do_io());

        assert_eq!(
            *recorder.events.lock(),
            vec![
                (ArchiveStatus::Good, ArchiveStatus::Degraded),
                (ArchiveStatus::Degraded, ArchiveStatus::Broken),
            ]
        );
    }

    #[test]
    fn test_rejected_transition_changes_nothing() {
        let archive = archive(ArchiveStatus::Good);
        let recorder = Arc::new(Recorder::default());
        archive.add_listener(recorder.clone());

        let err = archive.set_status(ArchiveStatus::Ejected).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(archive.status(), ArchiveStatus::Good);
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_refresh_merges_and_guards_status() {
        let archive = archive(ArchiveStatus::Offlined);
        let recorder = Arc::new(Recorder::default());
        archive.add_listener(recorder.clone());

        let newer = ArchiveMetadata {
            status: Some(ArchiveStatus::Good),
            serial_number: Some("SN-9".into()),
            ..ArchiveMetadata::default()
        };
        assert!(archive.refresh(&newer).unwrap());
        let current = archive.metadata();
        assert_eq!(current.status(), ArchiveStatus::Good);
        assert_eq!(current.serial_number.as_deref(), Some("SN-9"));
        assert_eq!(current.archive_id, Some(ArchiveId::new(1)));
        assert_eq!(recorder.events.lock().len(), 1);

        // Good -> Offlined is not allowed; the serial number must not be merged either
        let bad = ArchiveMetadata {
            status: Some(ArchiveStatus::Offlined),
            serial_number: Some("SN-10".into()),
            ..ArchiveMetadata::default()
        };
        assert!(archive.refresh(&bad).is_err());
        assert_eq!(archive.metadata().serial_number.as_deref(), Some("SN-9"));
    }

    #[test]
    fn test_self_transition_not_notified() {
        let archive = archive(ArchiveStatus::Good);
        let recorder = Arc::new(Recorder::default());
        archive.add_listener(recorder.clone());

        let old = archive.set_status(ArchiveStatus::Good).unwrap();
        assert_eq!(old, ArchiveStatus::Good);
        assert_eq!(archive.status(), ArchiveStatus::Good);
        assert!(recorder.events.lock().is_empty());

        archive.set_status(ArchiveStatus::Degraded).unwrap();
        archive.set_status(ArchiveStatus::Degraded).unwrap();
        assert_eq!(
            *recorder.events.lock(),
            vec![(ArchiveStatus::Good, ArchiveStatus::Degraded)]
        );
    }

    #[test]
    fn test_refresh_partial_snapshot_keeps_status() {
        let archive = archive(ArchiveStatus::Good);
        let recorder = Arc::new(Recorder::default());
        archive.add_listener(recorder.clone());

        let partial: ArchiveMetadata =
            serde_json::from_str(r#"{"description":"rack 4"}"#).unwrap();
        assert!(archive.refresh(&partial).unwrap());

        let current = archive.metadata();
        assert_eq!(current.status(), ArchiveStatus::Good);
        assert_eq!(current.archive_type(), ArchiveType::RawDisk);
        assert_eq!(current.description.as_deref(), Some("rack 4"));
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn test_concurrent_transitions_are_serialized() {
        let archive = Arc::new(archive(ArchiveStatus::Good));
        let recorder = Arc::new(Recorder::default());
        archive.add_listener(recorder.clone());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let archive = Arc::clone(&archive);
                std::thread::spawn(move || {
                    let target = if i % 2 == 0 {
                        ArchiveStatus::Good
                    } else {
                        ArchiveStatus::ConfigMismatch
                    };
                    let _ = archive.set_status(target);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Every recorded event starts where the previous one ended
        let events = recorder.events.lock();
        for pair in events.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(events.last().map(|e| e.1), Some(archive.status()));
    }
}
