// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Status module framework
//!
//! A PLC module polls a group of registers, derives a [`StatusFlags`] value and
//! notifies when it changes. Concrete modules implement [`PlcModule::derive_status`];
//! the change detection, the failure boundary and the notification ordering live
//! here.
//!
//! ## Lifecycle
//!
//! Modules are created with the [`Plc`](crate::plc::Plc) but do not poll until
//! [`start_polling`] is called, so the owning process can attach its notifier
//! first. [`ModuleCore::shutdown`] cancels the loop and any pending notification.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::status::StatusFlags;

/// Extra fields attached to a status notification.
pub type ExtraFields = Map<String, Value>;

/// A status report sent to the notifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Name of the module reporting.
    pub module: String,
    /// Raw value of the status mask.
    pub value: u32,
    /// Human readable status label.
    pub label: String,
    /// Extra fields, e.g. the dome opening percentage.
    pub extra: ExtraFields,
}

/// Receiver of module status notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Notifier writing status changes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        if notification.extra.is_empty() {
            info!(
                "{}: {} ({:#x})",
                notification.module, notification.label, notification.value
            );
        } else {
            info!(
                "{}: {} ({:#x}) {}",
                notification.module,
                notification.label,
                notification.value,
                Value::Object(notification.extra)
            );
        }
    }
}

/// Result of a status derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutput<F> {
    pub status: F,
    pub extra: ExtraFields,
}

impl<F> ModuleOutput<F> {
    pub fn new(status: F) -> Self {
        Self {
            status,
            extra: ExtraFields::new(),
        }
    }

    pub fn with_extra(status: F, extra: ExtraFields) -> Self {
        Self { status, extra }
    }
}

impl<F> From<F> for ModuleOutput<F> {
    fn from(status: F) -> Self {
        Self::new(status)
    }
}

struct ModuleState<F> {
    status: F,
    extra: ExtraFields,
}

/// State shared by every module: name, interval, current status and tasks.
pub struct ModuleCore<F: StatusFlags> {
    name: String,
    interval: Duration,
    state: Mutex<ModuleState<F>>,
    notifier: Mutex<Option<Arc<dyn Notifier>>>,
    pending_notification: Mutex<Option<JoinHandle<()>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<F: StatusFlags> ModuleCore<F> {
    /// Create the core of a module polling every `interval`. The status starts as `UNKNOWN`.
    pub fn new(name: &str, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            interval,
            state: Mutex::new(ModuleState {
                status: F::UNKNOWN,
                extra: ExtraFields::new(),
            }),
            notifier: Mutex::new(None),
            pending_notification: Mutex::new(None),
            poll_task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Last derived status.
    pub fn status(&self) -> F {
        lock(&self.state).status
    }

    /// Extra fields of the last derivation.
    pub fn extra(&self) -> ExtraFields {
        lock(&self.state).extra.clone()
    }

    /// Attach or replace the notifier.
    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        *lock(&self.notifier) = Some(notifier);
    }

    /// Whether the poll loop is running.
    pub fn is_polling(&self) -> bool {
        lock(&self.poll_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Store a freshly derived status and notify if needed.
    ///
    /// Notifies when the status changed, when `force_output` is set, or when
    /// extra fields are supplied. Extra fields do not take part in the status
    /// comparison.
    pub fn record(&self, status: F, extra: ExtraFields, force_output: bool) {
        let notify = {
            let mut state = lock(&self.state);
            let changed = state.status != status;
            state.status = status;
            state.extra = extra.clone();
            changed || !extra.is_empty() || force_output
        };

        if notify {
            self.notify(status, extra);
        }
    }

    /// Notify the current status.
    pub fn notify_current(&self) {
        let (status, extra) = {
            let state = lock(&self.state);
            (state.status, state.extra.clone())
        };
        self.notify(status, extra);
    }

    /// Dispatch a notification in a background task.
    ///
    /// A still pending notification of this module is cancelled first so
    /// outputs are never observed out of order.
    fn notify(&self, status: F, extra: ExtraFields) {
        let Some(notifier) = lock(&self.notifier).clone() else {
            return;
        };

        let notification = Notification {
            module: self.name.clone(),
            value: status.value(),
            label: status.label(),
            extra,
        };

        let mut pending = lock(&self.pending_notification);
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        *pending = Some(tokio::spawn(async move {
            notifier.notify(notification).await;
        }));
    }

    fn set_poll_task(&self, task: JoinHandle<()>) {
        if let Some(previous) = lock(&self.poll_task).replace(task) {
            previous.abort();
        }
    }

    /// Cancel the poll loop and any pending notification, and wait for them to finish.
    pub async fn shutdown(&self) {
        let tasks = [
            lock(&self.poll_task).take(),
            lock(&self.pending_notification).take(),
        ];
        for task in tasks.into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }
        debug!("{}: stopped", self.name);
    }
}

/// A module associated with a group of PLC registers.
#[async_trait]
pub trait PlcModule: Send + Sync + 'static {
    type Flags: StatusFlags;

    fn core(&self) -> &ModuleCore<Self::Flags>;

    /// Determine the current status from the PLC.
    async fn derive_status(&self, use_cache: bool) -> anyhow::Result<ModuleOutput<Self::Flags>>;

    /// Name of the module.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Last derived status.
    fn status(&self) -> Self::Flags {
        self.core().status()
    }

    /// Refresh the module status.
    ///
    /// A derivation failure never propagates: it is logged and the status
    /// becomes `UNKNOWN`.
    async fn update(&self, force_output: bool, use_cache: bool) -> Self::Flags {
        let (status, extra) = match self.derive_status(use_cache).await {
            Ok(output) => (output.status, output.extra),
            Err(err) => {
                warn!("{}: failed updating status: {:#}", self.name(), err);
                (Self::Flags::UNKNOWN, ExtraFields::new())
            }
        };

        self.core().record(status, extra, force_output);
        status
    }
}

/// Notify the current status and start the poll loop of `module`.
///
/// The loop holds a weak reference so it never keeps the module alive.
pub fn start_polling<M: PlcModule>(module: &Arc<M>) {
    let core = module.core();
    core.notify_current();

    let interval = core.interval();
    let weak = Arc::downgrade(module);
    let task = tokio::spawn(async move {
        loop {
            let Some(module) = weak.upgrade() else {
                break;
            };
            module.update(false, false).await;
            drop(module);
            sleep(interval).await;
        }
    });

    debug!("{}: polling every {:?}", core.name(), interval);
    core.set_poll_task(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DomeStatus;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Capture {
        notifications: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for Capture {
        async fn notify(&self, notification: Notification) {
            lock(&self.notifications).push(notification);
        }
    }

    struct Toggle {
        core: ModuleCore<DomeStatus>,
        fail: AtomicBool,
        open: AtomicBool,
    }

    #[async_trait]
    impl PlcModule for Toggle {
        type Flags = DomeStatus;

        fn core(&self) -> &ModuleCore<DomeStatus> {
            &self.core
        }

        async fn derive_status(&self, _use_cache: bool) -> anyhow::Result<ModuleOutput<DomeStatus>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("register read failed");
            }
            if self.open.load(Ordering::SeqCst) {
                Ok(DomeStatus::OPEN.into())
            } else {
                Ok(DomeStatus::CLOSED.into())
            }
        }
    }

    fn toggle() -> (Arc<Toggle>, Arc<Capture>) {
        let module = Arc::new(Toggle {
            core: ModuleCore::new("dome", Duration::from_secs(60)),
            fail: AtomicBool::new(false),
            open: AtomicBool::new(false),
        });
        let capture = Arc::new(Capture::default());
        module.core().set_notifier(capture.clone());
        (module, capture)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_status_starts_unknown() {
        let (module, _) = toggle();
        assert_eq!(module.status(), DomeStatus::UNKNOWN);
    }

    #[tokio::test]
    async fn test_failed_derivation_degrades_to_unknown() {
        let (module, _) = toggle();
        assert_eq!(module.update(false, true).await, DomeStatus::CLOSED);

        module.fail.store(true, Ordering::SeqCst);
        let status = module.update(false, true).await;
        assert_eq!(status, DomeStatus::UNKNOWN);
        assert_eq!(module.status().value(), DomeStatus::UNKNOWN.bits());
    }

    #[tokio::test]
    async fn test_notifies_only_on_change_or_force() {
        let (module, capture) = toggle();

        module.update(false, true).await;
        settle().await;
        module.update(false, true).await;
        settle().await;
        assert_eq!(lock(&capture.notifications).len(), 1);

        module.update(true, true).await;
        settle().await;
        assert_eq!(lock(&capture.notifications).len(), 2);

        module.open.store(true, Ordering::SeqCst);
        module.update(false, true).await;
        settle().await;
        let notifications = lock(&capture.notifications);
        assert_eq!(notifications.len(), 3);
        assert_eq!(notifications[2].label, "OPEN");
        assert_eq!(notifications[2].module, "dome");
    }

    #[tokio::test]
    async fn test_extra_fields_trigger_notification() {
        let (module, capture) = toggle();
        let mut extra = ExtraFields::new();
        extra.insert("percent_open".to_string(), Value::from(10.0));

        module.core().record(DomeStatus::MOVING, extra.clone(), false);
        settle().await;
        // Same status and same extras: still notified
        module.core().record(DomeStatus::MOVING, extra.clone(), false);
        settle().await;
        extra.insert("percent_open".to_string(), Value::from(20.0));
        module.core().record(DomeStatus::MOVING, extra, false);
        settle().await;
        assert_eq!(lock(&capture.notifications).len(), 3);

        module.core().record(DomeStatus::MOVING, ExtraFields::new(), false);
        settle().await;
        let notifications = lock(&capture.notifications);
        assert_eq!(notifications.len(), 3);
        assert_eq!(
            notifications[1].extra.get("percent_open").and_then(|v| v.as_f64()),
            Some(10.0)
        );
    }

    #[tokio::test]
    async fn test_latest_notification_wins() {
        let (module, capture) = toggle();

        // Without yielding, each dispatch cancels the previous pending one.
        module.core().record(DomeStatus::OPEN, ExtraFields::new(), false);
        module.core().record(DomeStatus::MOVING, ExtraFields::new(), false);
        module.core().record(DomeStatus::CLOSED, ExtraFields::new(), false);
        settle().await;

        let notifications = lock(&capture.notifications);
        assert_eq!(notifications.last().map(|n| n.label.as_str()), Some("CLOSED"));
        assert!(notifications.len() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polling_and_shutdown() {
        let (module, capture) = toggle();
        start_polling(&module);
        assert!(module.core().is_polling());
        settle().await;

        // Initial UNKNOWN notification, then CLOSED from the first poll.
        let labels: Vec<String> = lock(&capture.notifications)
            .iter()
            .map(|n| n.label.clone())
            .collect();
        assert_eq!(labels.last().map(String::as_str), Some("CLOSED"));

        module.core().shutdown().await;
        assert!(!module.core().is_polling());
    }
}
