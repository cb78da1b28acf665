// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! Runs the enclosure controller as a long lived process: it builds the
//! [`Plc`], attaches the notifier, starts the module poll loops and the
//! optional PLC heartbeat, and tears everything down on shutdown.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_enclosure::{config::Config, daemon::launch_daemon::Daemon};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::Config;
use crate::module::{LogNotifier, Notifier};
use crate::plc::Plc;

/// Coordinates the PLC modules and the background tasks of the controller.
///
/// ### Fields
///
/// * `tasks` - Handles of the background tasks, awaited by [`Daemon::join`]
/// * `running` - Flag shared with the tasks to coordinate shutdown
/// * `plc` - The PLC, once launched
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    plc: Option<Arc<Plc>>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon with no running task.
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            plc: None,
        }
    }

    /// The PLC managed by this daemon, if launched.
    pub fn plc(&self) -> Option<&Arc<Plc>> {
        self.plc.as_ref()
    }

    /// Launch the controller with status changes written to the log.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        self.launch_with_notifier(config, Arc::new(LogNotifier)).await
    }

    /// Launch the controller with a custom notifier.
    ///
    /// The notifier is attached before the poll loops start so the first
    /// status of every module is delivered to it.
    pub async fn launch_with_notifier(
        &mut self,
        config: &Config,
        notifier: Arc<dyn Notifier>,
    ) -> Result<()> {
        if self.plc.is_some() {
            anyhow::bail!("Daemon is already launched");
        }

        info!(
            "Connecting to enclosure PLC at {}:{}",
            config.modbus.host, config.modbus.port
        );
        let plc = Arc::new(Plc::new(config));
        plc.set_notifier(notifier);
        plc.start();
        self.plc = Some(plc.clone());

        if config.heartbeat.enabled {
            self.start_heartbeat(plc, config)?;
        }

        Ok(())
    }

    /// Periodically set the heartbeat register of the PLC.
    fn start_heartbeat(&mut self, plc: Arc<Plc>, config: &Config) -> Result<()> {
        let interval = config.heartbeat.interval();
        debug!("Starting PLC heartbeat every {:?}", interval);

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if let Err(err) = plc.safety.heartbeat().await {
                    warn!("Failed setting the PLC heartbeat: {}", err.user_message());
                }
                time::sleep(interval).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Signal every task to stop.
    ///
    /// Tasks sleeping between iterations are aborted rather than waited for.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Stop the PLC modules and wait for every task to complete.
    pub async fn join(self) -> Result<()> {
        if let Some(plc) = &self.plc {
            plc.shutdown().await;
        }

        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("Task failed: {}", err),
                Err(err) if err.is_cancelled() => {}
                Err(err) => error!("Task panicked: {}", err),
            }
        }
        Ok(())
    }
}
