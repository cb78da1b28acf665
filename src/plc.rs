// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC interface
//!
//! [`Plc`] owns the register layer, the engineering mode and the status
//! modules. Modules are built immediately but only start polling once
//! [`Plc::start`] is called, so the owning process can attach its notifier
//! first.

use std::sync::Arc;

use log::info;

use crate::config::Config;
use crate::dome::DomeController;
use crate::engineering::EngineeringMode;
use crate::modbus::Modbus;
use crate::module::{start_polling, Notifier, PlcModule};
use crate::safety::SafetyController;

/// Enclosure PLC with its dome and safety modules.
pub struct Plc {
    pub modbus: Arc<Modbus>,
    pub engineering: Arc<EngineeringMode>,
    pub safety: Arc<SafetyController>,
    pub dome: Arc<DomeController>,
}

impl Plc {
    pub fn new(config: &Config) -> Self {
        let modbus = Arc::new(Modbus::new(&config.modbus));
        let engineering = Arc::new(EngineeringMode::new(
            config.engineering_mode.default_duration(),
        ));
        let safety = Arc::new(SafetyController::new(
            modbus.clone(),
            config.safety.clone(),
            engineering.clone(),
        ));
        let dome = Arc::new(DomeController::new(
            modbus.clone(),
            safety.clone(),
            config.dome.clone(),
        ));

        Self {
            modbus,
            engineering,
            safety,
            dome,
        }
    }

    /// Attach the notifier of every module.
    pub fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.safety.core().set_notifier(notifier.clone());
        self.dome.core().set_notifier(notifier);
    }

    /// Start polling the modules.
    pub fn start(&self) {
        info!(
            "Starting PLC modules against {}",
            self.modbus.connection().endpoint()
        );
        start_polling(&self.safety);
        start_polling(&self.dome);
    }

    /// Cancel the poll loops, pending notifications and the engineering timer.
    pub async fn shutdown(&self) {
        self.dome.core().shutdown().await;
        self.safety.core().shutdown().await;
        self.engineering.shutdown();
        info!("PLC modules stopped");
    }
}
