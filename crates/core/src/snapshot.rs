// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use plicsim_config::PendingMode;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PlicSnapshot {
    pub mode: PendingMode,
    pub forced_consumer: Option<u32>,
    pub sources: Vec<SourceSnapshot>,
    pub consumers: Vec<ConsumerSnapshot>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceSnapshot {
    pub id: u32,
    pub priority: u32,
    pub level: bool,
    pub pending: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSnapshot {
    pub id: u32,
    pub enabled: Vec<u32>,
    pub pending: Vec<u32>,
    pub active: Vec<u32>,
    // Derived; ignored on restore.
    pub output_line: bool,
}
