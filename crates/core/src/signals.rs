// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Represents a digital signal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum DigitalLevel {
    #[default]
    Low,
    High,
}

impl From<bool> for DigitalLevel {
    fn from(b: bool) -> Self {
        if b {
            DigitalLevel::High
        } else {
            DigitalLevel::Low
        }
    }
}

impl From<DigitalLevel> for bool {
    fn from(level: DigitalLevel) -> Self {
        match level {
            DigitalLevel::High => true,
            DigitalLevel::Low => false,
        }
    }
}

/// Receiver of an output line, e.g. the external-interrupt input of a hart.
///
/// Called only when the level changes, never while the controller state lock is held.
pub trait IrqSink: std::fmt::Debug + Send + Sync {
    fn set(&self, level: bool);
}

/// An in-process output line that remembers its level and counts transitions.
#[derive(Debug, Default)]
pub struct GpioLine {
    level: AtomicBool,
    transitions: AtomicU64,
}

impl GpioLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    pub fn level(&self) -> DigitalLevel {
        self.is_set().into()
    }

    /// Number of times the line actually toggled.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::SeqCst)
    }
}

impl IrqSink for GpioLine {
    fn set(&self, level: bool) {
        if self.level.swap(level, Ordering::SeqCst) != level {
            self.transitions.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Interrupt-request output of a peripheral model.
#[derive(Debug, Clone, Default)]
pub struct InterruptLine {
    asserted: bool,
}

impl InterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assert(&mut self) {
        self.asserted = true;
    }

    pub fn deassert(&mut self) {
        self.asserted = false;
    }

    pub fn set(&mut self, level: DigitalLevel) {
        self.asserted = level.into();
    }

    pub fn is_asserted(&self) -> bool {
        self.asserted
    }
}
