// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::InterruptLine;
use std::fmt::Debug;

/// Trait representing a generic interrupt controller.
///
/// Sources are numbered from 1; consumers are whatever the controller routes to
/// (harts, or privilege levels within a hart).
pub trait InterruptController: Debug + Send + Sync {
    /// Signal the controller that an interrupt line has changed.
    fn set_source_level(&self, irq: u32, level: bool);

    /// Acknowledge the best pending interrupt for `consumer`; 0 when there is none.
    fn claim(&self, consumer: u32) -> u32;

    /// Complete an interrupt, usually called by the CPU after an ISR finishes.
    fn complete(&self, consumer: u32, irq: u32);

    fn output_line(&self, consumer: u32) -> bool;
}

/// A bridge that connects `InterruptLine` signals to an `InterruptController`.
pub struct InterruptBridge<'a> {
    controller: &'a dyn InterruptController,
}

impl<'a> InterruptBridge<'a> {
    pub fn new(controller: &'a dyn InterruptController) -> Self {
        Self { controller }
    }

    pub fn update(&self, irq: u32, line: &InterruptLine) {
        self.controller.set_source_level(irq, line.is_asserted());
    }
}
