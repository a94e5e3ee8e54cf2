// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Platform-Level Interrupt Controller.
//!
//! Sources assert lines, every consumer (a context, or a hart at a given privilege
//! level) sees a single output line, and software walks the claim/complete handshake
//! to service interrupts in priority order with LIFO nesting.

pub mod consumer;
pub mod controller;
pub mod registers;
pub mod source;

pub use consumer::{ConsumerView, PendingTracker};
pub use controller::{ArbitrationController, ControllerConfig};
pub use plicsim_config::PendingMode;
pub use registers::{PlicPeripheral, RegisterLayout};
pub use source::{InterruptSource, SourceArena, DEFAULT_PRIORITY};

/// Rejected arbitration requests. None of them escape the controller; they are logged
/// and the operation degrades to a no-op.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlicError {
    #[error("Invalid interrupt source {irq}. Valid sources are 1..={max}")]
    InvalidSource { irq: u32, max: u32 },
    #[error("Invalid consumer {consumer}. Valid consumers are 0..{count}")]
    InvalidConsumer { consumer: u32, count: u32 },
    #[error("Trying to complete irq {irq} @ consumer #{consumer}, there are no active interrupts left")]
    NothingActive { consumer: u32, irq: u32 },
    #[error("Trying to complete irq {irq} @ consumer #{consumer}, but {active} is the active one")]
    NotTopOfStack {
        consumer: u32,
        irq: u32,
        active: u32,
    },
}

/// RISC-V privilege levels; the discriminant is the consumer sub-channel offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Hypervisor = 2,
    Machine = 3,
}

impl PrivilegeLevel {
    pub const ALL: [PrivilegeLevel; 4] = [
        PrivilegeLevel::User,
        PrivilegeLevel::Supervisor,
        PrivilegeLevel::Hypervisor,
        PrivilegeLevel::Machine,
    ];
}

/// Consumer id of a hart at a given privilege level: `4 * hart + level`.
pub fn consumer_id(hart: u32, level: PrivilegeLevel) -> u32 {
    hart * plicsim_config::PRIVILEGE_LEVELS_PER_HART + level as u32
}

/// Inverse of [`consumer_id`].
pub fn target_of(consumer: u32) -> (u32, PrivilegeLevel) {
    let levels = plicsim_config::PRIVILEGE_LEVELS_PER_HART;
    (
        consumer / levels,
        PrivilegeLevel::ALL[(consumer % levels) as usize],
    )
}
