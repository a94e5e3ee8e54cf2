// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Memory-mapped register block in front of an [`ArbitrationController`].

use super::controller::ArbitrationController;
use super::{consumer_id, PrivilegeLevel};
use crate::snapshot::PlicSnapshot;
use crate::{Peripheral, SimResult, SimulationError};
use plicsim_config::LayoutKind;
use std::sync::Arc;

/// Priority registers implement three bits.
const PRIORITY_MASK: u32 = 0x7;

/// Where each register family lives inside the PLIC window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterLayout {
    pub priority_base: u64,
    pub pending_base: u64,
    pub enable_base: u64,
    /// Distance between the enable bitmaps of consecutive contexts.
    pub enable_stride: u64,
    /// Bytes reserved for one context's enable bitmap.
    pub enable_span: u64,
    pub context_base: u64,
    pub context_stride: u64,
    pub threshold_offset: u64,
    pub claim_offset: u64,
    pub size: u64,
    /// Context index -> consumer id.
    pub contexts: Vec<u32>,
}

impl RegisterLayout {
    /// RISC-V PLIC 1.0: context `2h` is hart `h` in machine mode, `2h + 1` in supervisor mode.
    pub fn riscv_plic(harts: u32) -> Self {
        let contexts = (0..harts)
            .flat_map(|h| {
                [
                    consumer_id(h, PrivilegeLevel::Machine),
                    consumer_id(h, PrivilegeLevel::Supervisor),
                ]
            })
            .collect();
        Self::riscv_offsets(contexts)
    }

    /// SiFive FU540 style: hart 0 is a monitor core without supervisor mode.
    pub fn sifive(harts: u32) -> Self {
        let mut contexts = vec![consumer_id(0, PrivilegeLevel::Machine)];
        for h in 1..harts {
            contexts.push(consumer_id(h, PrivilegeLevel::Machine));
            contexts.push(consumer_id(h, PrivilegeLevel::Supervisor));
        }
        Self::riscv_offsets(contexts)
    }

    /// OpenTitan: a compact block per hart, machine mode only.
    pub fn opentitan(harts: u32) -> Self {
        Self {
            priority_base: 0x18,
            pending_base: 0x0,
            enable_base: 0x200,
            enable_stride: 0x1000,
            enable_span: 0xC,
            context_base: 0x200,
            context_stride: 0x1000,
            threshold_offset: 0xC,
            claim_offset: 0x10,
            size: 0x1000 * u64::from(harts.max(1)),
            contexts: (0..harts)
                .map(|h| consumer_id(h, PrivilegeLevel::Machine))
                .collect(),
        }
    }

    fn riscv_offsets(contexts: Vec<u32>) -> Self {
        Self {
            priority_base: 0x0,
            pending_base: 0x1000,
            enable_base: 0x2000,
            enable_stride: 0x80,
            enable_span: 0x80,
            context_base: 0x20_0000,
            context_stride: 0x1000,
            threshold_offset: 0x0,
            claim_offset: 0x4,
            size: 0x400_0000,
            contexts,
        }
    }

    pub fn from_kind(kind: LayoutKind, harts: u32) -> Self {
        match kind {
            LayoutKind::RiscvPlic => Self::riscv_plic(harts),
            LayoutKind::Sifive => Self::sifive(harts),
            LayoutKind::OpenTitan => Self::opentitan(harts),
        }
    }

    /// 32-bit words needed for one bit per source, source 0 included.
    fn bitmap_words(sources: u32) -> u64 {
        u64::from(sources + 1).div_ceil(32)
    }

    fn decode(&self, offset: u64, sources: u32) -> Option<Register> {
        let offset = offset & !3;
        let words = Self::bitmap_words(sources);

        if offset >= self.priority_base && offset < self.priority_base + 4 * u64::from(sources + 1) {
            return Some(Register::Priority(((offset - self.priority_base) / 4) as u32));
        }
        if offset >= self.pending_base && offset < self.pending_base + 4 * words {
            return Some(Register::Pending(((offset - self.pending_base) / 4) as u32));
        }
        if offset >= self.enable_base {
            let rel = offset - self.enable_base;
            let index = (rel / self.enable_stride) as usize;
            let within = rel % self.enable_stride;
            if within < 4 * words {
                if let Some(&consumer) = self.contexts.get(index) {
                    return Some(Register::Enable {
                        consumer,
                        word: (within / 4) as u32,
                    });
                }
            }
        }
        if offset >= self.context_base {
            let rel = offset - self.context_base;
            let index = (rel / self.context_stride) as usize;
            let within = rel % self.context_stride;
            if let Some(&consumer) = self.contexts.get(index) {
                if within == self.threshold_offset {
                    return Some(Register::Threshold(consumer));
                }
                if within == self.claim_offset {
                    return Some(Register::ClaimComplete(consumer));
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    Priority(u32),
    Pending(u32),
    Enable { consumer: u32, word: u32 },
    Threshold(u32),
    ClaimComplete(u32),
}

/// Bus-facing PLIC. Accesses are 32-bit; byte accesses address the containing word.
#[derive(Debug)]
pub struct PlicPeripheral {
    controller: Arc<ArbitrationController>,
    layout: RegisterLayout,
}

impl PlicPeripheral {
    pub fn new(controller: Arc<ArbitrationController>, layout: RegisterLayout) -> SimResult<Self> {
        let sources = controller.number_of_sources();
        let needed = 4 * RegisterLayout::bitmap_words(sources);
        if needed > layout.enable_span {
            return Err(SimulationError::InvalidConfiguration(format!(
                "{} sources need {:#x} bytes of enable bits, layout provides {:#x}",
                sources, needed, layout.enable_span
            )));
        }
        if let Some(&consumer) = layout
            .contexts
            .iter()
            .find(|&&c| c >= controller.number_of_consumers())
        {
            return Err(SimulationError::InvalidConfiguration(format!(
                "Register layout addresses consumer #{} but the controller has {}",
                consumer,
                controller.number_of_consumers()
            )));
        }
        Ok(Self { controller, layout })
    }

    pub fn controller(&self) -> &Arc<ArbitrationController> {
        &self.controller
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    fn decode(&self, offset: u64) -> Option<Register> {
        self.layout
            .decode(offset, self.controller.number_of_sources())
    }

    fn read_register(&self, register: Register) -> u32 {
        match register {
            Register::Priority(0) => 0,
            Register::Priority(irq) => self.controller.source_priority(irq),
            Register::Pending(word) => (0..32u32)
                .filter(|bit| self.controller.is_source_pending(word * 32 + bit))
                .fold(0, |acc, bit| acc | (1 << bit)),
            Register::Enable { consumer, word } => self.controller.read_enable_word(consumer, word),
            Register::Threshold(consumer) => self.controller.priority_threshold(consumer),
            Register::ClaimComplete(consumer) => self.controller.claim(consumer),
        }
    }

    /// Current value without read side effects.
    fn peek_word(&self, offset: u64) -> u32 {
        match self.decode(offset) {
            Some(Register::ClaimComplete(_)) | None => 0,
            Some(register) => self.read_register(register),
        }
    }

    fn write_register(&self, register: Register, value: u32) {
        match register {
            Register::Priority(0) => {
                let priority = value & PRIORITY_MASK;
                if priority != 0 {
                    tracing::warn!("Trying to set priority {} to source 0, which is illegal", priority);
                }
            }
            Register::Priority(irq) => {
                let priority = value & PRIORITY_MASK;
                if self.controller.priorities_enabled() {
                    self.controller.set_source_priority(irq, priority);
                } else {
                    tracing::trace!(source = irq, "Priorities are disabled, ignoring priority {}", priority);
                }
            }
            Register::Pending(word) => {
                tracing::warn!("Write to read-only pending word {} ({:#x})", word, value);
            }
            Register::Enable { consumer, word } => {
                self.controller.write_enable_word(consumer, word, value)
            }
            Register::Threshold(consumer) => self.controller.set_priority_threshold(consumer, value),
            Register::ClaimComplete(consumer) => self.controller.complete(consumer, value),
        }
    }
}

impl Peripheral for PlicPeripheral {
    fn read(&self, offset: u64) -> SimResult<u8> {
        let shift = (offset & 3) * 8;
        Ok((self.read_u32(offset & !3)? >> shift) as u8)
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        let shift = (offset & 3) * 8;
        let word = offset & !3;
        let current = self.peek_word(word);
        let merged = (current & !(0xFF << shift)) | (u32::from(value) << shift);
        self.write_u32(word, merged)
    }

    fn read_u32(&self, offset: u64) -> SimResult<u32> {
        match self.decode(offset) {
            Some(register) => Ok(self.read_register(register)),
            None => {
                tracing::warn!("Unhandled PLIC read at offset {:#x}", offset);
                Ok(0)
            }
        }
    }

    fn write_u32(&mut self, offset: u64, value: u32) -> SimResult<()> {
        match self.decode(offset) {
            Some(register) => self.write_register(register, value),
            None => tracing::warn!("Unhandled PLIC write at offset {:#x} ({:#x})", offset, value),
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.controller.reset();
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self.controller.snapshot()).unwrap_or_default()
    }

    fn restore(&mut self, state: serde_json::Value) -> SimResult<()> {
        let snapshot: PlicSnapshot = serde_json::from_value(state)
            .map_err(|e| SimulationError::SnapshotMismatch(e.to_string()))?;
        self.controller.restore(&snapshot)
    }
}
