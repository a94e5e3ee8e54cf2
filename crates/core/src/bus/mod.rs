// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::interrupt::InterruptBridge;
use crate::peripherals::irq_line::IrqLine;
use crate::plic::{ArbitrationController, PlicPeripheral, RegisterLayout};
use crate::signals::InterruptLine;
use crate::{Peripheral, SimResult, SimulationError};
use anyhow::Context;
use plicsim_config::{parse_size, BoardManifest};
use std::sync::Arc;

pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub irq: Option<u32>,
    pub dev: Box<dyn Peripheral>,
    /// Last level forwarded to the interrupt controller.
    line: InterruptLine,
}

impl PeripheralEntry {
    pub fn new(
        name: impl Into<String>,
        base: u64,
        size: u64,
        irq: Option<u32>,
        dev: Box<dyn Peripheral>,
    ) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            irq,
            dev,
            line: InterruptLine::new(),
        }
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

#[derive(Default)]
pub struct SystemBus {
    pub peripherals: Vec<PeripheralEntry>,
    pub plic: Option<Arc<ArbitrationController>>,
}

impl SystemBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a device window. Windows must not overlap.
    pub fn add_peripheral(&mut self, entry: PeripheralEntry) -> SimResult<()> {
        if entry.size == 0 {
            return Err(SimulationError::InvalidConfiguration(format!(
                "Peripheral '{}' has an empty window",
                entry.name
            )));
        }
        let end = entry.base.saturating_add(entry.size);
        if let Some(other) = self
            .peripherals
            .iter()
            .find(|p| entry.base < p.base.saturating_add(p.size) && p.base < end)
        {
            return Err(SimulationError::InvalidConfiguration(format!(
                "Peripheral '{}' at {:#x} overlaps '{}' at {:#x}",
                entry.name, entry.base, other.name, other.base
            )));
        }
        tracing::debug!(
            "Mapped '{}' at {:#x}..{:#x} (irq {:?})",
            entry.name,
            entry.base,
            end,
            entry.irq
        );
        self.peripherals.push(entry);
        Ok(())
    }

    /// Maps the PLIC register block and routes peripheral interrupt lines to it.
    pub fn attach_plic(&mut self, base: u64, size: u64, plic: PlicPeripheral) -> SimResult<()> {
        let controller = plic.controller().clone();
        self.add_peripheral(PeripheralEntry::new("plic", base, size, None, Box::new(plic)))?;
        self.plic = Some(controller);
        Ok(())
    }

    pub fn from_config(manifest: &BoardManifest) -> anyhow::Result<Self> {
        manifest.validate()?;
        let desc = &manifest.plic;

        let controller = Arc::new(
            ArbitrationController::from_descriptor(desc)
                .with_context(|| format!("Failed to create PLIC '{}'", desc.name))?,
        );
        let layout = RegisterLayout::from_kind(desc.layout, desc.harts);
        let size = match &desc.size {
            Some(size) => parse_size(size)?,
            None => layout.size,
        };
        let plic = PlicPeripheral::new(controller, layout)
            .with_context(|| format!("Invalid register layout for PLIC '{}'", desc.name))?;

        let mut bus = Self::new();
        bus.attach_plic(desc.base_address, size, plic)
            .with_context(|| format!("Failed to map PLIC '{}'", desc.name))?;

        for p_cfg in &manifest.peripherals {
            let dev: Box<dyn Peripheral> = match p_cfg.r#type.as_str() {
                "irq_line" => Box::new(IrqLine::new()),
                other => {
                    tracing::warn!(
                        "Unsupported peripheral type '{}' for id '{}'; skipping",
                        other,
                        p_cfg.id
                    );
                    continue;
                }
            };

            let size = if let Some(size) = &p_cfg.size {
                parse_size(size)?
            } else {
                0x1000 // Default 4KB page
            };

            bus.add_peripheral(PeripheralEntry::new(
                p_cfg.id.clone(),
                p_cfg.base_address,
                size,
                p_cfg.irq,
                dev,
            ))
            .with_context(|| format!("Failed to map peripheral '{}'", p_cfg.id))?;
        }

        Ok(bus)
    }

    fn find(&self, addr: u64) -> SimResult<(usize, u64)> {
        self.peripherals
            .iter()
            .position(|p| p.contains(addr))
            .map(|idx| (idx, addr - self.peripherals[idx].base))
            .ok_or(SimulationError::MemoryViolation(addr))
    }

    pub fn peripheral(&self, name: &str) -> Option<&PeripheralEntry> {
        self.peripherals.iter().find(|p| p.name == name)
    }

    pub fn peripheral_mut(&mut self, name: &str) -> Option<&mut PeripheralEntry> {
        self.peripherals.iter_mut().find(|p| p.name == name)
    }

    pub fn read_u8(&self, addr: u64) -> SimResult<u8> {
        let (idx, offset) = self.find(addr)?;
        self.peripherals[idx].dev.read(offset)
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()> {
        let (idx, offset) = self.find(addr)?;
        self.peripherals[idx].dev.write(offset, value)
    }

    /// Word read. Goes to the device as a single access when the whole word lies in
    /// one window, so read side effects (PLIC claim) fire once.
    pub fn read_u32(&self, addr: u64) -> SimResult<u32> {
        let (idx, offset) = self.find(addr)?;
        let p = &self.peripherals[idx];
        if offset + 4 <= p.size {
            return p.dev.read_u32(offset);
        }
        let b0 = self.read_u8(addr)? as u32;
        let b1 = self.read_u8(addr + 1)? as u32;
        let b2 = self.read_u8(addr + 2)? as u32;
        let b3 = self.read_u8(addr + 3)? as u32;
        Ok(b0 | (b1 << 8) | (b2 << 16) | (b3 << 24))
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        let (idx, offset) = self.find(addr)?;
        let p = &mut self.peripherals[idx];
        if offset + 4 <= p.size {
            return p.dev.write_u32(offset, value);
        }
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr + 1, ((value >> 8) & 0xFF) as u8)?;
        self.write_u8(addr + 2, ((value >> 16) & 0xFF) as u8)?;
        self.write_u8(addr + 3, ((value >> 24) & 0xFF) as u8)?;
        Ok(())
    }

    pub fn read_u16(&self, addr: u64) -> SimResult<u16> {
        let b0 = self.read_u8(addr)? as u16;
        let b1 = self.read_u8(addr + 1)? as u16;
        Ok(b0 | (b1 << 8))
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> SimResult<()> {
        self.write_u8(addr, (value & 0xFF) as u8)?;
        self.write_u8(addr + 1, ((value >> 8) & 0xFF) as u8)?;
        Ok(())
    }

    /// Ticks every device and forwards interrupt levels that changed to the PLIC.
    ///
    /// Returns the consumers whose output line is asserted afterwards.
    pub fn tick_peripherals(&mut self) -> Vec<u32> {
        for p in self.peripherals.iter_mut() {
            let res = p.dev.tick();
            let Some(irq) = p.irq else {
                continue;
            };
            if res.irq == p.line.is_asserted() {
                continue;
            }
            if res.irq {
                p.line.assert();
            } else {
                p.line.deassert();
            }
            match &self.plic {
                Some(plic) => {
                    tracing::debug!("Bus: '{}' drives source {} {}", p.name, irq, res.irq);
                    InterruptBridge::new(plic.as_ref()).update(irq, &p.line);
                }
                None => tracing::warn!("Bus: '{}' raised irq {} but no PLIC is attached", p.name, irq),
            }
        }

        let Some(plic) = &self.plic else {
            return Vec::new();
        };
        (0..plic.number_of_consumers())
            .filter(|&c| plic.output_line(c))
            .collect()
    }

    pub fn reset(&mut self) {
        tracing::debug!("Bus: resetting {} peripherals", self.peripherals.len());
        for p in self.peripherals.iter_mut() {
            p.dev.reset();
            p.line.deassert();
        }
    }
}
