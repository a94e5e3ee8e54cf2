// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::signals::InterruptLine;
use crate::SimResult;

const LEVEL: u64 = 0x0;
const SET: u64 = 0x4;
const CLEAR: u64 = 0x8;

/// Software-driven interrupt source.
///
/// LEVEL (0x0) reads and writes the line, SET (0x4) raises it on a written 1,
/// CLEAR (0x8) lowers it on a written 1.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct IrqLine {
    asserted: bool,
}

impl IrqLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&mut self) {
        self.asserted = true;
    }

    pub fn lower(&mut self) {
        self.asserted = false;
    }

    pub fn line(&self) -> InterruptLine {
        let mut line = InterruptLine::new();
        if self.asserted {
            line.assert();
        }
        line
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            LEVEL => self.asserted as u32,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            LEVEL => self.asserted = value & 1 != 0,
            SET if value & 1 != 0 => self.raise(),
            CLEAR if value & 1 != 0 => self.lower(),
            SET | CLEAR => {}
            _ => tracing::warn!("IrqLine: write to unknown offset {:#x}", offset),
        }
    }
}

impl crate::Peripheral for IrqLine {
    fn read(&self, offset: u64) -> SimResult<u8> {
        let reg_offset = offset & !3;
        let byte_offset = (offset % 4) as u32;
        let reg_val = self.read_reg(reg_offset);
        Ok(((reg_val >> (byte_offset * 8)) & 0xFF) as u8)
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        let reg_offset = offset & !3;
        let byte_offset = (offset % 4) as u32;
        let mut reg_val = self.read_reg(reg_offset);

        let mask = 0xFF << (byte_offset * 8);
        reg_val &= !mask;
        reg_val |= (value as u32) << (byte_offset * 8);

        self.write_reg(reg_offset, reg_val);
        Ok(())
    }

    fn tick(&mut self) -> crate::PeripheralTickResult {
        crate::PeripheralTickResult {
            irq: self.asserted,
        }
    }

    fn reset(&mut self) {
        self.asserted = false;
    }

    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn std::any::Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn restore(&mut self, state: serde_json::Value) -> SimResult<()> {
        *self = serde_json::from_value(state)
            .map_err(|e| crate::SimulationError::SnapshotMismatch(e.to_string()))?;
        Ok(())
    }
}
