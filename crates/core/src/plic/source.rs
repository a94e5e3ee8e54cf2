// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};

/// 1 is the default, lowest value. 0 means "never wins arbitration".
pub const DEFAULT_PRIORITY: u32 = 1;

/// State of a single interrupt-request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptSource {
    id: u32,
    priority: u32,
    level: bool,
    /// Asserted and not yet claimed since. Only consulted in level-sample mode.
    pending: bool,
}

impl InterruptSource {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            priority: DEFAULT_PRIORITY,
            level: false,
            pending: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn level(&self) -> bool {
        self.level
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Returns `true` on a false -> true transition.
    pub fn set_level(&mut self, level: bool) -> bool {
        if level == self.level {
            return false;
        }
        tracing::trace!(source = self.id, "Setting state to {} for source #{}", level, self.id);
        self.level = level;
        if level {
            self.set_pending(true);
        }
        level
    }

    pub fn set_priority(&mut self, priority: u32) {
        if priority == self.priority {
            return;
        }
        tracing::trace!(source = self.id, "Setting priority {} for source #{}", priority, self.id);
        self.priority = priority;
    }

    pub(crate) fn set_pending(&mut self, pending: bool) {
        if pending == self.pending {
            return;
        }
        tracing::trace!(source = self.id, "Setting pending status to {} for source #{}", pending, self.id);
        self.pending = pending;
    }

    pub fn reset(&mut self) {
        self.priority = DEFAULT_PRIORITY;
        self.level = false;
        self.pending = false;
    }

    pub(crate) fn load(&mut self, priority: u32, level: bool, pending: bool) {
        self.priority = priority;
        self.level = level;
        self.pending = pending;
    }
}

impl std::fmt::Display for InterruptSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "source #{} (priority: {}, level: {}, pending: {})",
            self.id, self.priority, self.level, self.pending
        )
    }
}

/// Fixed-size arena of sources addressed by id. Id 0 has no slot.
#[derive(Debug, Clone)]
pub struct SourceArena {
    sources: Vec<InterruptSource>,
}

impl SourceArena {
    pub fn new(count: u32) -> Self {
        Self {
            sources: (1..=count).map(InterruptSource::new).collect(),
        }
    }

    pub fn len(&self) -> u32 {
        self.sources.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        id != 0 && id <= self.len()
    }

    pub fn get(&self, id: u32) -> Option<&InterruptSource> {
        let index = id.checked_sub(1)?;
        self.sources.get(index as usize)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut InterruptSource> {
        let index = id.checked_sub(1)?;
        self.sources.get_mut(index as usize)
    }

    /// Priority of `id`, or 0 for ids without a slot.
    pub fn priority(&self, id: u32) -> u32 {
        self.get(id).map_or(0, InterruptSource::priority)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterruptSource> {
        self.sources.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InterruptSource> {
        self.sources.iter_mut()
    }
}
