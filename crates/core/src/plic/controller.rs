// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::consumer::ConsumerView;
use super::source::SourceArena;
use super::PlicError;
use crate::interrupt::InterruptController;
use crate::signals::{GpioLine, IrqSink};
use crate::snapshot::{ConsumerSnapshot, PlicSnapshot, SourceSnapshot};
use crate::{SimResult, SimulationError};
use plicsim_config::{PendingMode, PlicDescriptor, MAX_CONSUMERS, MAX_SOURCES};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub sources: u32,
    pub consumers: u32,
    pub mode: PendingMode,
    pub priorities_enabled: bool,
    pub forced_consumer: Option<u32>,
}

impl Default for ControllerConfig {
    /// One hart with all four privilege sub-channels and 31 sources.
    fn default() -> Self {
        Self {
            sources: 31,
            consumers: plicsim_config::PRIVILEGE_LEVELS_PER_HART,
            mode: PendingMode::default(),
            priorities_enabled: true,
            forced_consumer: None,
        }
    }
}

impl From<&PlicDescriptor> for ControllerConfig {
    fn from(desc: &PlicDescriptor) -> Self {
        Self {
            sources: desc.sources,
            consumers: desc.consumers(),
            mode: desc.pending_mode,
            priorities_enabled: desc.priorities_enabled,
            forced_consumer: desc.forced_consumer,
        }
    }
}

#[derive(Debug)]
struct PlicState {
    sources: SourceArena,
    consumers: Vec<ConsumerView>,
    forced: Option<u32>,
}

impl PlicState {
    fn output_lines(&self) -> Vec<bool> {
        self.consumers.iter().map(ConsumerView::output_line).collect()
    }

    fn recompute_all(&mut self) {
        let forced = self.forced;
        for consumer in self.consumers.iter_mut() {
            consumer.recompute_output_line(&self.sources, forced);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_rejected<T: Default>(result: Result<T, PlicError>) -> T {
    result.unwrap_or_else(|e| {
        tracing::error!("{}", e);
        T::default()
    })
}

/// The arbitration engine: every source, every consumer view, and the GPIO sinks
/// attached to each consumer's output line.
///
/// All operations take `&self`; state lives behind a single mutex so claim, complete and
/// line changes are each one critical section.
#[derive(Debug)]
pub struct ArbitrationController {
    state: Mutex<PlicState>,
    /// Locked before `state` is released whenever lines change, so sinks observe
    /// transitions in commit order.
    delivery: Mutex<Vec<Vec<Arc<dyn IrqSink>>>>,
    lines: Vec<Arc<GpioLine>>,
    source_count: u32,
    consumer_count: u32,
    mode: PendingMode,
    priorities_enabled: bool,
}

impl ArbitrationController {
    pub fn new(config: ControllerConfig) -> SimResult<Self> {
        if config.sources == 0 || config.sources > MAX_SOURCES {
            return Err(SimulationError::InvalidConfiguration(format!(
                "PLIC supports 1..={} sources, got {}",
                MAX_SOURCES, config.sources
            )));
        }
        if config.consumers == 0 || config.consumers > MAX_CONSUMERS {
            return Err(SimulationError::InvalidConfiguration(format!(
                "PLIC supports 1..={} consumers, got {}",
                MAX_CONSUMERS, config.consumers
            )));
        }

        let lines: Vec<Arc<GpioLine>> = (0..config.consumers)
            .map(|_| Arc::new(GpioLine::new()))
            .collect();
        let delivery = lines
            .iter()
            .map(|line| vec![line.clone() as Arc<dyn IrqSink>])
            .collect();

        let state = PlicState {
            sources: SourceArena::new(config.sources),
            consumers: (0..config.consumers)
                .map(|id| ConsumerView::new(id, config.mode))
                .collect(),
            forced: config.forced_consumer,
        };

        tracing::debug!(
            sources = config.sources,
            consumers = config.consumers,
            "Created PLIC ({:?}, priorities {})",
            config.mode,
            if config.priorities_enabled { "enabled" } else { "disabled" }
        );

        Ok(Self {
            state: Mutex::new(state),
            delivery: Mutex::new(delivery),
            lines,
            source_count: config.sources,
            consumer_count: config.consumers,
            mode: config.mode,
            priorities_enabled: config.priorities_enabled,
        })
    }

    pub fn from_descriptor(desc: &PlicDescriptor) -> SimResult<Self> {
        Self::new(ControllerConfig::from(desc))
    }

    pub fn number_of_sources(&self) -> u32 {
        self.source_count
    }

    pub fn number_of_consumers(&self) -> u32 {
        self.consumer_count
    }

    pub fn mode(&self) -> PendingMode {
        self.mode
    }

    pub fn priorities_enabled(&self) -> bool {
        self.priorities_enabled
    }

    fn check_source(&self, irq: u32) -> Result<(), PlicError> {
        if irq == 0 || irq > self.source_count {
            return Err(PlicError::InvalidSource {
                irq,
                max: self.source_count,
            });
        }
        Ok(())
    }

    /// Enable words past the last one holding a source bit are rejected.
    fn check_enable_word(&self, word: u32) -> Result<(), PlicError> {
        if word > self.source_count / 32 {
            return Err(PlicError::InvalidSource {
                irq: word.saturating_mul(32),
                max: self.source_count,
            });
        }
        Ok(())
    }

    fn check_consumer(&self, consumer: u32) -> Result<usize, PlicError> {
        if consumer >= self.consumer_count {
            return Err(PlicError::InvalidConsumer {
                consumer,
                count: self.consumer_count,
            });
        }
        Ok(consumer as usize)
    }

    fn state(&self) -> MutexGuard<'_, PlicState> {
        lock(&self.state)
    }

    /// Runs `op` under the state lock, recomputes every consumer, and pushes the
    /// output lines that changed to their sinks.
    fn commit<R>(&self, op: impl FnOnce(&mut PlicState) -> R) -> R {
        let mut state = self.state();
        let before = state.output_lines();
        let result = op(&mut state);
        state.recompute_all();

        let changes: Vec<(usize, bool)> = state
            .output_lines()
            .into_iter()
            .enumerate()
            .filter(|&(i, level)| before[i] != level)
            .collect();
        if changes.is_empty() {
            return result;
        }

        let sinks = lock(&self.delivery);
        drop(state);
        for (consumer, level) in changes {
            tracing::trace!(consumer, "Output line {}", if level { "raised" } else { "lowered" });
            for sink in &sinks[consumer] {
                sink.set(level);
            }
        }
        result
    }

    pub fn reset(&self) {
        tracing::debug!("Resetting PLIC");
        self.commit(|state| {
            for source in state.sources.iter_mut() {
                source.reset();
            }
            let PlicState {
                sources,
                consumers,
                forced,
            } = state;
            for consumer in consumers.iter_mut() {
                consumer.reset(sources, *forced);
            }
        });
    }

    pub fn try_set_source_level(&self, irq: u32, level: bool) -> Result<(), PlicError> {
        self.check_source(irq)?;
        self.commit(|state| {
            let PlicState {
                sources,
                consumers,
                forced,
            } = state;
            let rising = sources.get_mut(irq).is_some_and(|s| s.set_level(level));
            if rising {
                for consumer in consumers.iter_mut() {
                    consumer.mark_pending(sources, irq, *forced);
                }
            }
        });
        Ok(())
    }

    /// Drives the input line of `irq`. Only a rising edge makes the source pending.
    pub fn set_source_level(&self, irq: u32, level: bool) {
        log_rejected(self.try_set_source_level(irq, level))
    }

    pub fn source_level(&self, irq: u32) -> bool {
        self.state().sources.get(irq).is_some_and(|s| s.level())
    }

    pub fn try_set_source_priority(&self, irq: u32, priority: u32) -> Result<(), PlicError> {
        self.check_source(irq)?;
        self.commit(|state| {
            if let Some(source) = state.sources.get_mut(irq) {
                source.set_priority(priority);
            }
        });
        Ok(())
    }

    pub fn set_source_priority(&self, irq: u32, priority: u32) {
        log_rejected(self.try_set_source_priority(irq, priority))
    }

    pub fn source_priority(&self, irq: u32) -> u32 {
        log_rejected(
            self.check_source(irq)
                .map(|_| self.state().sources.priority(irq)),
        )
    }

    pub fn try_enable_source(
        &self,
        consumer: u32,
        irq: u32,
        enabled: bool,
    ) -> Result<(), PlicError> {
        let index = self.check_consumer(consumer)?;
        self.check_source(irq)?;
        self.commit(|state| {
            let PlicState {
                sources,
                consumers,
                forced,
            } = state;
            consumers[index].enable_source(sources, irq, enabled, *forced);
        });
        Ok(())
    }

    pub fn enable_source(&self, consumer: u32, irq: u32, enabled: bool) {
        log_rejected(self.try_enable_source(consumer, irq, enabled))
    }

    pub fn is_source_enabled(&self, consumer: u32, irq: u32) -> bool {
        log_rejected(
            self.check_consumer(consumer)
                .map(|index| self.state().consumers[index].is_enabled(irq)),
        )
    }

    /// Applies a 32-bit enable bitmap for sources `32 * word .. 32 * word + 31` in one step.
    pub fn write_enable_word(&self, consumer: u32, word: u32, value: u32) {
        let index = match self
            .check_consumer(consumer)
            .and_then(|index| self.check_enable_word(word).map(|()| index))
        {
            Ok(index) => index,
            Err(e) => {
                tracing::error!("{}", e);
                return;
            }
        };
        let max = self.source_count;
        self.commit(|state| {
            let PlicState {
                sources,
                consumers,
                forced,
            } = state;
            let view = &mut consumers[index];
            for bit in 0..32u32 {
                let irq = word * 32 + bit;
                let enabled = value & (1 << bit) != 0;
                if !sources.contains(irq) {
                    if enabled {
                        tracing::error!("{}", PlicError::InvalidSource { irq, max });
                    }
                    continue;
                }
                if view.is_enabled(irq) != enabled {
                    view.enable_source(sources, irq, enabled, *forced);
                }
            }
        });
    }

    pub fn read_enable_word(&self, consumer: u32, word: u32) -> u32 {
        let index = match self
            .check_consumer(consumer)
            .and_then(|index| self.check_enable_word(word).map(|()| index))
        {
            Ok(index) => index,
            Err(e) => {
                tracing::error!("{}", e);
                return 0;
            }
        };
        let state = self.state();
        let view = &state.consumers[index];
        (0..32u32)
            .filter(|bit| view.is_enabled(word * 32 + bit))
            .fold(0, |acc, bit| acc | (1 << bit))
    }

    pub fn try_claim(&self, consumer: u32) -> Result<u32, PlicError> {
        let index = self.check_consumer(consumer)?;
        Ok(self.commit(|state| {
            let PlicState {
                sources,
                consumers,
                forced,
            } = state;
            consumers[index].claim(sources, *forced)
        }))
    }

    /// Acknowledges the best pending interrupt of `consumer`. Returns 0 if there is none.
    pub fn claim(&self, consumer: u32) -> u32 {
        log_rejected(self.try_claim(consumer))
    }

    pub fn try_complete(&self, consumer: u32, irq: u32) -> Result<(), PlicError> {
        let index = self.check_consumer(consumer)?;
        self.check_source(irq)?;
        self.commit(|state| {
            let PlicState {
                sources,
                consumers,
                forced,
            } = state;
            consumers[index].complete(sources, irq, *forced)
        })
    }

    /// Ends the handling of `irq`, which must be the most recently claimed interrupt.
    pub fn complete(&self, consumer: u32, irq: u32) {
        log_rejected(self.try_complete(consumer, irq))
    }

    /// Restricts delivery to a single consumer; `None` restores normal routing.
    ///
    /// An id with no consumer behind it mutes every consumer.
    pub fn set_forced_consumer(&self, consumer: Option<u32>) {
        match consumer {
            Some(id) => tracing::debug!("Forcing all interrupts to consumer #{}", id),
            None => tracing::debug!("Disabling forced consumer"),
        }
        self.commit(|state| state.forced = consumer);
    }

    pub fn forced_consumer(&self) -> Option<u32> {
        self.state().forced
    }

    pub fn set_priority_threshold(&self, consumer: u32, value: u32) {
        if let Err(e) = self.check_consumer(consumer) {
            tracing::error!("{}", e);
            return;
        }
        if value != 0 && self.priorities_enabled {
            tracing::warn!(
                consumer,
                "Setting priority threshold {} is not supported, the value is ignored",
                value
            );
        }
    }

    pub fn priority_threshold(&self, consumer: u32) -> u32 {
        if let Err(e) = self.check_consumer(consumer) {
            tracing::error!("{}", e);
        }
        0
    }

    pub fn output_line(&self, consumer: u32) -> bool {
        match self.check_consumer(consumer) {
            Ok(index) => self.state().consumers[index].output_line(),
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        }
    }

    /// The sink mirroring `consumer`'s output line.
    pub fn line(&self, consumer: u32) -> Option<Arc<GpioLine>> {
        self.lines.get(consumer as usize).cloned()
    }

    /// Claimed but not yet completed interrupts, oldest first.
    pub fn active_interrupts(&self, consumer: u32) -> Vec<u32> {
        match self.check_consumer(consumer) {
            Ok(index) => self.state().consumers[index].active_interrupts().to_vec(),
            Err(e) => {
                tracing::error!("{}", e);
                Vec::new()
            }
        }
    }

    pub fn pending_sources(&self, consumer: u32) -> Vec<u32> {
        match self.check_consumer(consumer) {
            Ok(index) => {
                let state = self.state();
                state.consumers[index].pending_sources(&state.sources)
            }
            Err(e) => {
                tracing::error!("{}", e);
                Vec::new()
            }
        }
    }

    /// Whether `irq` is waiting to be claimed by at least one consumer.
    pub fn is_source_pending(&self, irq: u32) -> bool {
        let state = self.state();
        let Some(source) = state.sources.get(irq) else {
            return false;
        };
        state.consumers.iter().any(|c| c.is_pending(source))
    }

    /// Attaches another sink to `consumer`'s output line. It receives the current level
    /// right away.
    pub fn connect(&self, consumer: u32, sink: Arc<dyn IrqSink>) {
        let index = match self.check_consumer(consumer) {
            Ok(index) => index,
            Err(e) => {
                tracing::error!("{}", e);
                return;
            }
        };
        let state = self.state();
        let level = state.consumers[index].output_line();
        let mut sinks = lock(&self.delivery);
        drop(state);
        sink.set(level);
        sinks[index].push(sink);
    }

    pub fn snapshot(&self) -> PlicSnapshot {
        let state = self.state();
        PlicSnapshot {
            mode: self.mode,
            forced_consumer: state.forced,
            sources: state
                .sources
                .iter()
                .map(|s| SourceSnapshot {
                    id: s.id(),
                    priority: s.priority(),
                    level: s.level(),
                    pending: s.is_pending(),
                })
                .collect(),
            consumers: state
                .consumers
                .iter()
                .map(|c| ConsumerSnapshot {
                    id: c.id(),
                    enabled: c.enabled_sources().collect(),
                    pending: c.pending_sources(&state.sources),
                    active: c.active_interrupts().to_vec(),
                    output_line: c.output_line(),
                })
                .collect(),
        }
    }

    fn validate_snapshot(&self, snapshot: &PlicSnapshot) -> SimResult<()> {
        let mismatch = |msg: String| Err(SimulationError::SnapshotMismatch(msg));

        if snapshot.mode != self.mode {
            return mismatch(format!(
                "pending mode {:?} does not match {:?}",
                snapshot.mode, self.mode
            ));
        }
        if snapshot.sources.len() != self.source_count as usize {
            return mismatch(format!(
                "snapshot has {} sources, controller has {}",
                snapshot.sources.len(),
                self.source_count
            ));
        }
        if snapshot.consumers.len() != self.consumer_count as usize {
            return mismatch(format!(
                "snapshot has {} consumers, controller has {}",
                snapshot.consumers.len(),
                self.consumer_count
            ));
        }
        for (i, source) in snapshot.sources.iter().enumerate() {
            if source.id as usize != i + 1 {
                return mismatch(format!("source #{} found in slot {}", source.id, i + 1));
            }
        }
        for (i, consumer) in snapshot.consumers.iter().enumerate() {
            if consumer.id as usize != i {
                return mismatch(format!("consumer #{} found in slot {}", consumer.id, i));
            }
            let ids = consumer
                .enabled
                .iter()
                .chain(&consumer.pending)
                .chain(&consumer.active);
            for &irq in ids {
                if self.check_source(irq).is_err() {
                    return mismatch(format!(
                        "consumer #{} refers to invalid source {}",
                        consumer.id, irq
                    ));
                }
            }
            let unique: BTreeSet<u32> = consumer.active.iter().copied().collect();
            if unique.len() != consumer.active.len() {
                return mismatch(format!(
                    "consumer #{} has duplicate active interrupts",
                    consumer.id
                ));
            }
        }
        Ok(())
    }

    /// Replaces the whole arbitration state. Nothing is modified if the snapshot does not
    /// fit this controller.
    pub fn restore(&self, snapshot: &PlicSnapshot) -> SimResult<()> {
        self.validate_snapshot(snapshot)?;
        self.commit(|state| {
            for (source, saved) in state.sources.iter_mut().zip(&snapshot.sources) {
                source.load(saved.priority, saved.level, saved.pending);
            }
            for (view, saved) in state.consumers.iter_mut().zip(&snapshot.consumers) {
                view.load(&saved.enabled, &saved.pending, &saved.active);
            }
            state.forced = snapshot.forced_consumer;
        });
        tracing::debug!("Restored PLIC state");
        Ok(())
    }
}

impl InterruptController for ArbitrationController {
    fn set_source_level(&self, irq: u32, level: bool) {
        ArbitrationController::set_source_level(self, irq, level)
    }

    fn claim(&self, consumer: u32) -> u32 {
        ArbitrationController::claim(self, consumer)
    }

    fn complete(&self, consumer: u32, irq: u32) {
        ArbitrationController::complete(self, consumer, irq)
    }

    fn output_line(&self, consumer: u32) -> bool {
        ArbitrationController::output_line(self, consumer)
    }
}
