// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::source::{InterruptSource, SourceArena};
use super::PlicError;
use plicsim_config::PendingMode;
use std::collections::BTreeSet;

/// How a consumer decides that a source is waiting to be claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingTracker {
    /// Ids latched on the rising edge; survive the source deasserting.
    EdgeCapture(BTreeSet<u32>),
    /// Derived from the live level and the source's own pending flag.
    LevelSample,
}

impl PendingTracker {
    pub fn new(mode: PendingMode) -> Self {
        match mode {
            PendingMode::EdgeCapture => PendingTracker::EdgeCapture(BTreeSet::new()),
            PendingMode::LevelSample => PendingTracker::LevelSample,
        }
    }

    pub fn mode(&self) -> PendingMode {
        match self {
            PendingTracker::EdgeCapture(_) => PendingMode::EdgeCapture,
            PendingTracker::LevelSample => PendingMode::LevelSample,
        }
    }

    fn mark_pending_if_live(&mut self, source: &InterruptSource) {
        if let PendingTracker::EdgeCapture(latched) = self {
            if source.level() {
                latched.insert(source.id());
            }
        }
    }

    fn is_pending(&self, source: &InterruptSource) -> bool {
        match self {
            PendingTracker::EdgeCapture(latched) => latched.contains(&source.id()),
            PendingTracker::LevelSample => source.level() && source.is_pending(),
        }
    }

    fn clear_pending(&mut self, source: &mut InterruptSource) {
        match self {
            PendingTracker::EdgeCapture(latched) => {
                latched.remove(&source.id());
            }
            PendingTracker::LevelSample => source.set_pending(false),
        }
    }

    fn restore_pending(&mut self, source: &mut InterruptSource, enabled: bool) {
        match self {
            PendingTracker::EdgeCapture(latched) => {
                if source.level() && enabled {
                    latched.insert(source.id());
                } else {
                    latched.remove(&source.id());
                }
            }
            PendingTracker::LevelSample => source.set_pending(source.level()),
        }
    }

    fn forget(&mut self, id: u32) {
        if let PendingTracker::EdgeCapture(latched) = self {
            latched.remove(&id);
        }
    }

    fn clear(&mut self) {
        if let PendingTracker::EdgeCapture(latched) = self {
            latched.clear();
        }
    }
}

/// Arbitration state of one consumer: a context, or a (hart, privilege level) target.
#[derive(Debug, Clone)]
pub struct ConsumerView {
    id: u32,
    enabled: BTreeSet<u32>,
    tracker: PendingTracker,
    /// Claimed but not completed, oldest first.
    active: Vec<u32>,
    output: bool,
}

impl ConsumerView {
    pub fn new(id: u32, mode: PendingMode) -> Self {
        Self {
            id,
            enabled: BTreeSet::new(),
            tracker: PendingTracker::new(mode),
            active: Vec::new(),
            output: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn output_line(&self) -> bool {
        self.output
    }

    pub fn active_interrupts(&self) -> &[u32] {
        &self.active
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = u32> + '_ {
        self.enabled.iter().copied()
    }

    pub fn is_enabled(&self, id: u32) -> bool {
        self.enabled.contains(&id)
    }

    pub fn is_pending(&self, source: &InterruptSource) -> bool {
        let id = source.id();
        self.enabled.contains(&id) && !self.active.contains(&id) && self.tracker.is_pending(source)
    }

    pub fn pending_sources(&self, sources: &SourceArena) -> Vec<u32> {
        self.enabled
            .iter()
            .filter_map(|&id| sources.get(id))
            .filter(|s| self.is_pending(s))
            .map(InterruptSource::id)
            .collect()
    }

    fn excluded_by(&self, forced: Option<u32>) -> bool {
        forced.is_some_and(|f| f != self.id)
    }

    pub fn enable_source(
        &mut self,
        sources: &SourceArena,
        id: u32,
        enabled: bool,
        forced: Option<u32>,
    ) {
        if enabled {
            if self.enabled.insert(id) && !self.active.contains(&id) {
                if let Some(source) = sources.get(id) {
                    self.tracker.mark_pending_if_live(source);
                }
            }
        } else {
            self.enabled.remove(&id);
            self.tracker.forget(id);
        }
        tracing::trace!(
            consumer = self.id,
            source = id,
            "{} source #{} @ {}",
            if enabled { "Enabling" } else { "Disabling" },
            id,
            self
        );
        self.recompute_output_line(sources, forced);
    }

    /// Latches a source that just asserted, if this consumer listens to it.
    pub fn mark_pending(&mut self, sources: &SourceArena, id: u32, forced: Option<u32>) {
        if self.enabled.contains(&id) && !self.active.contains(&id) {
            if let Some(source) = sources.get(id) {
                self.tracker.mark_pending_if_live(source);
            }
        }
        self.recompute_output_line(sources, forced);
    }

    /// Takes the highest-priority pending source (lowest id on ties). Returns 0 if none.
    pub fn claim(&mut self, sources: &mut SourceArena, forced: Option<u32>) -> u32 {
        let winner = if self.excluded_by(forced) {
            None
        } else {
            let mut best: Option<&InterruptSource> = None;
            for source in self.enabled.iter().filter_map(|&id| sources.get(id)) {
                if source.priority() == 0 || !self.is_pending(source) {
                    continue;
                }
                // `enabled` iterates in ascending id order, so only a strictly higher
                // priority displaces the current candidate.
                if best.map_or(true, |b| source.priority() > b.priority()) {
                    best = Some(source);
                }
            }
            best.map(InterruptSource::id)
        };

        let Some(id) = winner else {
            tracing::trace!(
                consumer = self.id,
                "There is no pending interrupt to acknowledge at the moment for {}",
                self
            );
            return 0;
        };

        if let Some(source) = sources.get_mut(id) {
            self.tracker.clear_pending(source);
        }
        self.active.push(id);
        tracing::trace!(consumer = self.id, source = id, "Acknowledging pending interrupt #{} @ {}", id, self);

        self.recompute_output_line(sources, forced);
        id
    }

    /// Releases the interrupt on top of the active stack.
    ///
    /// Anything other than the current top is a protocol violation and leaves the
    /// consumer untouched.
    pub fn complete(
        &mut self,
        sources: &mut SourceArena,
        id: u32,
        forced: Option<u32>,
    ) -> Result<(), PlicError> {
        tracing::trace!(consumer = self.id, source = id, "Completing irq {} at {}", id, self);

        match self.active.last() {
            None => {
                return Err(PlicError::NothingActive {
                    consumer: self.id,
                    irq: id,
                })
            }
            Some(&top) if top != id => {
                return Err(PlicError::NotTopOfStack {
                    consumer: self.id,
                    irq: id,
                    active: top,
                })
            }
            Some(_) => {}
        }
        self.active.pop();

        let enabled = self.enabled.contains(&id);
        if let Some(source) = sources.get_mut(id) {
            self.tracker.restore_pending(source, enabled);
        }
        self.recompute_output_line(sources, forced);
        Ok(())
    }

    /// Re-derives the output line. Returns the new level.
    pub fn recompute_output_line(&mut self, sources: &SourceArena, forced: Option<u32>) -> bool {
        let should_assert = if self.excluded_by(forced) {
            false
        } else {
            let current = self.active.last().map_or(0, |&top| sources.priority(top));
            self.enabled
                .iter()
                .filter_map(|&id| sources.get(id))
                .any(|s| s.priority() > current && self.is_pending(s))
        };
        self.output = should_assert;
        should_assert
    }

    pub fn reset(&mut self, sources: &SourceArena, forced: Option<u32>) {
        self.active.clear();
        self.enabled.clear();
        self.tracker.clear();
        self.recompute_output_line(sources, forced);
    }

    pub fn mode(&self) -> PendingMode {
        self.tracker.mode()
    }

    /// Replaces enable, latch and stack state wholesale. Callers validate the ids.
    pub(crate) fn load(&mut self, enabled: &[u32], latched: &[u32], active: &[u32]) {
        self.enabled = enabled.iter().copied().collect();
        self.tracker.clear();
        if let PendingTracker::EdgeCapture(set) = &mut self.tracker {
            set.extend(
                latched
                    .iter()
                    .copied()
                    .filter(|id| self.enabled.contains(id) && !active.contains(id)),
            );
        }
        self.active = active.to_vec();
    }
}

impl std::fmt::Display for ConsumerView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[consumer #{}]", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(priorities: &[u32]) -> SourceArena {
        let mut sources = SourceArena::new(priorities.len() as u32);
        for (i, p) in priorities.iter().enumerate() {
            if let Some(s) = sources.get_mut(i as u32 + 1) {
                s.set_priority(*p);
            }
        }
        sources
    }

    fn assert_source(sources: &mut SourceArena, view: &mut ConsumerView, id: u32) {
        if let Some(s) = sources.get_mut(id) {
            s.set_level(true);
        }
        view.mark_pending(sources, id, None);
    }

    #[test]
    fn test_enable_latches_already_asserted_source() {
        let mut sources = arena(&[1, 1]);
        sources.get_mut(2).unwrap().set_level(true);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);

        view.enable_source(&sources, 2, true, None);
        assert!(view.output_line());
        assert_eq!(view.pending_sources(&sources), vec![2]);

        view.enable_source(&sources, 2, false, None);
        assert!(!view.output_line());
        assert!(view.pending_sources(&sources).is_empty());
    }

    #[test]
    fn test_mark_pending_ignores_disabled_source() {
        let mut sources = arena(&[1, 1]);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);
        view.enable_source(&sources, 1, true, None);

        assert_source(&mut sources, &mut view, 2);
        assert!(!view.output_line());
        assert_eq!(view.claim(&mut sources, None), 0);
    }

    #[test]
    fn test_edge_capture_survives_deassert() {
        let mut sources = arena(&[3]);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);
        view.enable_source(&sources, 1, true, None);
        assert_source(&mut sources, &mut view, 1);

        sources.get_mut(1).unwrap().set_level(false);
        view.recompute_output_line(&sources, None);
        assert!(view.output_line());
        assert_eq!(view.claim(&mut sources, None), 1);
    }

    #[test]
    fn test_level_sample_follows_live_level() {
        let mut sources = arena(&[3]);
        let mut view = ConsumerView::new(0, PendingMode::LevelSample);
        view.enable_source(&sources, 1, true, None);
        assert_source(&mut sources, &mut view, 1);
        assert!(view.output_line());

        sources.get_mut(1).unwrap().set_level(false);
        view.recompute_output_line(&sources, None);
        assert!(!view.output_line());
        assert_eq!(view.claim(&mut sources, None), 0);
    }

    #[test]
    fn test_claim_prefers_priority_then_lowest_id() {
        let mut sources = arena(&[2, 5, 5, 1]);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);
        for id in 1..=4 {
            view.enable_source(&sources, id, true, None);
            assert_source(&mut sources, &mut view, id);
        }
        assert_eq!(view.claim(&mut sources, None), 2);
        assert_eq!(view.active_interrupts(), &[2]);
    }

    #[test]
    fn test_priority_zero_never_wins() {
        let mut sources = arena(&[0]);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);
        view.enable_source(&sources, 1, true, None);
        assert_source(&mut sources, &mut view, 1);
        assert!(!view.output_line());
        assert_eq!(view.claim(&mut sources, None), 0);
    }

    #[test]
    fn test_complete_out_of_order_leaves_stack() {
        let mut sources = arena(&[1, 2]);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);
        view.enable_source(&sources, 1, true, None);
        view.enable_source(&sources, 2, true, None);
        assert_source(&mut sources, &mut view, 1);
        assert_eq!(view.claim(&mut sources, None), 1);
        assert_source(&mut sources, &mut view, 2);
        assert!(view.output_line(), "higher priority preempts");
        assert_eq!(view.claim(&mut sources, None), 2);

        let err = view.complete(&mut sources, 1, None).unwrap_err();
        assert_eq!(
            err,
            PlicError::NotTopOfStack {
                consumer: 0,
                irq: 1,
                active: 2
            }
        );
        assert_eq!(view.active_interrupts(), &[1, 2]);

        view.complete(&mut sources, 2, None).unwrap();
        view.complete(&mut sources, 1, None).unwrap();
        assert!(view.active_interrupts().is_empty());
    }

    #[test]
    fn test_complete_on_empty_stack() {
        let mut sources = arena(&[1]);
        let mut view = ConsumerView::new(4, PendingMode::LevelSample);
        assert_eq!(
            view.complete(&mut sources, 1, None),
            Err(PlicError::NothingActive {
                consumer: 4,
                irq: 1
            })
        );
    }

    #[test]
    fn test_no_relatch_while_active() {
        let mut sources = arena(&[1]);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);
        view.enable_source(&sources, 1, true, None);
        assert_source(&mut sources, &mut view, 1);
        assert_eq!(view.claim(&mut sources, None), 1);

        sources.get_mut(1).unwrap().set_level(false);
        assert_source(&mut sources, &mut view, 1);
        assert!(view.pending_sources(&sources).is_empty());
        assert_eq!(view.claim(&mut sources, None), 0);
    }

    #[test]
    fn test_forced_elsewhere_mutes_view() {
        let mut sources = arena(&[1]);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);
        view.enable_source(&sources, 1, true, Some(1));
        assert_source(&mut sources, &mut view, 1);
        view.recompute_output_line(&sources, Some(1));
        assert!(!view.output_line());
        assert_eq!(view.claim(&mut sources, Some(1)), 0);
        assert_eq!(view.claim(&mut sources, Some(0)), 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut sources = arena(&[1, 1]);
        let mut view = ConsumerView::new(0, PendingMode::EdgeCapture);
        view.enable_source(&sources, 1, true, None);
        view.enable_source(&sources, 2, true, None);
        assert_source(&mut sources, &mut view, 1);
        assert_source(&mut sources, &mut view, 2);
        view.claim(&mut sources, None);

        view.reset(&sources, None);
        assert!(!view.output_line());
        assert!(view.active_interrupts().is_empty());
        assert_eq!(view.enabled_sources().count(), 0);
        assert!(view.pending_sources(&sources).is_empty());
    }
}
