//! Timer service.
//!
//! One-shot and repeating timers with cancel, polled by the control
//! loop with the current uptime. Timers carry a caller-chosen tag;
//! [`Scheduler::poll`] returns the tags that came due.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  slot 0   OneShot   ota-hard-reset   due 300_000         │
//! │  slot 1   Every     offline-probe    every 10_000        │
//! │  slot 2   OneShot   confirm-firmware due 600_000         │
//! │   …                                                      │
//! └───────────────────────────┬──────────────────────────────┘
//!                             ▼
//!                 poll(now) ──▶ [tags due]
//! ```

use core::fmt;
use log::{debug, warn};

/// Fixed number of timer slots.
pub const MAX_TIMERS: usize = 8;

/// Slot handle returned when scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(usize);

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    OneShot,
    Every { interval_ms: u64 },
}

#[derive(Debug, Clone, Copy)]
struct TimerEntry<T> {
    tag: T,
    due_ms: u64,
    kind: TimerKind,
}

pub struct Scheduler<T> {
    timers: [Option<TimerEntry<T>>; MAX_TIMERS],
}

impl<T: Copy + PartialEq + fmt::Debug> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            timers: core::array::from_fn(|_| None),
        }
    }

    /// Fire `tag` once, `delay_ms` after `now_ms`. `None` if all slots are taken.
    pub fn schedule_once(&mut self, tag: T, now_ms: u64, delay_ms: u64) -> Option<TimerId> {
        self.insert(TimerEntry {
            tag,
            due_ms: now_ms.saturating_add(delay_ms),
            kind: TimerKind::OneShot,
        })
    }

    /// Fire `tag` every `interval_ms`, first at `now_ms + interval_ms`.
    pub fn schedule_every(&mut self, tag: T, now_ms: u64, interval_ms: u64) -> Option<TimerId> {
        let interval_ms = interval_ms.max(1);
        self.insert(TimerEntry {
            tag,
            due_ms: now_ms.saturating_add(interval_ms),
            kind: TimerKind::Every { interval_ms },
        })
    }

    pub fn cancel(&mut self, id: TimerId) {
        if let Some(slot) = self.timers.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Cancel every timer carrying `tag`.
    pub fn cancel_tag(&mut self, tag: T) {
        for slot in &mut self.timers {
            if slot.is_some_and(|e| e.tag == tag) {
                debug!("Scheduler: cancelled {tag:?}");
                *slot = None;
            }
        }
    }

    pub fn is_scheduled(&self, tag: T) -> bool {
        self.timers.iter().flatten().any(|e| e.tag == tag)
    }

    /// Tags due at `now_ms`. One-shots are removed; repeating timers
    /// are re-armed one interval after `now_ms`, so a stalled loop does
    /// not fire a burst of catch-up ticks.
    pub fn poll(&mut self, now_ms: u64) -> heapless::Vec<T, MAX_TIMERS> {
        let mut fired = heapless::Vec::new();
        for slot in &mut self.timers {
            let Some(entry) = slot else {
                continue;
            };
            if entry.due_ms > now_ms {
                continue;
            }
            // Capacity equals the slot count, so this never overflows.
            let _ = fired.push(entry.tag);
            let kind = entry.kind;
            match kind {
                TimerKind::OneShot => *slot = None,
                TimerKind::Every { interval_ms } => entry.due_ms = now_ms.saturating_add(interval_ms),
            }
        }
        fired
    }

    pub fn active_count(&self) -> usize {
        self.timers.iter().flatten().count()
    }

    fn insert(&mut self, entry: TimerEntry<T>) -> Option<TimerId> {
        let Some(idx) = self.timers.iter().position(Option::is_none) else {
            warn!("Scheduler: no free slot for {:?}", entry.tag);
            return None;
        };
        debug!("Scheduler: {:?} in slot {idx} due at {}", entry.tag, entry.due_ms);
        self.timers[idx] = Some(entry);
        Some(TimerId(idx))
    }
}

impl<T: Copy + PartialEq + fmt::Debug> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
