use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::timer::{Kicker, TimerEvent, TimerFacility, TimerHandle};
use crate::types::{CpuId, TimeNs};

#[derive(Debug, Default)]
struct TimerQueue {
    next_handle: u64,
    /// Keyed by deadline, then by arming order.
    pending: BTreeMap<(TimeNs, TimerHandle), TimerEvent>,
    deadlines: BTreeMap<TimerHandle, TimeNs>,
}

/// One-shot timer facility. Nothing fires on its own: the owner polls
/// [`SimTimers::pop_due`] and delivers the event to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct SimTimers(Arc<Mutex<TimerQueue>>);

impl SimTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimerQueue> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<TimeNs> {
        self.lock().pending.keys().next().map(|&(deadline, _)| deadline)
    }

    /// Remove and return the earliest timer due at or before `now`.
    pub fn pop_due(&self, now: TimeNs) -> Option<(TimerHandle, TimerEvent)> {
        let mut q = self.lock();
        let (&(deadline, handle), _) = q.pending.first_key_value()?;
        if deadline > now {
            return None;
        }
        let event = q.pending.remove(&(deadline, handle))?;
        q.deadlines.remove(&handle);
        Some((handle, event))
    }

    pub fn nr_armed(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.lock().deadlines.contains_key(&handle)
    }
}

impl TimerFacility for SimTimers {
    fn arm(&self, _cpu: CpuId, deadline: TimeNs, event: TimerEvent) -> TimerHandle {
        let mut q = self.lock();
        let handle = TimerHandle(q.next_handle);
        q.next_handle += 1;
        q.pending.insert((deadline, handle), event);
        q.deadlines.insert(handle, deadline);
        handle
    }

    fn disarm(&self, handle: TimerHandle) -> bool {
        let mut q = self.lock();
        match q.deadlines.remove(&handle) {
            Some(deadline) => q.pending.remove(&(deadline, handle)).is_some(),
            None => false,
        }
    }
}

/// Collects reschedule requests until the owner takes them.
#[derive(Debug, Clone, Default)]
pub struct SimKicker(Arc<Mutex<BTreeSet<CpuId>>>);

impl SimKicker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<CpuId>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take all pending requests, lowest CPU first.
    pub fn take_pending(&self) -> Vec<CpuId> {
        std::mem::take(&mut *self.lock()).into_iter().collect()
    }

    pub fn is_pending(&self, cpu: CpuId) -> bool {
        self.lock().contains(&cpu)
    }
}

impl Kicker for SimKicker {
    fn request_reschedule(&self, cpu: CpuId) {
        self.lock().insert(cpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityId;

    const CPU0: CpuId = CpuId(0);

    fn slice(cpu: u32) -> TimerEvent {
        TimerEvent::SliceExpired { cpu: CpuId(cpu) }
    }

    #[test]
    fn test_pop_in_deadline_order() {
        let timers = SimTimers::new();
        let late = timers.arm(CPU0, 300, slice(0));
        let early = timers.arm(CPU0, 100, slice(1));
        let tie = timers.arm(CPU0, 100, slice(2));

        assert_eq!(timers.next_deadline(), Some(100));
        assert_eq!(timers.pop_due(50), None);
        assert_eq!(timers.pop_due(100), Some((early, slice(1))));
        assert_eq!(timers.pop_due(100), Some((tie, slice(2))));
        assert_eq!(timers.pop_due(200), None);
        assert_eq!(timers.pop_due(300), Some((late, slice(0))));
        assert_eq!(timers.nr_armed(), 0);
    }

    #[test]
    fn test_disarm() {
        let timers = SimTimers::new();
        let h = timers.arm(CPU0, 10, TimerEvent::WarpLimit {
            entity: EntityId(3),
        });
        assert!(timers.is_armed(h));
        assert!(timers.disarm(h));
        assert!(!timers.disarm(h));
        assert!(!timers.is_armed(h));
        assert_eq!(timers.pop_due(100), None);
    }

    #[test]
    fn test_kicker_dedups_and_drains() {
        let kicker = SimKicker::new();
        kicker.request_reschedule(CpuId(2));
        kicker.request_reschedule(CpuId(0));
        kicker.request_reschedule(CpuId(2));
        assert!(kicker.is_pending(CpuId(2)));
        assert_eq!(kicker.take_pending(), vec![CpuId(0), CpuId(2)]);
        assert!(kicker.take_pending().is_empty());
    }
}
