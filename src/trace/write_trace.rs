use serde::Serialize;

/// One register or one memory byte committed at `time`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WriteEvent {
    pub time: u64,
    pub addr: u64,
    pub value: u64,
}

/// Writes in commit order. Times never decrease.
#[derive(Clone, Debug, Default)]
pub struct WriteTrace {
    events: Vec<WriteEvent>,
}

impl WriteTrace {
    pub fn push(&mut self, event: WriteEvent) {
        debug_assert!(self.events.last().map_or(true, |e| e.time <= event.time));
        self.events.push(event);
    }

    pub fn events(&self) -> &[WriteEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Value of `addr` as of `time`, or `None` if it was never written.
    pub fn value_at(&self, time: u64, addr: u64) -> Option<u64> {
        self.value_at_seeded(time, addr, None)
    }

    /// Like `value_at`, but starting from `seed` instead of "unknown".
    ///
    /// Every write at or before `time` is applied, so the last one wins. The
    /// scan stops at the first event after `time`.
    pub fn value_at_seeded(&self, time: u64, addr: u64, seed: Option<u64>) -> Option<u64> {
        let mut value = seed;
        for e in &self.events {
            if e.time > time {
                break;
            }
            if e.addr == addr {
                value = Some(e.value);
            }
        }
        value
    }
}
