/// Monotonic millisecond tick source. The counter may wrap.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<F: Fn() -> u32> Clock for F {
    fn now_ms(&self) -> u32 {
        self()
    }
}

/// A wall-clock budget started at a given tick.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: u32,
    budget_ms: u32,
}

impl Deadline {
    pub fn start<C: Clock + ?Sized>(clock: &C, budget_ms: u32) -> Self {
        Self {
            start: clock.now_ms(),
            budget_ms,
        }
    }

    pub fn expired<C: Clock + ?Sized>(&self, clock: &C) -> bool {
        clock.now_ms().wrapping_sub(self.start) >= self.budget_ms
    }
}
