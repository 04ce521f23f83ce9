use core::sync::atomic::{AtomicU8, Ordering};

/// A switch an outside context flips to hold the master off some work,
/// plus a busy bit telling it whether that work is in progress right now.
#[derive(Debug)]
pub struct Gate(AtomicU8);

impl Gate {
    const ALLOWED: u8 = 0x01;
    const BUSY: u8 = 0x02;

    pub const fn new() -> Self {
        Self(AtomicU8::new(Self::ALLOWED))
    }

    pub const fn denied() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn allow(&self) {
        self.0.fetch_or(Self::ALLOWED, Ordering::AcqRel);
    }

    /// Running work is not interrupted; wait for `!is_busy()`.
    pub fn deny(&self) {
        self.0.fetch_and(!Self::ALLOWED, Ordering::AcqRel);
    }

    pub fn is_allowed(&self) -> bool {
        self.0.load(Ordering::Acquire) & Self::ALLOWED != 0
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire) & Self::BUSY != 0
    }

    /// Marks the gate busy if it is allowed and not busy yet.
    pub fn try_enter(&self) -> bool {
        self.0
            .compare_exchange(
                Self::ALLOWED,
                Self::ALLOWED | Self::BUSY,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn leave(&self) {
        self.0.fetch_and(!Self::BUSY, Ordering::AcqRel);
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Both gates start out allowed.
#[derive(Debug, Default)]
pub struct MasterGates {
    pub scan: Gate,
    pub config: Gate,
}

impl MasterGates {
    pub const fn new() -> Self {
        Self {
            scan: Gate::new(),
            config: Gate::new(),
        }
    }
}
