//! Transient failure injection for exercising the retry path.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub(super) struct Faults {
    remaining: AtomicU32,
}

impl Faults {
    pub(super) fn arm(&self, attempts: u32) {
        self.remaining.store(attempts, Ordering::SeqCst);
    }

    /// Fail if armed, consuming one injected failure.
    pub(super) fn trip(&self) -> Result<()> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(Error::Transient("injected transient failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_exactly_as_armed() {
        let faults = Faults::default();
        assert!(faults.trip().is_ok());
        faults.arm(2);
        assert!(faults.trip().is_err());
        assert!(faults.trip().is_err());
        assert!(faults.trip().is_ok());
    }
}
