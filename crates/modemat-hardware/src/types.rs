//! Common types shared across transport implementations.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Readiness flags used by [`Transport::poll`](crate::Transport::poll).
///
/// # Examples
///
/// ```
/// use modemat_hardware::PollEvents;
///
/// let both = PollEvents::READABLE | PollEvents::WRITABLE;
/// assert!(both.contains(PollEvents::READABLE));
/// assert!(!PollEvents::NONE.is_readable());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PollEvents(u8);

impl PollEvents {
    pub const NONE: Self = Self(0);
    pub const READABLE: Self = Self(0b01);
    pub const WRITABLE: Self = Self(0b10);

    /// Returns true if every flag of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any flag of `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_readable(self) -> bool {
        self.contains(Self::READABLE)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }
}

impl BitOr for PollEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollEvents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for PollEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.is_readable() {
            set.entry(&"READABLE");
        }
        if self.is_writable() {
            set.entry(&"WRITABLE");
        }
        set.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let mut events = PollEvents::NONE;
        assert!(events.is_empty());

        events |= PollEvents::WRITABLE;
        assert!(events.is_writable());
        assert!(!events.is_readable());
        assert!(events.intersects(PollEvents::READABLE | PollEvents::WRITABLE));
        assert!(!events.contains(PollEvents::READABLE | PollEvents::WRITABLE));
    }

    #[test]
    fn test_debug_output() {
        let events = PollEvents::READABLE | PollEvents::WRITABLE;
        assert_eq!(format!("{events:?}"), r#"{"READABLE", "WRITABLE"}"#);
        assert_eq!(format!("{:?}", PollEvents::NONE), "{}");
    }
}
