use std::fmt;

use serde::{Deserialize, Serialize};

/// Static ranking of a variant's result. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Priority(pub f32);

impl Priority {
    pub const FORCE_PRIORITY_1: Priority = Priority(0.1);
    pub const FORCE_PRIORITY_2: Priority = Priority(0.2);
    pub const FORCE_PRIORITY_3: Priority = Priority(0.3);
    pub const FORCE_PRIORITY_4: Priority = Priority(0.4);
    pub const FORCE_PRIORITY_5: Priority = Priority(0.5);
    pub const FORCE_PRIORITY_6: Priority = Priority(0.6);
    pub const FORCE_PRIORITY_7: Priority = Priority(0.7);
    pub const FORCE_PRIORITY_8: Priority = Priority(0.8);
    pub const FORCE_PRIORITY_9: Priority = Priority(0.9);
    pub const DONT_USE_IF_HAVE_SOMETHING_ELSE: Priority = Priority(1_000_000.0);

    pub fn value(self) -> f32 {
        self.0
    }

    pub fn is_better_than(self, other: Priority) -> bool {
        self.0 < other.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DONT_USE_IF_HAVE_SOMETHING_ELSE
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_strict() {
        let (first, second) = (Priority::FORCE_PRIORITY_1, Priority::FORCE_PRIORITY_2);
        let last_resort = Priority::DONT_USE_IF_HAVE_SOMETHING_ELSE;
        let middle = Priority::FORCE_PRIORITY_5;
        assert!(first.is_better_than(second));
        assert!(Priority::FORCE_PRIORITY_9.is_better_than(last_resort));
        assert!(!middle.is_better_than(middle));
    }
}
