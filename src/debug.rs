//! Debug verbosity levels and frame dumps.

/// Per-device debug verbosity, `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DebugLevel(u8);

impl DebugLevel {
    /// No extra logging.
    pub const OFF: Self = Self(0);
    /// Session open/close and online/offline transitions.
    pub const SESSION: Self = Self(1);
    /// Every request/response pair.
    pub const REQUESTS: Self = Self(2);
    /// Hex dumps of every frame.
    pub const FRAMES: Self = Self(3);

    /// Build a level, rejecting values above 3.
    pub fn new(level: u8) -> Option<Self> {
        (level <= 3).then_some(Self(level))
    }

    /// Raw value.
    pub fn get(self) -> u8 {
        self.0
    }
}

pub(crate) fn dump_hex(level: DebugLevel, device: &str, label: &str, bytes: &[u8]) {
    if level < DebugLevel::FRAMES {
        return;
    }
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{b:02x}"));
    }
    tracing::trace!(device, len = bytes.len(), "{label}: {out}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_above_three_are_rejected() {
        assert_eq!(DebugLevel::new(3), Some(DebugLevel::FRAMES));
        assert_eq!(DebugLevel::new(4), None);
    }
}
