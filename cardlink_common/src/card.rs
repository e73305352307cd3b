//! Card service flags and byte helpers.

use bitflags::bitflags;

bitflags! {
    /// Family-specific policies applied by storage services.
    ///
    /// An empty set is the default behaviour (overwrite in place).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CardBehavior: u32 {
        /// Writes must not overwrite existing content.
        const APPEND_ONLY = 0x0002;
    }
}

/// Format bytes as space separated upper-case hex (`3B 8F 80`).
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
