//! Encode/decode error.

/// Wire encode/decode errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A buffer is too short to hold the field or structure being accessed.
    Truncated {
        /// Number of bytes required.
        required: usize,
        /// Number of bytes actually available.
        available: usize,
    },
}

impl std::error::Error for WireError {}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WireError::Truncated {
                required,
                available,
            } => write!(
                f,
                "buffer of {} bytes is too short, {} bytes required",
                available, required
            ),
        }
    }
}
