// Error kinds per the encoder's error-handling design: the encoder is one-shot,
// every error propagates to the top-level driver and terminates the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
  #[error("configuration error: {0}")]
  Config(String),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("allocation failure: {0}")]
  Alloc(String),

  #[error("internal invariant violated: {0}")]
  Internal(String),
}

pub type Result<T> = std::result::Result<T, EncoderError>;

/// Asserts an invariant, raising `EncoderError::Internal` instead of panicking
/// so the top-level driver can log and exit cleanly. In debug builds this is
/// always checked; callers relying on it for memory safety must not compile it
/// out, so unlike `debug_assert!` this is unconditional.
#[macro_export]
macro_rules! internal_assert {
  ($cond:expr, $($arg:tt)*) => {
    if !$cond {
      return Err($crate::error::EncoderError::Internal(format!($($arg)*)));
    }
  };
}
