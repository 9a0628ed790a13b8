use core::fmt;

use crate::Error;

/// Which allocator phase produced a reported error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Initial node ID claim.
    Claim,
    /// Background lease renewal.
    Renewal,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claim => f.write_str("claim"),
            Self::Renewal => f.write_str("renewal"),
        }
    }
}

/// Receives non-fatal coordination errors.
///
/// Claim errors are reported before each retry; renewal errors only ever
/// reach the sink. Closures `Fn(Phase, &Error)` implement this trait.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, phase: Phase, error: &Error);
}

/// Logs every reported error as a `tracing` warning.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, phase: Phase, error: &Error) {
        #[cfg(feature = "tracing")]
        tracing::warn!(%phase, %error, "coordination error");
        #[cfg(not(feature = "tracing"))]
        let _ = (phase, error);
    }
}

impl<F> ErrorSink for F
where
    F: Fn(Phase, &Error) + Send + Sync + 'static,
{
    fn report(&self, phase: Phase, error: &Error) {
        self(phase, error);
    }
}
