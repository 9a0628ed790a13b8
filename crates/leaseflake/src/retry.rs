//! Deadline and fault guards for coordination store calls, plus the backoff
//! schedule and retry driver used when those calls fail.
//!
//! Every store interaction runs through [`run_with_timeout`]: the operation is
//! spawned on the tokio runtime, raced against a deadline, and any panic
//! inside it is turned into [`Error::Panicked`]. When the deadline wins, the
//! operation's [`CancellationToken`] is cancelled and the task is abandoned;
//! whatever it eventually produces is discarded.

use core::num::NonZeroU32;
use std::{any::Any, future::Future, panic::AssertUnwindSafe, time::Duration};

use futures::FutureExt;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Error, Result};

/// Awaits `op`, converting a panic raised while polling it into
/// [`Error::Panicked`].
pub async fn run_guarded<F, T>(op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(op).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Runs `op` on its own task and races it against `deadline`.
///
/// `op` receives a [`CancellationToken`] that is cancelled when the deadline
/// fires first. Store implementations should observe it (see
/// [`until_cancelled`]) so abandoned calls release their resources. The
/// spawned task is detached either way; its late result is dropped.
///
/// # Errors
///
/// - [`Error::DeadlineExceeded`] when the deadline fires before `op` finishes
/// - [`Error::Panicked`] when `op` panics
/// - any error `op` itself returns
#[cfg_attr(feature = "tracing", instrument(level = "trace", skip(op)))]
pub async fn run_with_deadline<F, Fut, T>(deadline: Instant, op: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.child_token();
    let mut task = tokio::spawn(run_guarded(async move { op(child).await }));

    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(Error::TaskFailed {
            reason: join.to_string(),
        }),
        Err(_) => {
            token.cancel();
            #[cfg(feature = "tracing")]
            tracing::debug!("deadline exceeded, abandoning task");
            Err(Error::DeadlineExceeded)
        }
    }
}

/// [`run_with_deadline`] with a deadline `timeout` from now.
pub async fn run_with_timeout<F, Fut, T>(timeout: Duration, op: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    run_with_deadline(Instant::now() + timeout, op).await
}

/// Drives `op` until it succeeds, sleeping `backoff.delay(n)` after the n-th
/// failure. Each failure is handed to `on_error` first.
///
/// # Errors
///
/// With `max_attempts` set, returns [`Error::RetriesExhausted`] wrapping the
/// last failure once that many attempts have failed. Without a ceiling this
/// only returns on success.
pub async fn retry<F, Fut, T>(
    backoff: &Backoff,
    max_attempts: Option<NonZeroU32>,
    mut on_error: impl FnMut(&Error),
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0u32;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempts = attempts.saturating_add(1);
        on_error(&err);
        if max_attempts.is_some_and(|max| attempts >= max.get()) {
            return Err(Error::RetriesExhausted {
                attempts,
                last: Box::new(err),
            });
        }
        tokio::time::sleep(backoff.delay(attempts - 1)).await;
    }
}

/// Awaits `fut` unless `token` is cancelled first, in which case
/// [`Error::Cancelled`] is returned and `fut` is dropped.
pub async fn until_cancelled<F, T, E>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = core::result::Result<T, E>>,
    E: Into<Error>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Capped exponential backoff with optional full jitter.
///
/// The n-th delay (zero-based) is `initial * multiplier^n`, capped at `max`.
/// With jitter enabled the actual delay is drawn uniformly from
/// `[0, capped delay]`, which spreads out nodes that start failing together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
            multiplier: 2,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Un-jittered delay before retry number `attempt` (zero-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Delay before retry number `attempt`, jittered when enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let nanos = u64::try_from(base.as_nanos()).unwrap_or(u64::MAX);
        Duration::from_nanos(rand::rng().random_range(0..=nanos))
    }
}
