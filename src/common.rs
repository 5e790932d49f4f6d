use std::{fmt, str::FromStr, time::Duration};

use tokio_util::sync::CancellationToken;

/// The TCP port the relay listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 9621;

/// What a download pump does when the server closes its side of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndOfStreamPolicy {
    /// Keep reading after a pause, as if the end of stream were transient.
    #[default]
    Retry,
    /// Stop the pump.
    Fatal,
}

impl fmt::Display for EndOfStreamPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => f.write_str("retry"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unknown end-of-stream policy `{0}` (expected `retry` or `fatal`)")]
    BadEndOfStreamPolicy(String),
}

impl FromStr for EndOfStreamPolicy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "fatal" => Ok(Self::Fatal),
            _ => Err(ParseError::BadEndOfStreamPolicy(s.to_string())),
        }
    }
}

/// Default pause between reads when [EndOfStreamPolicy::Retry] is in effect.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Cancels `cancel` once the process is asked to stop.
///
/// On unix this reacts to SIGINT, SIGTERM and SIGHUP, elsewhere to Ctrl-C.
pub async fn cancel_on_shutdown_signal(cancel: CancellationToken) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
            _ = hangup.recv() => {}
            _ = cancel.cancelled() => return Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = cancel.cancelled() => return Ok(()),
        }
    }
    tracing::info!("Stopping...");
    cancel.cancel();
    Ok(())
}
