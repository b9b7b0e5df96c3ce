use std::time::Duration;

use message::Command;
use tokio_retry::{
    strategy::ExponentialBackoff,
    RetryIf,
};

use crate::session::{
    Session,
    SessionError,
};

/// Exponential backoff from `base`, capped at `max_delay`, each delay jittered by up to ±50%.
pub fn jittered_backoff(
    base: Duration,
    max_delay: Duration,
    max_count: usize,
) -> impl Iterator<Item = Duration> {
    // proportion of signal to be jittered, i.e. multiply the signal by a random sample in the range
    // [1 - JITTER_FACTOR, 1 + JITTER_FACTOR]
    const JITTER_FACTOR: f64 = 0.5;

    ExponentialBackoff::from_millis(base.as_millis() as u64)
        .max_delay(max_delay)
        .map(|dur| {
            // make distribution even about 0, scale by factor, offset about 1
            let jitter = (rand::random::<f64>() - 0.5) * JITTER_FACTOR * 2. + 1.;

            dur.mul_f64(jitter)
        })
        .take(max_count)
}

/// Send `command`, retrying failed writes along `strategy`.
///
/// Sessions never retry on their own; this is for callers that want to. Gives up immediately
/// once the session stops accepting commands.
#[tracing::instrument(skip(session, strategy), err(Display))]
pub async fn send_retry(
    session: &Session,
    command: Command,
    strategy: impl IntoIterator<Item = Duration>,
) -> Result<(), SessionError> {
    RetryIf::start(
        strategy,
        move || async move {
            let state = session.state();
            if !state.accepts_commands() {
                return Err(SessionError::InvalidState {
                    op: "send command",
                    state,
                });
            }

            if session.send(command).await {
                Ok(())
            } else {
                tracing::warn!("command send failed");
                Err(SessionError::CommandFailed(command.number()))
            }
        },
        |e: &SessionError| matches!(e, SessionError::CommandFailed(_)),
    )
    .await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_is_bounded() {
        let delays = jittered_backoff(Duration::from_millis(10), Duration::from_millis(100), 6)
            .collect::<Vec<_>>();

        assert_eq!(delays.len(), 6);

        for d in delays {
            assert!(d <= Duration::from_millis(150), "{d:?}");
        }
    }
}
