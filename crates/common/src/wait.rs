use std::time::{Duration, Instant};

/// Outcome of a single probe in [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe<T, P> {
    /// The awaited condition holds.
    Ready(T),
    /// Not yet; carries what was observed so a timeout can report it.
    Pending(P),
}

/// Busy-poll `probe` every `interval` until it is ready, fails, or `timeout`
/// has elapsed.
///
/// The probe always runs at least once, so a zero timeout is a single check.
/// On expiry `on_timeout` receives the last pending observation and the time
/// spent waiting, and its result is returned as the error.
pub fn poll_until<T, P, E, F, G>(
    mut probe: F,
    interval: Duration,
    timeout: Duration,
    on_timeout: G,
) -> Result<T, E>
where
    F: FnMut() -> Result<Probe<T, P>, E>,
    G: FnOnce(P, Duration) -> E,
{
    let start = Instant::now();
    loop {
        match probe()? {
            Probe::Ready(value) => return Ok(value),
            Probe::Pending(observed) => {
                let waited = start.elapsed();
                if waited >= timeout {
                    return Err(on_timeout(observed, waited));
                }
                std::thread::sleep(interval.min(timeout - waited));
            }
        }
    }
}
