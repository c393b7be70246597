use std::fmt;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::Error;
use crate::util::lock_unpoisoned;

/// Sink for per-request diagnostic events.
pub trait RequestLogger: Send + Sync {
    /// Identifier tagging every event of one logical request.
    fn next_id(&self) -> u64;

    fn log(&self, id: u64, error: Option<&Error>, message: &str);
}

/// Monotonic request id source.
#[derive(Debug, Default)]
pub struct RequestIds {
    last: Mutex<u64>,
}

impl RequestIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        let mut last = lock_unpoisoned(&self.last);
        *last += 1;
        *last
    }
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingLogger {
    ids: RequestIds,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestLogger for TracingLogger {
    fn next_id(&self) -> u64 {
        self.ids.next()
    }

    fn log(&self, id: u64, error: Option<&Error>, message: &str) {
        match error {
            Some(error) => warn!(
                request_id = id,
                error = %error,
                error_code = error.code().as_str(),
                "{message}"
            ),
            None => debug!(request_id = id, "{message}"),
        }
    }
}

/// Adapts a closure into a [`RequestLogger`].
pub struct FnLogger<F> {
    ids: RequestIds,
    sink: F,
}

impl<F> fmt::Debug for FnLogger<F> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FnLogger")
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl<F> RequestLogger for FnLogger<F>
where
    F: Fn(u64, Option<&Error>, &str) + Send + Sync,
{
    fn next_id(&self) -> u64 {
        self.ids.next()
    }

    fn log(&self, id: u64, error: Option<&Error>, message: &str) {
        (self.sink)(id, error, message)
    }
}

pub fn logger_fn<F>(sink: F) -> FnLogger<F>
where
    F: Fn(u64, Option<&Error>, &str) + Send + Sync,
{
    FnLogger {
        ids: RequestIds::new(),
        sink,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{RequestIds, RequestLogger, logger_fn};
    use crate::util::lock_unpoisoned;

    #[test]
    fn ids_increase_across_threads() {
        let ids = Arc::new(RequestIds::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..25).map(|_| ids.next()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("join id worker"))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn closure_logger_receives_events() {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let logger = logger_fn(move |id, error, message: &str| {
            lock_unpoisoned(&sink).push((id, error.is_some(), message.to_owned()));
        });

        let id = logger.next_id();
        logger.log(id, None, "close 12");
        assert_eq!(
            *lock_unpoisoned(&events),
            vec![(1, false, "close 12".to_owned())]
        );
    }
}
