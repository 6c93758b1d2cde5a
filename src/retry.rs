//! The two retry tiers.
//!
//! Per-file downloads retry immediately with [`ImmediateRetry`]. Whole
//! listings retry slowly with [`BackoffRetry`], waiting out server side
//! hiccups.

use std::{
    io::{Seek, SeekFrom, Write},
    thread,
    time::Duration,
};

use crate::{
    context::RunContext,
    error::{ArchError, TransportError},
    transport::Transport,
};

pub const DEFAULT_DOWNLOAD_ATTEMPTS: u32 = 10;
pub const DEFAULT_LISTING_ATTEMPTS: u32 = 6;
pub const DEFAULT_LISTING_DELAY: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImmediateRetry {
    pub max_attempts: u32,
}

impl Default for ImmediateRetry {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DOWNLOAD_ATTEMPTS,
        }
    }
}

impl ImmediateRetry {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `op` until it succeeds, it fails with a non-transient error, or the
    /// budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, url: &str, verbose: bool, mut op: F) -> Result<T, ArchError>
    where
        F: FnMut(u32) -> Result<T, TransportError>,
    {
        let mut last = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 && verbose {
                log::info!("   Retrying download for {}", url);
            }

            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    log::log!(
                        attempt_failure_level(verbose),
                        "Attempt {} of {} failed: {}",
                        attempt,
                        self.max_attempts,
                        err
                    );
                    last = Some(err);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ArchError::DownloadExhausted {
            url: url.to_owned(),
            attempts: self.max_attempts,
            last: last.unwrap_or_else(|| TransportError::Connection {
                url: url.to_owned(),
                reason: "no attempt was made".into(),
            }),
        })
    }
}

/// Failed attempts show up at `-v`; quieter runs only see them with debug logging.
fn attempt_failure_level(verbose: bool) -> log::Level {
    if verbose {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffRetry {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for BackoffRetry {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_LISTING_ATTEMPTS,
            delay: DEFAULT_LISTING_DELAY,
        }
    }
}

impl BackoffRetry {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op`, sleeping `delay` between failures. The last error is returned
    /// unchanged once the budget is spent.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => {
                    log::error!(
                        "{} attempts failed to retrieve {}. Aborting.",
                        self.max_attempts,
                        what
                    );
                    return Err(err);
                }
                Err(err) => {
                    log::warn!(
                        "Retrieving {} failed, waiting {:?}: {}",
                        what,
                        self.delay,
                        err
                    );
                    thread::sleep(self.delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// A [`Transport`] plus the per-file retry budget.
pub struct RetryingFetcher<'a, T: Transport + ?Sized> {
    transport: &'a T,
    policy: ImmediateRetry,
}

impl<'a, T: Transport + ?Sized> RetryingFetcher<'a, T> {
    pub fn new(transport: &'a T, policy: ImmediateRetry) -> Self {
        Self { transport, policy }
    }

    pub fn fetch_with_retry(&self, ctx: &RunContext, url: &str) -> Result<Vec<u8>, ArchError> {
        let request = ctx.request(url);
        self.policy
            .run(url, ctx.shows_progress(), |_| self.transport.get(&request))
    }

    /// Stream into `sink`, rewinding it before every attempt. Returns the byte
    /// count of the successful attempt; the caller truncates anything beyond it.
    pub fn fetch_with_retry_into<W>(
        &self,
        ctx: &RunContext,
        url: &str,
        sink: &mut W,
    ) -> Result<u64, ArchError>
    where
        W: Write + Seek,
    {
        let request = ctx.request(url);
        self.policy.run(url, ctx.shows_progress(), |_| {
            sink.seek(SeekFrom::Start(0))
                .map_err(|err| TransportError::Connection {
                    url: url.to_owned(),
                    reason: format!("unable to rewind output: {}", err),
                })?;
            self.transport.get_to_writer(&request, &mut *sink)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Request;
    use std::{cell::Cell, io::Cursor};

    /// Fails the first `failures` calls, then serves `body`.
    struct Flaky {
        failures: u32,
        calls: Cell<u32>,
        body: &'static [u8],
    }

    impl Flaky {
        fn new(failures: u32, body: &'static [u8]) -> Self {
            Self {
                failures,
                calls: Cell::new(0),
                body,
            }
        }

        fn attempt(&self, request: &Request) -> Result<(), TransportError> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if n <= self.failures {
                Err(TransportError::Status {
                    url: request.url.clone(),
                    code: Some(503),
                    reason: "Service Unavailable".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl Transport for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn get(&self, request: &Request) -> Result<Vec<u8>, TransportError> {
            self.attempt(request)?;
            Ok(self.body.to_vec())
        }

        fn get_to_writer(
            &self,
            request: &Request,
            sink: &mut dyn Write,
        ) -> Result<u64, TransportError> {
            // Write garbage before failing so rewinding is observable.
            if self.calls.get() < self.failures {
                sink.write_all(b"PARTIAL-GARBAGE-BYTES").unwrap();
            }
            self.attempt(request)?;
            sink.write_all(self.body).unwrap();
            Ok(self.body.len() as u64)
        }
    }

    #[test]
    fn succeeds_on_last_attempt() {
        let transport = Flaky::new(9, b"data");
        let fetcher = RetryingFetcher::new(&transport, ImmediateRetry::default());

        let body = fetcher
            .fetch_with_retry(&RunContext::default(), "https://host/f")
            .unwrap();

        assert_eq!(body, b"data");
        assert_eq!(transport.calls.get(), 10);
    }

    #[test]
    fn exhausts_after_exactly_budget_attempts() {
        let transport = Flaky::new(u32::MAX, b"");
        let fetcher = RetryingFetcher::new(&transport, ImmediateRetry::new(4));

        let err = fetcher
            .fetch_with_retry(&RunContext::default(), "https://host/f")
            .unwrap_err();

        assert_eq!(transport.calls.get(), 4);
        match err {
            ArchError::DownloadExhausted { url, attempts, .. } => {
                assert_eq!(url, "https://host/f");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn capability_failure_is_not_retried() {
        struct Broken(Cell<u32>);
        impl Transport for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn get(&self, _: &Request) -> Result<Vec<u8>, TransportError> {
                self.0.set(self.0.get() + 1);
                Err(TransportError::Capability {
                    reason: "gone".into(),
                })
            }
            fn get_to_writer(&self, r: &Request, _: &mut dyn Write) -> Result<u64, TransportError> {
                self.get(r).map(|_| 0)
            }
        }

        let transport = Broken(Cell::new(0));
        let fetcher = RetryingFetcher::new(&transport, ImmediateRetry::default());
        let err = fetcher
            .fetch_with_retry(&RunContext::default(), "https://host/f")
            .unwrap_err();

        assert_eq!(transport.0.get(), 1);
        assert!(matches!(err, ArchError::Transport(TransportError::Capability { .. })));
    }

    #[test]
    fn streaming_rewinds_between_attempts() {
        let transport = Flaky::new(2, b"good");
        let fetcher = RetryingFetcher::new(&transport, ImmediateRetry::default());
        let mut sink = Cursor::new(Vec::new());

        let n = fetcher
            .fetch_with_retry_into(&RunContext::default(), "https://host/f", &mut sink)
            .unwrap();

        let mut written = sink.into_inner();
        written.truncate(n as usize);
        assert_eq!(written, b"good");
    }

    #[test]
    fn backoff_returns_original_error_after_budget() {
        let policy = BackoffRetry::new(6, Duration::ZERO);
        let mut calls = 0;

        let res: Result<(), String> = policy.run("listing", || {
            calls += 1;
            Err(format!("failure {}", calls))
        });

        assert_eq!(calls, 6);
        assert_eq!(res.unwrap_err(), "failure 6");
    }

    #[test]
    fn backoff_stops_on_success() {
        let policy = BackoffRetry::new(6, Duration::ZERO);
        let mut calls = 0;

        let res: Result<u32, String> = policy.run("listing", || {
            calls += 1;
            if calls < 3 {
                Err("not yet".into())
            } else {
                Ok(calls)
            }
        });

        assert_eq!(res.unwrap(), 3);
    }

    #[test]
    fn failed_attempts_stay_below_warn() {
        assert_eq!(attempt_failure_level(true), log::Level::Info);
        assert_eq!(attempt_failure_level(false), log::Level::Debug);
        assert!(attempt_failure_level(false) > log::Level::Warn);
    }
}
