use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::models::coordinate::Coordinate;
use crate::route::provider::RouteProvider;
use crate::route::{Route, RouteError, RouteSource};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total provider calls before giving up.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub pause: Duration,
    /// Segments in the synthesized straight-line route.
    pub fallback_segments: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pause: Duration::from_secs(2),
            fallback_segments: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedRoute {
    pub route: Route,
    pub source: RouteSource,
    pub attempts: u32,
}

/// Asks the provider for a route, retrying with a fixed pause, and falls back to
/// a straight line between the endpoints when every attempt fails. Errors only
/// when the endpoints coincide and no fallback line can be drawn.
pub async fn fetch_route_with_retry(
    provider: &dyn RouteProvider,
    origin: Coordinate,
    destination: Coordinate,
    policy: &RetryPolicy,
) -> Result<FetchedRoute, RouteError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(attempt, max_attempts, "fetching route");

        let outcome = provider
            .fetch_route(origin, destination)
            .await
            .and_then(|route| {
                if route.len() >= 2 {
                    Ok(route)
                } else {
                    Err(RouteError::TooShort(route.len()))
                }
            });

        match outcome {
            Ok(route) => {
                if attempt > 1 {
                    info!(attempt, "route fetched after retry");
                }
                return Ok(FetchedRoute {
                    route,
                    source: RouteSource::Provider,
                    attempts: attempt,
                });
            }
            Err(err) if attempt >= max_attempts => {
                warn!(
                    attempt,
                    error = %err,
                    segments = policy.fallback_segments,
                    "route unavailable; using straight-line fallback"
                );
                let route = Route::straight_line(origin, destination, policy.fallback_segments)?;
                return Ok(FetchedRoute {
                    route,
                    source: RouteSource::Fallback,
                    attempts: attempt,
                });
            }
            Err(err) => {
                warn!(
                    attempt,
                    error = %err,
                    pause_ms = policy.pause.as_millis() as u64,
                    "route fetch failed, retrying"
                );
                sleep(policy.pause).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct FlakyProvider {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RouteProvider for FlakyProvider {
        async fn fetch_route(
            &self,
            origin: Coordinate,
            destination: Coordinate,
        ) -> Result<Route, RouteError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                Err(RouteError::Unavailable(format!("call {call} failed")))
            } else {
                Route::new(vec![origin, Coordinate::new(12.91, 77.60), destination])
            }
        }
    }

    fn flaky(failures_before_success: u32) -> FlakyProvider {
        FlakyProvider {
            failures_before_success,
            calls: AtomicU32::new(0),
        }
    }

    const ORIGIN: Coordinate = Coordinate::new(12.90, 77.60);
    const DESTINATION: Coordinate = Coordinate::new(12.92, 77.62);

    #[tokio::test(start_paused = true)]
    async fn first_success_needs_no_retry() {
        let provider = flaky(0);
        let fetched =
            fetch_route_with_retry(&provider, ORIGIN, DESTINATION, &RetryPolicy::default())
                .await
                .unwrap();

        assert_eq!(fetched.source, RouteSource::Provider);
        assert_eq!(fetched.attempts, 1);
        assert_eq!(fetched.route.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds_with_pause_between_attempts() {
        let provider = flaky(2);
        let started = tokio::time::Instant::now();

        let fetched =
            fetch_route_with_retry(&provider, ORIGIN, DESTINATION, &RetryPolicy::default())
                .await
                .unwrap();

        assert_eq!(fetched.source, RouteSource::Provider);
        assert_eq!(fetched.attempts, 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_produce_51_point_fallback() {
        let provider = flaky(u32::MAX);

        let fetched =
            fetch_route_with_retry(&provider, ORIGIN, DESTINATION, &RetryPolicy::default())
                .await
                .unwrap();

        assert_eq!(fetched.source, RouteSource::Fallback);
        assert_eq!(fetched.attempts, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(fetched.route.len(), 51);
        assert_eq!(fetched.route.origin(), Some(&ORIGIN));
        assert_eq!(fetched.route.destination(), Some(&DESTINATION));
    }

    #[tokio::test(start_paused = true)]
    async fn coincident_endpoints_have_no_fallback() {
        let provider = flaky(u32::MAX);

        let err = fetch_route_with_retry(&provider, ORIGIN, ORIGIN, &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RouteError::TooShort(1)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
