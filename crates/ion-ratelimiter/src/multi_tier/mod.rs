//! Multi-tier limiter: a global bucket layered with per-route and
//! per-resource buckets (spec §4.4).

mod headers;
mod key;

pub use headers::{Headers, RateLimitHeaders};

use crate::error::Result;
use crate::events::RateLimiterEvent;
use crate::token_bucket::TokenBucket;
use ion_core::clock::Clock;
use ion_core::{Ctx, EventListeners, FnListener, Observability, Rate};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A single call's routing and identity information, as consulted by a
/// [`MultiTierLimiter`].
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP-style method, e.g. `"GET"`. Case-insensitive.
    pub method: String,
    /// Raw endpoint path, e.g. `"/channels/111/messages"`.
    pub endpoint: String,
    /// Primary resource identifier, if any.
    pub resource_id: Option<String>,
    /// Secondary (nested) resource identifier, if any.
    pub sub_resource_id: Option<String>,
    /// Caller identity, if any.
    pub user_id: Option<String>,
    /// Parameters that distinguish otherwise-identical routes into
    /// separate buckets (e.g. a webhook target). Hashed, not stored raw.
    pub major_parameters: BTreeMap<String, String>,
    /// Caller-supplied priority; carried through but not interpreted by
    /// this limiter.
    pub priority: u8,
    /// Cancellation token honored by `wait_n`.
    pub ctx: Ctx,
}

impl Request {
    /// Creates a request with no resource identity and no major parameters.
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>, ctx: Ctx) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            resource_id: None,
            sub_resource_id: None,
            user_id: None,
            major_parameters: BTreeMap::new(),
            priority: 0,
            ctx,
        }
    }

    /// Sets the primary resource id.
    pub fn resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Sets the secondary resource id.
    pub fn sub_resource_id(mut self, id: impl Into<String>) -> Self {
        self.sub_resource_id = Some(id.into());
        self
    }

    /// Sets the caller identity.
    pub fn user_id(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    /// Adds a major parameter, used in route key derivation.
    pub fn major_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.major_parameters.insert(key.into(), value.into());
        self
    }

    /// Sets the caller-supplied priority.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    fn match_key(&self) -> String {
        key::match_key(&self.method, &self.endpoint)
    }

    fn bucket_key(&self, match_key: &str) -> String {
        key::bucket_key(match_key, &self.major_parameters)
    }

    fn resource_key(&self) -> Option<String> {
        key::resource_key(
            self.resource_id.as_deref(),
            self.sub_resource_id.as_deref(),
            self.user_id.as_deref(),
        )
    }
}

struct RoutePattern {
    pattern: String,
    rate: Rate,
    burst: f64,
}

#[derive(Default)]
struct WaitStats {
    count: u64,
    mean_secs: f64,
    max: Duration,
}

impl WaitStats {
    fn record(&mut self, wait: Duration) {
        self.count += 1;
        let secs = wait.as_secs_f64();
        self.mean_secs += (secs - self.mean_secs) / self.count as f64;
        self.max = self.max.max(wait);
    }
}

#[derive(Default)]
struct Counters {
    global_denied: u64,
    route_denied: u64,
    resource_denied: u64,
    wait: WaitStats,
}

struct Shared {
    name: String,
    clock: Arc<dyn Clock>,
    jitter: f64,
    global: TokenBucket,
    default_route: (Rate, f64),
    route_patterns: Vec<RoutePattern>,
    default_resource: Option<(Rate, f64)>,
    route_buckets: Mutex<HashMap<String, TokenBucket>>,
    resource_buckets: Mutex<HashMap<String, TokenBucket>>,
    bucket_mapping: Mutex<HashMap<String, String>>,
    pause_until: Mutex<Option<Instant>>,
    counters: Mutex<Counters>,
    event_listeners: EventListeners<RateLimiterEvent>,
    obs: Observability,
}

/// A global bucket composed with per-route and per-resource buckets,
/// admitting a request only if every applicable tier admits it.
///
/// Cheap to clone; clones share the same underlying limiter.
#[derive(Clone)]
pub struct MultiTierLimiter {
    shared: Arc<Shared>,
}

/// Builder for a [`MultiTierLimiter`].
pub struct MultiTierLimiterBuilder {
    name: String,
    clock: Arc<dyn Clock>,
    jitter: f64,
    global_rate: Rate,
    global_burst: f64,
    default_route_rate: Rate,
    default_route_burst: f64,
    route_patterns: Vec<RoutePattern>,
    default_resource: Option<(Rate, f64)>,
    event_listeners: EventListeners<RateLimiterEvent>,
    obs: Observability,
}

impl Default for MultiTierLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiTierLimiterBuilder {
    /// Creates a builder with a zero-rate global bucket (never admits until
    /// configured) and no route or resource tiers.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            clock: Arc::new(ion_core::RealClock::new()),
            jitter: 0.0,
            global_rate: Rate::zero(),
            global_burst: 0.0,
            default_route_rate: Rate::zero(),
            default_route_burst: 0.0,
            route_patterns: Vec::new(),
            default_resource: None,
            event_listeners: EventListeners::new(),
            obs: Observability::default(),
        }
    }

    /// Sets the name used in events and metric labels.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the jitter fraction applied to per-tier waits.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Configures the global bucket's rate and burst.
    pub fn global(mut self, rate: Rate, burst: f64) -> Self {
        self.global_rate = rate;
        self.global_burst = burst;
        self
    }

    /// Configures the rate and burst used for routes with no matching
    /// pattern.
    pub fn default_route(mut self, rate: Rate, burst: f64) -> Self {
        self.default_route_rate = rate;
        self.default_route_burst = burst;
        self
    }

    /// Registers a route pattern (e.g. `"GET:/channels/{id}/messages"`)
    /// with its own rate and burst. Patterns are tried in registration
    /// order after an exact match fails.
    pub fn route_pattern(mut self, pattern: impl Into<String>, rate: Rate, burst: f64) -> Self {
        self.route_patterns.push(RoutePattern {
            pattern: pattern.into(),
            rate,
            burst,
        });
        self
    }

    /// Enables the resource tier with a single shared rate and burst
    /// applied to every distinct resource key. Without this call, no
    /// resource tier is ever consulted, even if a request carries a
    /// resource identity.
    pub fn default_resource(mut self, rate: Rate, burst: f64) -> Self {
        self.default_resource = Some((rate, burst));
        self
    }

    /// Sets the observability sinks (logger, metrics, tracer).
    pub fn observability(mut self, obs: Observability) -> Self {
        self.obs = obs;
        self
    }

    /// Registers a callback invoked when any tier denies a request.
    pub fn on_denied<F>(mut self, f: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event| {
            if let RateLimiterEvent::Denied { tier, .. } = event {
                f(tier.clone());
            }
        }));
        self
    }

    /// Builds the limiter.
    pub fn build(self) -> MultiTierLimiter {
        let global = TokenBucket::builder()
            .rate(self.global_rate)
            .burst(self.global_burst)
            .clock(Arc::clone(&self.clock))
            .jitter(self.jitter)
            .name(format!("{}:global", self.name))
            .build();

        MultiTierLimiter {
            shared: Arc::new(Shared {
                name: self.name,
                clock: self.clock,
                jitter: self.jitter,
                global,
                default_route: (self.default_route_rate, self.default_route_burst),
                route_patterns: self.route_patterns,
                default_resource: self.default_resource,
                route_buckets: Mutex::new(HashMap::new()),
                resource_buckets: Mutex::new(HashMap::new()),
                bucket_mapping: Mutex::new(HashMap::new()),
                pause_until: Mutex::new(None),
                counters: Mutex::new(Counters::default()),
                event_listeners: self.event_listeners,
                obs: self.obs,
            }),
        }
    }
}

enum Tier {
    Global,
    Route,
    Resource,
}

impl Tier {
    fn label(&self) -> &'static str {
        match self {
            Tier::Global => "global",
            Tier::Route => "route",
            Tier::Resource => "resource",
        }
    }
}

impl MultiTierLimiter {
    /// Starts building a multi-tier limiter.
    pub fn builder() -> MultiTierLimiterBuilder {
        MultiTierLimiterBuilder::new()
    }

    fn route_bucket(&self, req: &Request) -> TokenBucket {
        let match_key = req.match_key();
        let bucket_key = req.bucket_key(&match_key);

        let mut buckets = self.shared.route_buckets.lock().unwrap();
        if let Some(bucket) = buckets.get(&bucket_key) {
            return bucket.clone();
        }

        let (rate, burst) = self
            .shared
            .route_patterns
            .iter()
            .find(|p| p.pattern == match_key)
            .or_else(|| {
                self.shared
                    .route_patterns
                    .iter()
                    .find(|p| key::positional_match(&p.pattern, &match_key))
            })
            .map(|p| (p.rate, p.burst))
            .unwrap_or(self.shared.default_route);

        let bucket = TokenBucket::builder()
            .rate(rate)
            .burst(burst)
            .clock(Arc::clone(&self.shared.clock))
            .jitter(self.shared.jitter)
            .name(format!("{}:route:{}", self.shared.name, bucket_key))
            .build();
        buckets.insert(bucket_key, bucket.clone());
        bucket
    }

    fn resource_bucket(&self, resource_key: &str) -> Option<TokenBucket> {
        let (rate, burst) = self.shared.default_resource?;
        let mut buckets = self.shared.resource_buckets.lock().unwrap();
        if let Some(bucket) = buckets.get(resource_key) {
            return Some(bucket.clone());
        }
        let bucket = TokenBucket::builder()
            .rate(rate)
            .burst(burst)
            .clock(Arc::clone(&self.shared.clock))
            .jitter(self.shared.jitter)
            .name(format!("{}:resource:{}", self.shared.name, resource_key))
            .build();
        buckets.insert(resource_key.to_string(), bucket.clone());
        Some(bucket)
    }

    fn is_paused_at(&self, now: Instant) -> bool {
        matches!(*self.shared.pause_until.lock().unwrap(), Some(until) if now < until)
    }

    /// Checks global, then route, then resource tier in order. The first
    /// tier that denies stops the check — later tiers are not consulted
    /// and do not have tokens deducted. Always denies while paused.
    pub fn allow_n(&self, req: &Request, n: i64) -> bool {
        let now = self.shared.clock.now();
        if self.is_paused_at(now) {
            self.deny(Tier::Global);
            return false;
        }

        if !self.shared.global.allow_n(n) {
            self.deny(Tier::Global);
            return false;
        }

        let route_bucket = self.route_bucket(req);
        if !route_bucket.allow_n(n) {
            self.deny(Tier::Route);
            return false;
        }

        if let Some(resource_key) = req.resource_key() {
            if let Some(resource_bucket) = self.resource_bucket(&resource_key) {
                if !resource_bucket.allow_n(n) {
                    self.deny(Tier::Resource);
                    return false;
                }
            }
        }

        self.admit(Duration::ZERO);
        true
    }

    /// Waits sequentially on each applicable tier, honoring `req.ctx`
    /// cancellation and an active pause.
    pub async fn wait_n(&self, req: &Request, n: i64) -> Result<()> {
        let start = self.shared.clock.now();

        loop {
            let pause_until = *self.shared.pause_until.lock().unwrap();
            match pause_until {
                Some(until) if self.shared.clock.now() < until => {
                    let wait = until.saturating_duration_since(self.shared.clock.now());
                    tokio::select! {
                        _ = self.shared.clock.sleep(wait) => {}
                        _ = req.ctx.canceled() => {
                            return Err(req.ctx.cancellation_error());
                        }
                    }
                }
                _ => break,
            }
        }

        self.shared.global.wait_n(&req.ctx, n).await?;
        let route_bucket = self.route_bucket(req);
        route_bucket.wait_n(&req.ctx, n).await?;
        if let Some(resource_key) = req.resource_key() {
            if let Some(resource_bucket) = self.resource_bucket(&resource_key) {
                resource_bucket.wait_n(&req.ctx, n).await?;
            }
        }

        let waited = self.shared.clock.now().saturating_duration_since(start);
        self.admit(waited);
        Ok(())
    }

    /// Sets an absolute pause deadline. Admission is denied (and waits
    /// sleep) until this instant.
    pub fn pause_until(&self, until: Instant) {
        *self.shared.pause_until.lock().unwrap() = Some(until);
        self.shared.event_listeners.emit(&RateLimiterEvent::Paused {
            limiter_name: self.shared.name.clone(),
            timestamp: self.shared.clock.now(),
            until,
        });
    }

    /// Sets a pause deadline `duration` from now.
    pub fn pause_for(&self, duration: Duration) {
        self.pause_until(self.shared.clock.now() + duration);
    }

    /// Clears any active pause.
    pub fn resume(&self) {
        *self.shared.pause_until.lock().unwrap() = None;
        self.shared.event_listeners.emit(&RateLimiterEvent::Resumed {
            limiter_name: self.shared.name.clone(),
            timestamp: self.shared.clock.now(),
        });
    }

    /// True if a pause deadline is set and has not yet elapsed.
    pub fn is_paused(&self) -> bool {
        self.is_paused_at(self.shared.clock.now())
    }

    /// Ingests `X-RateLimit-*` response headers for `req`. Recognizes a
    /// reported bucket id (recording the route-key mapping for
    /// observability) and a global reset (arming a pause). Never resizes
    /// a bucket's configured rate or burst — this crate treats the
    /// headers as a signal to react to, not a source of truth to copy
    /// configuration from.
    pub fn update_from_headers(&self, req: &Request, headers: &Headers) {
        let parsed = RateLimitHeaders::parse(headers);

        if let Some(bucket) = parsed.bucket {
            let match_key = req.match_key();
            self.shared.bucket_mapping.lock().unwrap().insert(match_key, bucket);
        }

        if parsed.global {
            if let Some(reset_after) = parsed.reset_after_secs {
                if reset_after > 0.0 {
                    self.pause_for(Duration::from_secs_f64(reset_after));
                }
            }
        }
    }

    /// Returns the external bucket id last reported for `req`'s route, if
    /// any was recorded via [`MultiTierLimiter::update_from_headers`].
    pub fn bucket_id_for(&self, req: &Request) -> Option<String> {
        self.shared.bucket_mapping.lock().unwrap().get(&req.match_key()).cloned()
    }

    /// Restores every owned bucket's tokens to its burst, clears the
    /// denial counters and wait statistics, and clears any active pause.
    pub fn reset(&self) {
        self.shared.global.drain_to(self.shared.global.burst());
        for bucket in self.shared.route_buckets.lock().unwrap().values() {
            bucket.drain_to(bucket.burst());
        }
        for bucket in self.shared.resource_buckets.lock().unwrap().values() {
            bucket.drain_to(bucket.burst());
        }
        *self.shared.counters.lock().unwrap() = Counters::default();
        *self.shared.pause_until.lock().unwrap() = None;
        self.shared.event_listeners.emit(&RateLimiterEvent::Reset {
            limiter_name: self.shared.name.clone(),
            timestamp: self.shared.clock.now(),
        });
    }

    /// Snapshot of denial counters, one per tier.
    pub fn denied_counts(&self) -> (u64, u64, u64) {
        let counters = self.shared.counters.lock().unwrap();
        (counters.global_denied, counters.route_denied, counters.resource_denied)
    }

    /// Mean and maximum wait durations recorded by `wait_n`.
    pub fn wait_stats(&self) -> (Duration, Duration) {
        let counters = self.shared.counters.lock().unwrap();
        (Duration::from_secs_f64(counters.wait.mean_secs), counters.wait.max)
    }

    fn deny(&self, tier: Tier) {
        {
            let mut counters = self.shared.counters.lock().unwrap();
            match tier {
                Tier::Global => counters.global_denied += 1,
                Tier::Route => counters.route_denied += 1,
                Tier::Resource => counters.resource_denied += 1,
            }
        }
        let event = RateLimiterEvent::Denied {
            limiter_name: self.shared.name.clone(),
            timestamp: self.shared.clock.now(),
            tier: tier.label().to_string(),
        };
        self.shared.event_listeners.emit(&event);
        self.shared.obs.metrics.inc(
            "ion_ratelimit_requests_total",
            &[("limiter_name", &self.shared.name), ("result", &"denied")],
        );
    }

    fn admit(&self, waited: Duration) {
        if !waited.is_zero() {
            self.shared.counters.lock().unwrap().wait.record(waited);
            self.shared.obs.metrics.histogram(
                "ion_ratelimit_wait_duration_seconds",
                waited.as_secs_f64(),
                &[("limiter_name", &self.shared.name)],
            );
        }
        let event = RateLimiterEvent::Admitted {
            limiter_name: self.shared.name.clone(),
            timestamp: self.shared.clock.now(),
            tier: "multi_tier".to_string(),
            wait_duration: waited,
        };
        self.shared.event_listeners.emit(&event);
        self.shared.obs.metrics.inc(
            "ion_ratelimit_requests_total",
            &[("limiter_name", &self.shared.name), ("result", &"allowed")],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ion_core::TestClock;

    fn ctx() -> Ctx {
        Ctx::new()
    }

    #[test]
    fn route_normalization_shares_a_bucket_s6() {
        let limiter = MultiTierLimiter::builder()
            .global(Rate::new(1000.0).unwrap(), 1000.0)
            .default_route(Rate::new(1000.0).unwrap(), 5.0)
            .build();

        for i in 0..5 {
            let req = Request::new("GET", format!("/channels/{i}/messages"), ctx());
            assert!(limiter.allow_n(&req, 1));
        }

        let sixth = Request::new("GET", "/channels/999/messages", ctx());
        assert!(!limiter.allow_n(&sixth, 1));
    }

    #[test]
    fn global_denial_blocks_route_and_resource_without_consuming() {
        let limiter = MultiTierLimiter::builder()
            .global(Rate::new(1.0).unwrap(), 0.0)
            .default_route(Rate::new(1000.0).unwrap(), 1000.0)
            .default_resource(Rate::new(1000.0).unwrap(), 1000.0)
            .build();

        let req = Request::new("GET", "/x", ctx()).user_id("u1");
        assert!(!limiter.allow_n(&req, 1));

        let (global_denied, route_denied, resource_denied) = limiter.denied_counts();
        assert_eq!(global_denied, 1);
        assert_eq!(route_denied, 0);
        assert_eq!(resource_denied, 0);
    }

    #[test]
    fn route_pattern_is_matched_positionally() {
        let limiter = MultiTierLimiter::builder()
            .global(Rate::new(1000.0).unwrap(), 1000.0)
            .default_route(Rate::new(1000.0).unwrap(), 1000.0)
            .route_pattern("GET:/channels/{id}/messages", Rate::new(1000.0).unwrap(), 2.0)
            .build();

        let a = Request::new("GET", "/channels/1/messages", ctx());
        let b = Request::new("GET", "/channels/2/messages", ctx());
        assert!(limiter.allow_n(&a, 1));
        assert!(limiter.allow_n(&b, 1));
        assert!(!limiter.allow_n(&a, 1));
    }

    #[test]
    fn pause_denies_all_tiers() {
        let test_clock = TestClock::new();
        let limiter = MultiTierLimiter::builder()
            .clock(Arc::new(test_clock.clone()))
            .global(Rate::new(1000.0).unwrap(), 1000.0)
            .default_route(Rate::new(1000.0).unwrap(), 1000.0)
            .build();

        limiter.pause_for(Duration::from_secs(5));
        assert!(limiter.is_paused());

        let req = Request::new("GET", "/x", ctx());
        assert!(!limiter.allow_n(&req, 1));

        test_clock.advance(Duration::from_secs(5));
        assert!(!limiter.is_paused());
        assert!(limiter.allow_n(&req, 1));
    }

    #[test]
    fn update_from_headers_arms_global_pause_and_records_bucket_mapping() {
        let limiter = MultiTierLimiter::builder()
            .global(Rate::new(1000.0).unwrap(), 1000.0)
            .default_route(Rate::new(1000.0).unwrap(), 1000.0)
            .build();

        let req = Request::new("GET", "/x", ctx());
        let headers = Headers::from_pairs([
            ("X-RateLimit-Global", "true"),
            ("X-RateLimit-Reset-After", "2"),
            ("X-RateLimit-Bucket", "bucket-abc"),
        ]);
        limiter.update_from_headers(&req, &headers);

        assert!(limiter.is_paused());
        assert_eq!(limiter.bucket_id_for(&req).as_deref(), Some("bucket-abc"));
    }

    #[test]
    fn reset_clears_counters_and_pause_and_refills_buckets() {
        let limiter = MultiTierLimiter::builder()
            .global(Rate::new(1.0).unwrap(), 1.0)
            .default_route(Rate::new(1.0).unwrap(), 1.0)
            .build();

        let req = Request::new("GET", "/x", ctx());
        assert!(limiter.allow_n(&req, 1));
        assert!(!limiter.allow_n(&req, 1));
        limiter.pause_for(Duration::from_secs(1));

        limiter.reset();
        assert_eq!(limiter.denied_counts(), (0, 0, 0));
        assert!(!limiter.is_paused());
        assert!(limiter.allow_n(&req, 1));
    }

    #[tokio::test]
    async fn wait_n_is_canceled_by_ctx() {
        let limiter = MultiTierLimiter::builder()
            .global(Rate::new(1.0).unwrap(), 1.0)
            .default_route(Rate::new(1.0).unwrap(), 1.0)
            .build();

        let c = ctx();
        let req = Request::new("GET", "/x", c.clone());
        assert!(limiter.allow_n(&req, 1));
        c.cancel_because("bye");

        let err = limiter.wait_n(&req, 1).await.unwrap_err();
        assert!(err.is_canceled());
    }
}
