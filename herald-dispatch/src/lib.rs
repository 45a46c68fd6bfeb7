//! Outbound message dispatch for herald
//!
//! A [`Dispatcher`] records every message idempotently, resolves the channel
//! instance it goes out through, gates the send behind a per-channel
//! [`CircuitBreaker`] and [`RateLimiter`], hands it to a [`Transport`] and
//! reconciles the broker's answer (and later acknowledgements) into the record
//! with a forward-only status machine.

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod normalizer;
pub mod notify;
pub mod policy;
pub mod processor;
pub mod rate_limiter;
pub mod reconciler;
pub mod resolver;
pub mod state;
pub mod transport;

pub use circuit_breaker::{
    Admission, BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
    CircuitOpen, CircuitState, FailureOutcome,
};
pub use config::{ConfigError, DispatchConfig};
pub use error::{DispatchError, ErrorKind, FailedAttempt, TransportError};
pub use normalizer::{NormalizedError, normalize};
pub use notify::{BroadcastSink, Notification, NotificationSink, NullSink};
pub use policy::DispatchPipeline;
pub use processor::{Dispatcher, DispatcherBuilder, SendRequest};
pub use rate_limiter::{RateLimitAlgorithm, RateLimitConfig, RateLimitStats, RateLimiter, TokenBucket};
pub use reconciler::{Acknowledgement, Applied, Reconciler, Transition};
pub use resolver::{InstanceResolver, Resolution};
pub use state::{CounterExt, KeyedStore, MemoryKeyedStore, channel_key};
pub use transport::{
    HttpTransport, HttpTransportConfig, MockTransport, OutboundPayload, SendOptions, Transport,
    TransportReceipt,
};
