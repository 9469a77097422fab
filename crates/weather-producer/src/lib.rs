//! Weather event producer.
//!
//! Polls a weather API for a single location at a fixed interval and publishes
//! every snapshot, serialized as JSON, to a Zenoh topic:
//! - `WeatherSource` fetches a snapshot (`WeatherApiClient` talks to weatherapi.com)
//! - `EventPublisher` enqueues and flushes messages (`ZenohPublisher`)
//! - `PollingLoop` drives fetch → publish → flush → sleep until shutdown
//!
//! Both collaborators are owned by the loop and injected at construction, so
//! the loop can be exercised with in-memory implementations.

pub mod config;
pub mod error;
pub mod polling;
pub mod publisher;
pub mod shutdown;
pub mod snapshot;
pub mod source;
pub mod zenoh_session;

pub use config::{ConfigError, LoopConfig, ProducerConfig, Settings};
pub use error::IterationError;
pub use polling::{LoopReport, LoopState, PollingLoop};
pub use publisher::{EventPublisher, PublishError, ZenohPublisher};
pub use snapshot::{PublishRequest, WeatherSnapshot};
pub use source::{FetchError, WeatherApiClient, WeatherSource};
