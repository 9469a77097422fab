//! In-memory collaborators for polling loop tests

#![allow(dead_code)]

use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use weather_producer::{
    EventPublisher, FetchError, PublishError, PublishRequest, WeatherSnapshot, WeatherSource,
};

/// What the mock source does on one call.
pub enum Step {
    Snapshot(WeatherSnapshot),
    Fail(u16, &'static str),
    Panic(&'static str),
}

pub fn snapshot(value: serde_json::Value) -> WeatherSnapshot {
    WeatherSnapshot::from_value(value).expect("snapshot must be a JSON object")
}

pub fn paris() -> WeatherSnapshot {
    snapshot(json!({"location": "Paris", "temp_c": 18}))
}

#[derive(Default)]
struct SourceState {
    script: VecDeque<Step>,
    calls: Vec<(String, String)>,
    stop_after: Option<(usize, watch::Sender<()>)>,
}

/// Scripted weather source. Once the script runs out every call returns `paris()`.
#[derive(Clone, Default)]
pub struct MockSource {
    state: Arc<Mutex<SourceState>>,
}

impl MockSource {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState {
                script: script.into(),
                ..Default::default()
            })),
        }
    }

    /// Fire `tx` while serving the `n`th call (1-based).
    pub fn stop_after(self, n: usize, tx: watch::Sender<()>) -> Self {
        self.state.lock().unwrap().stop_after = Some((n, tx));
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl WeatherSource for MockSource {
    async fn fetch(&self, query: &str, lang: &str) -> Result<WeatherSnapshot, FetchError> {
        let step = {
            let mut state = self.state.lock().unwrap();
            state.calls.push((query.to_string(), lang.to_string()));
            let n = state.calls.len();
            if let Some((after, tx)) = &state.stop_after {
                if n == *after {
                    let _ = tx.send(());
                }
            }
            state.script.pop_front()
        };

        match step {
            None => Ok(paris()),
            Some(Step::Snapshot(s)) => Ok(s),
            Some(Step::Fail(status, message)) => Err(FetchError::Api {
                status,
                code: None,
                message: message.to_string(),
            }),
            Some(Step::Panic(message)) => panic!("{}", message),
        }
    }
}

/// Everything the mock publisher saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Publish(PublishRequest),
    Flush,
}

#[derive(Default)]
struct PublisherState {
    events: Vec<Event>,
    pending: usize,
    delivered: Vec<PublishRequest>,
    in_flight: Vec<PublishRequest>,
    fail_publish_calls: Vec<usize>,
    fail_flush: bool,
    publish_calls: usize,
}

/// Records publishes and flushes; "delivers" on flush.
#[derive(Clone, Default)]
pub struct MockPublisher {
    state: Arc<Mutex<PublisherState>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the given publish calls (1-based) with `QueueFull`.
    pub fn failing_publish(self, calls: &[usize]) -> Self {
        self.state.lock().unwrap().fail_publish_calls = calls.to_vec();
        self
    }

    /// Make every flush with pending messages report a delivery failure.
    pub fn failing_flush(self) -> Self {
        self.state.lock().unwrap().fail_flush = true;
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn published(&self) -> Vec<PublishRequest> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Publish(r) => Some(r),
                Event::Flush => None,
            })
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.events().iter().filter(|e| **e == Event::Flush).count()
    }

    pub fn delivered(&self) -> Vec<PublishRequest> {
        self.state.lock().unwrap().delivered.clone()
    }
}

impl EventPublisher for MockPublisher {
    fn publish(&self, request: PublishRequest) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        state.publish_calls += 1;
        let call = state.publish_calls;
        if state.fail_publish_calls.contains(&call) {
            return Err(PublishError::QueueFull { capacity: 0 });
        }
        state.events.push(Event::Publish(request.clone()));
        state.in_flight.push(request);
        state.pending += 1;
        Ok(())
    }

    async fn flush(&self, _timeout: Option<Duration>) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Flush);
        let in_flight = std::mem::take(&mut state.in_flight);
        let failed = in_flight.len();
        state.pending = 0;
        if failed > 0 && state.fail_flush {
            return Err(PublishError::Delivery {
                failed,
                first: "broker unreachable".to_string(),
            });
        }
        state.delivered.extend(in_flight);
        Ok(())
    }
}
