//! Service configuration, read from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `HTTP_PORT` | 8080 | HTTP listen port |
//! | `SERVICE_MODE` | `combined` | `combined`, `api`, `worker` or `event` |
//! | `WORKER_MODE` | unset | `true` forces `worker` |
//! | `PAYMENT_CAPACITY` | 5 | concurrent payments |
//! | `PAYMENT_SERVICE_MS` | 3000 | simulated payment duration |
//! | `NUM_WORKERS` | 1 | consumer pool workers |
//! | `POLL_WAIT_SECS` | 20 | long-poll wait |
//! | `POLL_BATCH_SIZE` | 10 | messages per receive, 1 to 10 |
//! | `VISIBILITY_TIMEOUT_SECS` | 30 | receive visibility window |
//! | `HANDOFF_CAPACITY` | 100 | poll loop to worker queue size |
//! | `POLL_BACKOFF_SECS` | 5 | sleep after a failed receive |
//! | `DEDUP_WINDOW` | 10000 | settled order ids remembered |
//! | `ORDER_TOPIC` | `order-processing-events` | pub/sub topic |
//! | `SHUTDOWN_TIMEOUT_SECS` | 10 | graceful shutdown bound |
//!
//! Unset variables take their default. A variable that is set but does not parse is an
//! error, not a silent fallback.
//!
//! ```ignore
//! SERVICE_MODE=combined NUM_WORKERS=5 cargo run -p order-service
//! ```

use order_pipeline::broker::MAX_BATCH_SIZE;
use order_pipeline::{ConsumerConfig, GateConfig};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TOPIC: &str = "order-processing-events";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{var} {reason}")]
    OutOfRange { var: &'static str, reason: String },
}

/// Which parts of the service this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceMode {
    /// HTTP endpoints only. `/orders/async` answers `503` since nothing here consumes
    /// the queue.
    Api,
    /// Queue consumer pool only. Needs a queue shared between processes, so it is
    /// refused at startup with the in-memory transport.
    Worker,
    /// HTTP endpoints and the consumer pool, sharing one payment gate.
    #[default]
    Combined,
    /// Handle one serverless event read from stdin, then exit.
    Event,
}

impl ServiceMode {
    pub fn consumes_queue(self) -> bool {
        matches!(self, ServiceMode::Worker | ServiceMode::Combined)
    }
}

impl FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(ServiceMode::Api),
            "worker" => Ok(ServiceMode::Worker),
            "combined" => Ok(ServiceMode::Combined),
            "event" => Ok(ServiceMode::Event),
            other => Err(format!("unknown mode {other:?}")),
        }
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceMode::Api => "api",
            ServiceMode::Worker => "worker",
            ServiceMode::Combined => "combined",
            ServiceMode::Event => "event",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub mode: ServiceMode,
    pub gate: GateConfig,
    pub consumer: ConsumerConfig,
    pub topic: String,
    pub shutdown_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            mode: ServiceMode::default(),
            gate: GateConfig::default(),
            consumer: ConsumerConfig::default(),
            topic: DEFAULT_TOPIC.to_string(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServiceConfig {
    /// Loads and validates the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();

        let mut mode = env.parse("SERVICE_MODE", defaults.mode)?;
        if env.parse("WORKER_MODE", false)? {
            mode = ServiceMode::Worker;
        }

        let config = Self {
            http_port: env.parse("HTTP_PORT", defaults.http_port)?,
            mode,
            gate: GateConfig {
                capacity: env.parse("PAYMENT_CAPACITY", defaults.gate.capacity)?,
                service_time: Duration::from_millis(env.parse(
                    "PAYMENT_SERVICE_MS",
                    defaults.gate.service_time.as_millis() as u64,
                )?),
            },
            consumer: ConsumerConfig {
                workers: env.parse("NUM_WORKERS", defaults.consumer.workers)?,
                handoff_capacity: env
                    .parse("HANDOFF_CAPACITY", defaults.consumer.handoff_capacity)?,
                poll_wait: env.secs("POLL_WAIT_SECS", defaults.consumer.poll_wait)?,
                batch_size: env.parse("POLL_BATCH_SIZE", defaults.consumer.batch_size)?,
                visibility_timeout: env
                    .secs("VISIBILITY_TIMEOUT_SECS", defaults.consumer.visibility_timeout)?,
                error_backoff: env.secs("POLL_BACKOFF_SECS", defaults.consumer.error_backoff)?,
                dedup_window: env.parse("DEDUP_WINDOW", defaults.consumer.dedup_window)?,
            },
            topic: env
                .raw("ORDER_TOPIC")
                .filter(|topic| !topic.trim().is_empty())
                .unwrap_or(defaults.topic),
            shutdown_timeout: env.secs("SHUTDOWN_TIMEOUT_SECS", defaults.shutdown_timeout)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("PAYMENT_CAPACITY", self.gate.capacity),
            ("NUM_WORKERS", self.consumer.workers),
            ("HANDOFF_CAPACITY", self.consumer.handoff_capacity),
        ];
        for (var, value) in positive {
            if value == 0 {
                return Err(ConfigError::OutOfRange {
                    var,
                    reason: "must be at least 1".into(),
                });
            }
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.consumer.batch_size) {
            return Err(ConfigError::OutOfRange {
                var: "POLL_BATCH_SIZE",
                reason: format!("must be between 1 and {MAX_BATCH_SIZE}"),
            });
        }
        Ok(())
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, var: &str) -> Option<String> {
        (self.0)(var)
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.raw(var) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn secs(&self, var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(var, default.as_secs()).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.mode, ServiceMode::Combined);
        assert!(config.mode.consumes_queue());
        assert_eq!(config.gate.capacity, 5);
        assert_eq!(config.gate.service_time, Duration::from_secs(3));
        assert_eq!(config.consumer.workers, 1);
        assert_eq!(config.consumer.handoff_capacity, 100);
        assert_eq!(config.consumer.poll_wait, Duration::from_secs(20));
        assert_eq!(config.consumer.batch_size, 10);
        assert_eq!(config.consumer.visibility_timeout, Duration::from_secs(30));
        assert_eq!(config.consumer.error_backoff, Duration::from_secs(5));
        assert_eq!(config.topic, DEFAULT_TOPIC);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("HTTP_PORT", "9000"),
            ("SERVICE_MODE", "API"),
            ("PAYMENT_CAPACITY", "2"),
            ("PAYMENT_SERVICE_MS", "150"),
            ("NUM_WORKERS", "5"),
            ("POLL_BATCH_SIZE", "4"),
            ("ORDER_TOPIC", "orders"),
        ])
        .unwrap();
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.mode, ServiceMode::Api);
        assert_eq!(config.gate.capacity, 2);
        assert_eq!(config.gate.service_time, Duration::from_millis(150));
        assert_eq!(config.consumer.workers, 5);
        assert_eq!(config.consumer.batch_size, 4);
        assert_eq!(config.topic, "orders");
    }

    #[test]
    fn legacy_worker_switch_wins() {
        let config = load(&[("SERVICE_MODE", "api"), ("WORKER_MODE", "true")]).unwrap();
        assert_eq!(config.mode, ServiceMode::Worker);
        assert!(config.mode.consumes_queue());
    }

    #[test]
    fn unparseable_value_is_an_error() {
        let err = load(&[("NUM_WORKERS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "NUM_WORKERS", .. }));
        assert!(load(&[("SERVICE_MODE", "batch")]).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        for vars in [
            [("PAYMENT_CAPACITY", "0")],
            [("NUM_WORKERS", "0")],
            [("HANDOFF_CAPACITY", "0")],
            [("POLL_BATCH_SIZE", "11")],
            [("POLL_BATCH_SIZE", "0")],
        ] {
            assert!(
                matches!(load(&vars), Err(ConfigError::OutOfRange { .. })),
                "{vars:?}"
            );
        }
    }
}
