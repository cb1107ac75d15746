//! Pool configuration structures.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{ConfigError, Tag};

/// Environment variable holding the pool-wide limit.
pub const ENV_LIMIT: &str = "TAG_POOL_LIMIT";
/// Environment variable holding tag capacities as `name=cap,name=cap`.
pub const ENV_TAGS: &str = "TAG_POOL_TAGS";
/// Environment variable enabling iteration mode (`true`/`false`/`1`/`0`).
pub const ENV_ITERATION: &str = "TAG_POOL_ITERATION";

/// Polling intervals of the pool's cooperative loops, in milliseconds.
///
/// Shorter intervals lower latency at the cost of CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollIntervals {
    /// Result monitor tick.
    pub monitor_ms: u64,
    /// Upper bound of one token-acquire attempt in `put` and `adjust`.
    pub admission_ms: u64,
    /// Empty-read timeout of the result iterator.
    pub iterator_ms: u64,
    /// Quiescence check period of `join`.
    pub join_ms: u64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            monitor_ms: 10,
            admission_ms: 50,
            iterator_ms: 100,
            join_ms: 100,
        }
    }
}

impl PollIntervals {
    /// Result monitor tick.
    #[must_use]
    pub const fn monitor(&self) -> Duration {
        Duration::from_millis(self.monitor_ms)
    }

    /// Token-acquire attempt bound.
    #[must_use]
    pub const fn admission(&self) -> Duration {
        Duration::from_millis(self.admission_ms)
    }

    /// Iterator empty-read timeout.
    #[must_use]
    pub const fn iterator(&self) -> Duration {
        Duration::from_millis(self.iterator_ms)
    }

    /// `join` polling period.
    #[must_use]
    pub const fn join(&self) -> Duration {
        Duration::from_millis(self.join_ms)
    }

    /// Every interval must be non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInterval`] naming the first zero field.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor_ms == 0 {
            return Err(ConfigError::InvalidInterval("monitor_ms"));
        }
        if self.admission_ms == 0 {
            return Err(ConfigError::InvalidInterval("admission_ms"));
        }
        if self.iterator_ms == 0 {
            return Err(ConfigError::InvalidInterval("iterator_ms"));
        }
        if self.join_ms == 0 {
            return Err(ConfigError::InvalidInterval("join_ms"));
        }
        Ok(())
    }
}

/// Pool configuration.
///
/// `tags` maps tag names to capacities; the empty name is the general pool.
/// `limit` is the pool-wide size: with no tags it becomes the general pool,
/// otherwise any excess over the tag sum does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool-wide limit; `0` means "exactly the sum of `tags`".
    #[serde(default)]
    pub limit: usize,
    /// Capacity per tag name.
    #[serde(default)]
    pub tags: BTreeMap<String, usize>,
    /// Whether results are queued for [`TagPool::iter`](crate::core::TagPool::iter).
    #[serde(default)]
    pub iteration: bool,
    /// Poll intervals.
    #[serde(default)]
    pub intervals: PollIntervals,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            limit: num_cpus::get(),
            tags: BTreeMap::new(),
            iteration: false,
            intervals: PollIntervals::default(),
        }
    }
}

impl PoolConfig {
    /// A general pool of `limit` slots and nothing else.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Capacity per tag at construction.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::LimitBelowTags`] if a non-zero `limit` is smaller than
    ///   the tag sum
    /// - [`ConfigError::ZeroCapacity`] if the total is zero
    pub fn initial_capacities(&self) -> Result<BTreeMap<Tag, usize>, ConfigError> {
        let mut capacities = BTreeMap::new();
        for (name, capacity) in &self.tags {
            *capacities.entry(Tag::named(name.as_str())).or_insert(0) += capacity;
        }

        if self.tags.is_empty() {
            capacities.insert(Tag::General, self.limit);
        } else {
            let reserved: usize = capacities.values().sum();
            if self.limit > 0 && self.limit != reserved {
                if self.limit < reserved {
                    return Err(ConfigError::LimitBelowTags {
                        limit: self.limit,
                        reserved,
                    });
                }
                *capacities.entry(Tag::General).or_insert(0) += self.limit - reserved;
            }
        }

        if capacities.values().sum::<usize>() == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(capacities)
    }

    /// Validate intervals and the capacity layout.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.intervals.validate()?;
        self.initial_capacities().map(|_| ())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON, or the validation
    /// error.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read configuration from the environment, loading `.env` first if
    /// present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] for unparsable variables, or the
    /// validation error.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build configuration from a variable lookup.
    ///
    /// When `TAG_POOL_TAGS` is set and `TAG_POOL_LIMIT` is not, the limit is
    /// the tag sum.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(ENV_TAGS) {
            cfg.tags = parse_tags(&raw).map_err(|reason| ConfigError::Env {
                name: ENV_TAGS,
                reason,
            })?;
            cfg.limit = 0;
        }
        if let Some(raw) = lookup(ENV_LIMIT) {
            cfg.limit = raw.trim().parse().map_err(|e| ConfigError::Env {
                name: ENV_LIMIT,
                reason: format!("{e}"),
            })?;
        }
        if let Some(raw) = lookup(ENV_ITERATION) {
            cfg.iteration = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(ConfigError::Env {
                        name: ENV_ITERATION,
                        reason: format!("expected a boolean, got `{other}`"),
                    })
                }
            };
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

/// Parse `name=cap,name=cap`. Whitespace around items is ignored.
fn parse_tags(raw: &str) -> Result<BTreeMap<String, usize>, String> {
    let mut tags = BTreeMap::new();
    for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let (name, capacity) = item
            .split_once('=')
            .ok_or_else(|| format!("`{item}` is not of the form name=capacity"))?;
        let capacity = capacity
            .trim()
            .parse::<usize>()
            .map_err(|e| format!("capacity of `{}`: {e}", name.trim()))?;
        tags.insert(name.trim().to_string(), capacity);
    }
    Ok(tags)
}
