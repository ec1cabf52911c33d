//! Engine configuration
//!
//! Every option structure can be built in code with `with_*` setters or
//! deserialized from TOML. Durations are written in milliseconds:
//!
//! ```toml
//! [transaction]
//! isolation_level = "serializable"
//! timeout = 5000
//! retry_attempts = 5
//!
//! [batch]
//! continue_on_error = true
//! savepoints = true
//!
//! [pool]
//! max_connections = 20
//! ```

use crate::types::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("Validation error: {0}")]
	Validation(String),
}

/// Options for a single `execute_transaction` call
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
	pub isolation_level: IsolationLevel,
	/// Upper bound for one attempt of the unit of work
	#[serde(with = "duration_millis")]
	pub timeout: Duration,
	/// Total number of attempts, including the first one
	pub retry_attempts: u32,
	/// Base of the linear backoff between attempts
	#[serde(with = "duration_millis")]
	pub retry_delay: Duration,
}

impl Default for TransactionOptions {
	fn default() -> Self {
		Self {
			isolation_level: IsolationLevel::ReadCommitted,
			timeout: Duration::from_secs(30),
			retry_attempts: 3,
			retry_delay: Duration::from_millis(1000),
		}
	}
}

impl TransactionOptions {
	/// Create options with default values
	///
	/// # Examples
	///
	/// ```
	/// use std::time::Duration;
	/// use tessera_tx::{IsolationLevel, TransactionOptions};
	///
	/// let options = TransactionOptions::new();
	/// assert_eq!(options.isolation_level, IsolationLevel::ReadCommitted);
	/// assert_eq!(options.timeout, Duration::from_secs(30));
	/// assert_eq!(options.retry_attempts, 3);
	/// assert_eq!(options.retry_delay, Duration::from_millis(1000));
	/// ```
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
		self.isolation_level = level;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
		self.retry_attempts = attempts;
		self
	}

	pub fn with_retry_delay(mut self, delay: Duration) -> Self {
		self.retry_delay = delay;
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.timeout.is_zero() {
			return Err(ConfigError::Validation(
				"transaction timeout must be greater than zero".to_string(),
			));
		}
		if self.retry_attempts == 0 {
			return Err(ConfigError::Validation(
				"retry_attempts must be at least 1".to_string(),
			));
		}
		Ok(())
	}
}

/// Options for `execute_batch`
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
	/// Record failed operations and keep going instead of aborting
	pub continue_on_error: bool,
	/// Wrap each operation in its own savepoint
	pub savepoints: bool,
	/// Options of the enclosing transaction
	pub transaction: TransactionOptions,
}

impl BatchOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
		self.continue_on_error = continue_on_error;
		self
	}

	pub fn with_savepoints(mut self, savepoints: bool) -> Self {
		self.savepoints = savepoints;
		self
	}

	pub fn with_transaction(mut self, options: TransactionOptions) -> Self {
		self.transaction = options;
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		self.transaction.validate()
	}
}

/// Options for `execute_distributed_transaction`
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedOptions {
	/// Upper bound for each participant call; exceeding it fails that call
	#[serde(with = "duration_millis_opt")]
	pub phase_timeout: Option<Duration>,
	/// Roll back prepared participants when a later prepare fails
	pub rollback_on_prepare_failure: bool,
}

impl DistributedOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
		self.phase_timeout = Some(timeout);
		self
	}

	pub fn with_rollback_on_prepare_failure(mut self, enabled: bool) -> Self {
		self.rollback_on_prepare_failure = enabled;
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.phase_timeout.is_some_and(|t| t.is_zero()) {
			return Err(ConfigError::Validation(
				"phase_timeout must be greater than zero".to_string(),
			));
		}
		Ok(())
	}
}

/// Pool configuration used when a driver adapter opens its own sqlx pool
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
	pub max_connections: u32,
	pub min_connections: u32,
	#[serde(with = "duration_millis")]
	pub acquire_timeout: Duration,
	#[serde(with = "duration_millis_opt")]
	pub max_lifetime: Option<Duration>,
	#[serde(with = "duration_millis_opt")]
	pub idle_timeout: Option<Duration>,
	pub test_before_acquire: bool,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			max_connections: 10,
			min_connections: 1,
			acquire_timeout: Duration::from_secs(30),
			max_lifetime: Some(Duration::from_secs(1800)),
			idle_timeout: Some(Duration::from_secs(600)),
			test_before_acquire: false,
		}
	}
}

impl PoolConfig {
	/// Create a new pool configuration with default values
	///
	/// # Examples
	///
	/// ```
	/// use tessera_tx::PoolConfig;
	///
	/// let config = PoolConfig::new();
	/// assert_eq!(config.max_connections, 10);
	/// ```
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_max_connections(mut self, max: u32) -> Self {
		self.max_connections = max;
		self
	}

	pub fn with_min_connections(mut self, min: u32) -> Self {
		self.min_connections = min;
		self
	}

	pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
		self.acquire_timeout = timeout;
		self
	}

	pub fn with_max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
		self.max_lifetime = lifetime;
		self
	}

	pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.idle_timeout = timeout;
		self
	}

	pub fn with_test_before_acquire(mut self, test: bool) -> Self {
		self.test_before_acquire = test;
		self
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_connections == 0 {
			return Err(ConfigError::Validation(
				"max_connections must be greater than zero".to_string(),
			));
		}
		if self.max_connections < self.min_connections {
			return Err(ConfigError::Validation(
				"max_connections must be >= min_connections".to_string(),
			));
		}
		Ok(())
	}
}

/// All engine settings, as loaded from a settings file
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
	pub transaction: TransactionOptions,
	pub batch: BatchOptions,
	pub distributed: DistributedOptions,
	pub pool: PoolConfig,
}

impl EngineSettings {
	/// Parse and validate settings from a TOML document
	///
	/// Missing tables and fields fall back to their defaults.
	///
	/// # Examples
	///
	/// ```
	/// use std::time::Duration;
	/// use tessera_tx::EngineSettings;
	///
	/// let settings = EngineSettings::from_toml_str(
	///     r#"
	///     [transaction]
	///     retry_delay = 250
	///     "#,
	/// )
	/// .unwrap();
	/// assert_eq!(settings.transaction.retry_delay, Duration::from_millis(250));
	/// assert_eq!(settings.transaction.retry_attempts, 3);
	/// ```
	pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
		let settings: EngineSettings = toml::from_str(contents)?;
		settings.validate()?;
		Ok(settings)
	}

	/// Load settings from a TOML file
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&contents)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		self.transaction.validate()?;
		self.batch.validate()?;
		self.distributed.validate()?;
		self.pool.validate()
	}
}

/// Serde support for `Duration` as integer milliseconds.
mod duration_millis {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use std::time::Duration;

	pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		u64::try_from(duration.as_millis())
			.unwrap_or(u64::MAX)
			.serialize(serializer)
	}

	pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

/// Serde support for `Option<Duration>` as integer milliseconds.
mod duration_millis_opt {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use std::time::Duration;

	pub(super) fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		duration
			.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
			.serialize(serializer)
	}

	pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
	}
}
