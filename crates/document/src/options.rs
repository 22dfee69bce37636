//! Document engine configuration.

use serde::Deserialize;
use thiserror::Error;

/// Default capacity of the document event broadcast.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Default prefix for temporary items written next to the target.
pub const DEFAULT_TEMP_PREFIX: &str = ".xeno-save-";

/// Errors produced while loading [`DocumentOptions`].
#[derive(Debug, Error)]
pub enum OptionsError {
	/// The TOML source could not be parsed.
	#[error("document options parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value is out of range.
	#[error("invalid document option '{option}': {reason}")]
	Invalid {
		option: &'static str,
		reason: &'static str,
	},
}

/// Tunables for one document.
///
/// Loadable from TOML, with missing keys falling back to defaults:
///
/// ```toml
/// interaction-permitted = true
/// event-buffer = 128
/// sync-writes = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct DocumentOptions {
	/// Whether routed errors may wait for the application to resolve them.
	pub interaction_permitted: bool,
	/// Capacity of the [`DocumentEvent`](crate::DocumentEvent) broadcast.
	pub event_buffer: usize,
	/// `fsync` written content before it replaces the target.
	pub sync_writes: bool,
	/// Prefix for temporary sibling items.
	pub temp_prefix: String,
	/// Compare on-disk modification times before overwriting.
	pub detect_conflicts: bool,
}

impl Default for DocumentOptions {
	fn default() -> Self {
		Self {
			interaction_permitted: false,
			event_buffer: DEFAULT_EVENT_BUFFER,
			sync_writes: true,
			temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
			detect_conflicts: true,
		}
	}
}

impl DocumentOptions {
	/// Parses and validates options from TOML.
	pub fn from_toml(source: &str) -> Result<Self, OptionsError> {
		let options: Self = toml::from_str(source)?;
		options.validate()?;
		Ok(options)
	}

	pub fn validate(&self) -> Result<(), OptionsError> {
		if self.event_buffer == 0 {
			return Err(OptionsError::Invalid {
				option: "event-buffer",
				reason: "must be greater than zero",
			});
		}
		if self.temp_prefix.is_empty() || self.temp_prefix.contains(['/', '\\']) {
			return Err(OptionsError::Invalid {
				option: "temp-prefix",
				reason: "must be a non-empty file name prefix",
			});
		}
		Ok(())
	}

	#[must_use]
	pub fn interaction_permitted(mut self, permitted: bool) -> Self {
		self.interaction_permitted = permitted;
		self
	}

	/// Sets the event broadcast capacity.
	///
	/// # Panics
	///
	/// Panics if `size` is zero.
	#[must_use]
	pub fn event_buffer(mut self, size: usize) -> Self {
		assert!(size > 0, "event buffer size must be > 0");
		self.event_buffer = size;
		self
	}

	#[must_use]
	pub fn sync_writes(mut self, sync: bool) -> Self {
		self.sync_writes = sync;
		self
	}

	#[must_use]
	pub fn temp_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.temp_prefix = prefix.into();
		self
	}

	#[must_use]
	pub fn detect_conflicts(mut self, detect: bool) -> Self {
		self.detect_conflicts = detect;
		self
	}
}
