use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::io;
use std::ops::Deref;
use std::path::PathBuf;
use std::time::Duration;

use serde::{de, Deserialize as DeserializeTrait, Deserializer};
use serde_derive::Deserialize;

use glob;

use crate::metric::FieldName;
use crate::storage::StorageError;
use crate::sysfs;

#[derive(Debug)]
pub enum BuildError {
	InvalidSetting { which: String, reason: String },
	UnavailableDevice { which: String, error: io::Error },
	Storage(StorageError),
}

impl fmt::Display for BuildError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::InvalidSetting { which, reason } => {
				write!(f, "invalid setting {}: {}", which, reason)
			}
			Self::UnavailableDevice { which, error } => {
				write!(f, "device for {} unavailable: {}", which, error)
			}
			Self::Storage(e) => write!(f, "failed to set up storage: {}", e),
		}
	}
}

impl Error for BuildError {}

impl From<StorageError> for BuildError {
	fn from(e: StorageError) -> Self {
		Self::Storage(e)
	}
}

/// Longest accepted record interval, in seconds
const MAX_INTERVAL: f64 = 86400.0;

/// Shortest accepted pause between two turbidity samples
const MIN_SAMPLING_PERIOD: Duration = Duration::from_millis(1);

fn default_interval() -> f64 {
	5.0
}

fn default_samples_per_interval() -> u32 {
	20
}

fn default_file_name() -> String {
	"sensors_data.csv".into()
}

fn default_local_dir() -> PathBuf {
	"/srv/sensors".into()
}

fn default_media_root() -> PathBuf {
	"/media/root".into()
}

fn default_hwmon_root() -> PathBuf {
	sysfs::HWMON_ROOT.into()
}

fn default_iio_root() -> PathBuf {
	sysfs::IIO_ROOT.into()
}

#[derive(Debug, Clone)]
pub struct PatternWrap(pub glob::Pattern);

impl Deref for PatternWrap {
	type Target = glob::Pattern;

	fn deref(&self) -> &glob::Pattern {
		&self.0
	}
}

impl<'de> DeserializeTrait<'de> for PatternWrap {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		let pattern = s.parse::<glob::Pattern>().map_err(de::Error::custom)?;
		Ok(PatternWrap(pattern))
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct SysfsConfig {
	#[serde(default = "default_hwmon_root")]
	pub hwmon_root: PathBuf,
	#[serde(default = "default_iio_root")]
	pub iio_root: PathBuf,
}

impl Default for SysfsConfig {
	fn default() -> Self {
		Self {
			hwmon_root: default_hwmon_root(),
			iio_root: default_iio_root(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "class")]
pub enum Channel {
	HwmonTemperature { name: String, sensor: u32 },
	IioVoltage { device: String, channel: u32 },
	IioTemperature { device: String },
	IioPressure { device: String },
}

impl Channel {
	pub fn build(&self, roots: &SysfsConfig) -> io::Result<sysfs::Channel> {
		match self {
			Self::HwmonTemperature { name, sensor } => {
				sysfs::Channel::new(&roots.hwmon_root, name, sysfs::Type::TempInput(*sensor))
			}
			Self::IioVoltage { device, channel } => {
				sysfs::Channel::new(&roots.iio_root, device, sysfs::Type::VoltageRaw(*channel))
			}
			Self::IioTemperature { device } => {
				sysfs::Channel::new(&roots.iio_root, device, sysfs::Type::IioTempInput)
			}
			Self::IioPressure { device } => {
				sysfs::Channel::new(&roots.iio_root, device, sysfs::Type::PressureInput)
			}
		}
	}

	pub fn build_adc(&self, roots: &SysfsConfig) -> Result<sysfs::AdcInput, BuildError> {
		match self {
			Self::IioVoltage { device, channel } => {
				match sysfs::AdcInput::new(&roots.iio_root, device, *channel) {
					Ok(v) => Ok(v),
					Err(e) => Err(BuildError::InvalidSetting {
						which: "turbidity".into(),
						reason: e.to_string(),
					}),
				}
			}
			other => Err(BuildError::InvalidSetting {
				which: "turbidity".into(),
				reason: format!("{:?} does not yield raw converter readings", other),
			}),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
	#[serde(default = "default_local_dir")]
	pub local_dir: PathBuf,
	#[serde(default = "default_file_name")]
	pub file_name: String,
	#[serde(default = "default_media_root")]
	pub media_root: PathBuf,
	pub mount_pattern: Option<PatternWrap>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	/// Seconds between two records
	#[serde(default = "default_interval")]
	pub interval: f64,
	/// Turbidity samples averaged into one record
	#[serde(default = "default_samples_per_interval")]
	pub samples_per_interval: u32,
	pub turbidity: Channel,
	#[serde(default)]
	pub fields: HashMap<String, Channel>,
	pub storage: StorageConfig,
	#[serde(default)]
	pub sysfs: SysfsConfig,
}

impl Config {
	/// Only valid once [`Config::check`] passed.
	pub fn interval(&self) -> Duration {
		Duration::from_secs_f64(self.interval)
	}

	pub fn sampling_period(&self) -> Duration {
		self.interval() / self.samples_per_interval
	}

	/// The configured field channels, keyed by column.
	pub fn field_channels(&self) -> Result<Vec<(FieldName, &Channel)>, BuildError> {
		let mut result = Vec::with_capacity(self.fields.len());
		for (name, channel) in self.fields.iter() {
			match name.parse::<FieldName>() {
				Ok(field) => result.push((field, channel)),
				Err(e) => {
					return Err(BuildError::InvalidSetting {
						which: format!("fields.{}", name),
						reason: e.into(),
					})
				}
			}
		}
		Ok(result)
	}

	pub fn check(&self) -> Option<BuildError> {
		if let Err(e) = self.field_channels() {
			return Some(e);
		}
		if !(self.interval.is_finite() && self.interval > 0.) {
			return Some(BuildError::InvalidSetting {
				which: "interval".into(),
				reason: format!("{} is not a positive number of seconds", self.interval),
			});
		}
		if self.interval > MAX_INTERVAL {
			return Some(BuildError::InvalidSetting {
				which: "interval".into(),
				reason: format!("{} exceeds the maximum of {} seconds", self.interval, MAX_INTERVAL),
			});
		}
		if self.samples_per_interval == 0 {
			return Some(BuildError::InvalidSetting {
				which: "samples_per_interval".into(),
				reason: "must be at least 1".into(),
			});
		}
		if self.sampling_period() < MIN_SAMPLING_PERIOD {
			return Some(BuildError::InvalidSetting {
				which: "samples_per_interval".into(),
				reason: format!(
					"{} samples in {} seconds is more than one per {:?}",
					self.samples_per_interval, self.interval, MIN_SAMPLING_PERIOD
				),
			});
		}
		if self.storage.file_name.is_empty() || self.storage.file_name.contains('/') {
			return Some(BuildError::InvalidSetting {
				which: "storage.file_name".into(),
				reason: format!("{:?} is not a plain file name", self.storage.file_name),
			});
		}
		match self.turbidity {
			Channel::IioVoltage { channel, .. } if channel >= sysfs::ADC_CHANNELS => {
				Some(BuildError::InvalidSetting {
					which: "turbidity.channel".into(),
					reason: format!("must be below {}", sysfs::ADC_CHANNELS),
				})
			}
			Channel::IioVoltage { .. } => None,
			_ => Some(BuildError::InvalidSetting {
				which: "turbidity.class".into(),
				reason: "must be IioVoltage".into(),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const EXAMPLE: &str = include_str!("../../config.example.toml");

	#[test]
	fn test_example_parses() {
		let config: Config = toml::from_str(EXAMPLE).unwrap();
		assert!(config.check().is_none());
		assert_eq!(config.interval(), Duration::from_secs(5));
		assert_eq!(config.sampling_period(), Duration::from_millis(250));
		assert_eq!(config.fields.len(), 3);
		match config.fields.get("water_temp").unwrap() {
			Channel::HwmonTemperature { name, sensor } => {
				assert_eq!(name, "w1_slave_temp");
				assert_eq!(*sensor, 1);
			}
			other => panic!("unexpected channel {:?}", other),
		}
		assert_eq!(config.storage.file_name, "sensors_data.csv");
	}

	#[test]
	fn test_defaults() {
		let config: Config = toml::from_str(
			r#"
			[turbidity]
			class = "IioVoltage"
			device = "mcp3008"
			channel = 0

			[storage]
			"#,
		)
		.unwrap();
		assert!(config.check().is_none());
		assert_eq!(config.interval, 5.0);
		assert_eq!(config.samples_per_interval, 20);
		assert!(config.fields.is_empty());
		assert_eq!(config.storage.local_dir, PathBuf::from("/srv/sensors"));
		assert_eq!(config.storage.media_root, PathBuf::from("/media/root"));
		assert!(config.storage.mount_pattern.is_none());
		assert_eq!(config.sysfs.iio_root, PathBuf::from(sysfs::IIO_ROOT));
	}

	#[test]
	fn test_mount_pattern() {
		let config: Config = toml::from_str(
			r#"
			[turbidity]
			class = "IioVoltage"
			device = "mcp3008"
			channel = 0

			[storage]
			mount_pattern = "sd*"
			"#,
		)
		.unwrap();
		let pattern = config.storage.mount_pattern.unwrap();
		assert!(pattern.matches("sda1"));
		assert!(!pattern.matches("mmcblk0p1"));
	}

	#[test]
	fn test_unknown_field_is_rejected() {
		let config: Config = toml::from_str(
			r#"
			[turbidity]
			class = "IioVoltage"
			device = "mcp3008"
			channel = 0

			[fields.humidity]
			class = "IioTemperature"
			device = "bme280"

			[storage]
			"#,
		)
		.unwrap();
		assert!(config.field_channels().is_err());
		assert!(config.check().is_some());
	}

	#[test]
	fn test_check_rejects_bad_settings() {
		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.samples_per_interval = 0;
		assert!(config.check().is_some());

		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.interval = -1.;
		assert!(config.check().is_some());

		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.interval = 1e30;
		assert!(config.check().is_some());

		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.interval = f64::NAN;
		assert!(config.check().is_some());

		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.interval = 1e-6;
		assert!(config.check().is_some());

		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.interval = 1.0;
		config.samples_per_interval = 5000;
		assert!(config.check().is_some());

		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.interval = MAX_INTERVAL;
		config.samples_per_interval = 1000;
		assert!(config.check().is_none());

		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.turbidity = Channel::IioVoltage {
			device: "mcp3008".into(),
			channel: 8,
		};
		assert!(config.check().is_some());

		let mut config: Config = toml::from_str(EXAMPLE).unwrap();
		config.turbidity = Channel::IioTemperature {
			device: "bme280".into(),
		};
		assert!(config.check().is_some());
	}
}
