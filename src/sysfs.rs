use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, trace, warn};

use crate::sampling::RawSource;

pub const HWMON_ROOT: &str = "/sys/class/hwmon";
pub const IIO_ROOT: &str = "/sys/bus/iio/devices";

/// Number of single-ended inputs of the analog converter.
pub const ADC_CHANNELS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
	/// hwmon `temp<N>_input`, milli-degrees Celsius
	TempInput(u32),
	/// IIO `in_voltage<N>_raw`, converter counts
	VoltageRaw(u32),
	/// IIO `in_temp_input`, milli-degrees Celsius
	IioTempInput,
	/// IIO `in_pressure_input`, kilopascal
	PressureInput,
}

fn parse<T: FromStr>(s: &str) -> io::Result<T>
where
	T::Err: Into<Box<dyn Error + Send + Sync>>,
{
	match T::from_str(s.trim()) {
		Ok(v) => Ok(v),
		Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e)),
	}
}

impl Type {
	fn file_name(&self) -> PathBuf {
		match self {
			Self::TempInput(sensor) => format!("temp{}_input", sensor).into(),
			Self::VoltageRaw(channel) => format!("in_voltage{}_raw", channel).into(),
			Self::IioTempInput => "in_temp_input".into(),
			Self::PressureInput => "in_pressure_input".into(),
		}
	}

	/// Convert the attribute contents into °C, hPa or raw counts.
	fn decode(&self, value_str: &str) -> io::Result<f64> {
		match self {
			Self::TempInput(_) | Self::IioTempInput => {
				let value: i64 = parse(value_str)?;
				Ok((value as f64) / 1000.)
			}
			Self::VoltageRaw(_) => {
				let value: u32 = parse(value_str)?;
				Ok(value as f64)
			}
			Self::PressureInput => {
				let value: f64 = parse(value_str)?;
				Ok(value * 10.)
			}
		}
	}

	fn check(&self) -> io::Result<()> {
		match self {
			Self::VoltageRaw(channel) if *channel >= ADC_CHANNELS => Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!(
					"converter channel {} out of range (0..{})",
					channel, ADC_CHANNELS
				),
			)),
			_ => Ok(()),
		}
	}
}

/// Locate the device directory below `root` whose `name` attribute equals `name`.
fn find_by_name(root: &Path, name: &str) -> io::Result<PathBuf> {
	for entry in fs::read_dir(root)? {
		let entry = match entry {
			Ok(v) => v,
			Err(e) => {
				warn!("failed to read entry from {:?}: {}", root, e);
				continue;
			}
		};
		let device_path = match entry.file_type() {
			Ok(type_) if type_.is_symlink() => match fs::read_link(entry.path()) {
				Ok(v) => {
					let mut path: PathBuf = root.into();
					path.push(v);
					path
				}
				Err(e) => {
					warn!("failed to resolve symlink {:?}: {}", entry.path(), e);
					continue;
				}
			},
			Ok(type_) if type_.is_dir() => entry.path(),
			_ => {
				trace!(
					"entry {:?} is neither a symlink nor a directory",
					entry.path()
				);
				continue;
			}
		};
		let mut name_path = device_path.clone();
		name_path.push("name");
		match fs::read_to_string(&name_path) {
			Ok(v) => {
				if v.trim() == name {
					return Ok(device_path);
				}
			}
			Err(e) => {
				trace!("no readable name at {:?}: {}", name_path, e);
				continue;
			}
		}
	}
	Err(io::Error::new(
		io::ErrorKind::NotFound,
		format!("no device with name {:?} below {:?}", name, root),
	))
}

/// A single sysfs attribute of a named device.
///
/// Device directories are renumbered by the kernel when a device is re-probed,
/// so the attribute path is looked up again whenever it vanishes.
pub struct Channel {
	root: PathBuf,
	device_name: String,
	type_: Type,
	path: Option<PathBuf>,
}

impl Channel {
	pub fn new<P: AsRef<Path>>(root: P, device_name: &str, type_: Type) -> io::Result<Self> {
		type_.check()?;
		Ok(Self {
			root: root.as_ref().into(),
			device_name: device_name.into(),
			type_,
			path: None,
		})
	}

	/// Find the attribute file; fails with `NotFound` if the device or the attribute is absent.
	pub fn locate(&mut self) -> io::Result<&Path> {
		let mut path = find_by_name(&self.root, &self.device_name)?;
		path.push(self.type_.file_name());
		// the attribute must exist
		fs::metadata(&path)?;
		debug!("located {:?} {:?} at {:?}", self.device_name, self.type_, path);
		Ok(self.path.insert(path))
	}

	fn read_once(&mut self) -> io::Result<f64> {
		let path = match self.path.clone() {
			Some(v) => v,
			None => self.locate()?.to_path_buf(),
		};
		let value_str = fs::read_to_string(path)?;
		self.type_.decode(&value_str)
	}

	pub fn read(&mut self) -> io::Result<f64> {
		match self.read_once() {
			Err(e) if e.kind() == io::ErrorKind::NotFound && self.path.is_some() => {
				debug!(
					"{:?} vanished from {:?} ({}), looking it up again",
					self.device_name, self.path, e
				);
				self.path = None;
				self.read_once()
			}
			other => other,
		}
	}
}

/// One input of the analog converter, as exposed through IIO.
pub struct AdcInput(Channel);

impl AdcInput {
	pub fn new<P: AsRef<Path>>(root: P, device_name: &str, channel: u32) -> io::Result<Self> {
		Ok(Self(Channel::new(
			root,
			device_name,
			Type::VoltageRaw(channel),
		)?))
	}

	pub fn locate(&mut self) -> io::Result<&Path> {
		self.0.locate()
	}
}

impl RawSource for AdcInput {
	fn read_raw(&mut self) -> io::Result<u16> {
		let value = self.0.read()?;
		if value > u16::MAX as f64 {
			return Err(io::Error::new(
				io::ErrorKind::InvalidData,
				format!("raw reading {} exceeds 16 bits", value),
			));
		}
		Ok(value as u16)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn make_device(root: &Path, dir: &str, name: &str, attrs: &[(&str, &str)]) -> PathBuf {
		let path = root.join(dir);
		fs::create_dir_all(&path).unwrap();
		fs::write(path.join("name"), format!("{}\n", name)).unwrap();
		for (k, v) in attrs {
			fs::write(path.join(k), v).unwrap();
		}
		path
	}

	#[test]
	fn test_decode_temperature() {
		assert_eq!(Type::TempInput(1).decode("21375\n").unwrap(), 21.375);
		assert_eq!(Type::IioTempInput.decode("-500").unwrap(), -0.5);
	}

	#[test]
	fn test_decode_pressure_to_hectopascal() {
		assert_eq!(Type::PressureInput.decode("100.5").unwrap(), 1005.);
	}

	#[test]
	fn test_decode_garbage_is_invalid_data() {
		let e = Type::VoltageRaw(0).decode("foo").unwrap_err();
		assert_eq!(e.kind(), io::ErrorKind::InvalidData);
	}

	#[test]
	fn test_adc_channel_out_of_range() {
		let e = AdcInput::new("/nonexistent", "mcp3008", ADC_CHANNELS)
			.err()
			.unwrap();
		assert_eq!(e.kind(), io::ErrorKind::InvalidInput);
		assert!(AdcInput::new("/nonexistent", "mcp3008", ADC_CHANNELS - 1).is_ok());
	}

	#[test]
	fn test_read_by_name() {
		let root = tempfile::tempdir().unwrap();
		make_device(root.path(), "hwmon0", "cpu_thermal", &[("temp1_input", "48000")]);
		make_device(root.path(), "hwmon1", "w1_slave_temp", &[("temp1_input", "12500")]);
		let mut ch = Channel::new(root.path(), "w1_slave_temp", Type::TempInput(1)).unwrap();
		assert_eq!(ch.read().unwrap(), 12.5);
	}

	#[test]
	fn test_absent_device_is_not_found() {
		let root = tempfile::tempdir().unwrap();
		make_device(root.path(), "iio:device0", "bme280", &[("in_temp_input", "1")]);
		let mut adc = AdcInput::new(root.path(), "mcp3008", 0).unwrap();
		assert_eq!(adc.read_raw().unwrap_err().kind(), io::ErrorKind::NotFound);
	}

	#[test]
	fn test_missing_attribute_is_not_found() {
		let root = tempfile::tempdir().unwrap();
		make_device(root.path(), "iio:device0", "mcp3008", &[("in_voltage0_raw", "1")]);
		let mut adc = AdcInput::new(root.path(), "mcp3008", 3).unwrap();
		assert_eq!(adc.locate().unwrap_err().kind(), io::ErrorKind::NotFound);
	}

	#[test]
	fn test_relocates_after_renumbering() {
		let root = tempfile::tempdir().unwrap();
		let old = make_device(root.path(), "iio:device0", "mcp3008", &[("in_voltage2_raw", "700\n")]);
		let mut adc = AdcInput::new(root.path(), "mcp3008", 2).unwrap();
		assert_eq!(adc.read_raw().unwrap(), 700);

		fs::remove_dir_all(old).unwrap();
		make_device(root.path(), "iio:device1", "mcp3008", &[("in_voltage2_raw", "701\n")]);
		assert_eq!(adc.read_raw().unwrap(), 701);
	}
}
