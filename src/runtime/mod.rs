use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Local;

use log::{debug, error, info, warn};

use tokio::task::spawn_blocking;

mod config;
mod traits;

pub use config::{BuildError, Channel, Config, PatternWrap, StorageConfig, SysfsConfig};
pub use traits::FieldSource;

use crate::metric::{Field, FieldName, Record};
use crate::sampling::{Averager, MeanSource};
use crate::schedule::Rhythm;
use crate::storage::{Action, Reconciler, StorageError};

/// Reads the field sensors and hands complete records to storage.
pub struct Recorder {
	fields: Vec<(FieldName, Box<dyn FieldSource>)>,
	storage: Reconciler,
}

impl Recorder {
	pub fn new(storage: Reconciler) -> Self {
		Self {
			fields: Vec::new(),
			storage,
		}
	}

	pub fn add_field(&mut self, name: FieldName, source: Box<dyn FieldSource>) {
		self.fields.push((name, source));
	}

	fn read_field(&mut self, name: FieldName) -> Field {
		let source = match self.fields.iter_mut().find(|(n, _)| *n == name) {
			Some((_, source)) => source,
			None => return Field::missing(),
		};
		match source.read_field() {
			Ok(v) => Field::Number(v),
			Err(e) => {
				warn!("failed to read {}: {}", name, e);
				Field::missing()
			}
		}
	}

	/// Assemble a record stamped with the current time and store it.
	pub fn record(&mut self, turbidity: u16) -> Result<Action, StorageError> {
		let record = Record::new(
			Local::now(),
			self.read_field(FieldName::AirTemp),
			self.read_field(FieldName::AirPressure),
			self.read_field(FieldName::WaterTemp),
			turbidity,
		);
		self.storage.write(record)
	}
}

pub struct Runtime {
	interval: Duration,
	turbidity: Arc<dyn MeanSource>,
	recorder: Arc<Mutex<Recorder>>,
}

impl Runtime {
	pub fn new(interval: Duration, turbidity: Arc<dyn MeanSource>, recorder: Recorder) -> Self {
		Self {
			interval,
			turbidity,
			recorder: Arc::new(Mutex::new(recorder)),
		}
	}

	/// Produce and store one record.
	pub async fn cycle(&self) -> Result<Action, StorageError> {
		let turbidity = self.turbidity.drain_mean();
		let recorder = self.recorder.clone();
		match spawn_blocking(move || recorder.lock().unwrap().record(turbidity)).await {
			Ok(v) => v,
			Err(e) => Err(StorageError::IO(io::Error::new(
				io::ErrorKind::Other,
				format!("record task panic'd: {}", e),
			))),
		}
	}

	/// Store a record every interval, forever.
	///
	/// A record which cannot be stored is logged and dropped; the next cycle starts over with a fresh look at the storage.
	pub async fn run(&self) {
		let mut rhythm = Rhythm::delayed(self.interval);
		loop {
			rhythm.wait().await;
			match self.cycle().await {
				Ok(Action::Migrate { rows }) => {
					info!("exported {} buffered records to removable medium", rows)
				}
				Ok(action) => debug!("stored record: {:?}", action),
				Err(e) => error!("failed to store record: {}", e),
			}
			rhythm.advance(Instant::now());
		}
	}
}

impl Config {
	pub fn build(&self) -> Result<Runtime, BuildError> {
		match self.check() {
			Some(e) => return Err(e),
			None => (),
		}

		let mut adc = self.turbidity.build_adc(&self.sysfs)?;
		match adc.locate() {
			Ok(path) => debug!("turbidity input at {:?}", path),
			Err(e) => {
				return Err(BuildError::UnavailableDevice {
					which: "turbidity".into(),
					error: e,
				})
			}
		}

		let storage = Reconciler::new(
			&self.storage.local_dir,
			&self.storage.media_root,
			&self.storage.file_name,
			self.storage.mount_pattern.as_ref().map(|p| p.0.clone()),
		)?;
		let mut recorder = Recorder::new(storage);

		for (name, channel_cfg) in self.field_channels()? {
			let unavailable = |error| BuildError::UnavailableDevice {
				which: name.to_string(),
				error,
			};
			let mut channel = channel_cfg.build(&self.sysfs).map_err(unavailable)?;
			match channel.locate() {
				Ok(path) => debug!("{} at {:?}", name, path),
				Err(e) => return Err(unavailable(e)),
			}
			recorder.add_field(name, Box::new(channel));
		}

		let turbidity = Averager::new(adc).spawn(self.sampling_period());

		info!(
			"recording every {:?} with {} turbidity samples each, {} field sensors",
			self.interval(),
			self.samples_per_interval,
			recorder.fields.len()
		);

		Ok(Runtime::new(self.interval(), turbidity, recorder))
	}
}
