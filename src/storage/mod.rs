use std::fmt;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::metric::{Record, HEADER};

pub mod fs;
pub mod media;

pub use self::fs::{Filesystem, HostFs, SyncWrite};
pub use self::media::{Selection, Target};

#[derive(Debug)]
pub enum StorageError {
	IO(io::Error),
	CSV(csv::Error),
}

impl From<io::Error> for StorageError {
	fn from(e: io::Error) -> Self {
		Self::IO(e)
	}
}

impl From<csv::Error> for StorageError {
	fn from(e: csv::Error) -> Self {
		Self::CSV(e)
	}
}

impl fmt::Display for StorageError {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::IO(e) => write!(f, "i/o error: {}", e),
			Self::CSV(e) => write!(f, "csv error: {}", e),
		}
	}
}

impl std::error::Error for StorageError {}

/// Rows are rendered in memory first, so the file only ever sees one complete chunk.
fn encoder(header: bool) -> Result<csv::Writer<Vec<u8>>, StorageError> {
	let mut writer = csv::WriterBuilder::new()
		.has_headers(false)
		.flexible(true)
		.from_writer(Vec::new());
	if header {
		writer.write_record(&HEADER)?;
	}
	Ok(writer)
}

fn encoded(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, StorageError> {
	match writer.into_inner() {
		Ok(v) => Ok(v),
		Err(e) => Err(StorageError::IO(e.into_error())),
	}
}

/// Where the records go, as far as the filesystem tells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
	/// The local buffer holds rows which are not on any medium yet
	pub pending_local_export: bool,
	/// The data file on the selected medium, if any medium is present
	pub target: Option<Target>,
	/// Media whose data file could not be inspected
	pub unreadable_media: Vec<(PathBuf, String)>,
}

impl Probe {
	pub fn media_present(&self) -> bool {
		self.target.is_some()
	}

	/// Whether the target file already has a header.
	pub fn remote_initialized(&self) -> bool {
		match self.target {
			Some(ref t) => t.initialized,
			None => false,
		}
	}
}

/// What a write did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	/// No medium: local buffer created with the record as its first row
	StartBuffer,
	/// No medium: record appended to the existing local buffer
	AppendBuffer,
	/// Buffered rows and the record moved onto the medium, local buffer removed
	Migrate { rows: usize },
	/// Record appended to the data file on the medium
	AppendTarget,
}

/// Decides for every record whether it goes into the local buffer or onto removable media, moving the buffer over when a medium shows up.
///
/// All decisions are made from a fresh look at the filesystem; nothing besides the last probe (for logging) is kept between writes.
pub struct Reconciler<F = HostFs> {
	fs: F,
	local_path: PathBuf,
	media_root: PathBuf,
	file_name: PathBuf,
	mount_pattern: Option<glob::Pattern>,
	last: Option<Probe>,
}

impl Reconciler<HostFs> {
	pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
		local_dir: P,
		media_root: Q,
		file_name: &str,
		mount_pattern: Option<glob::Pattern>,
	) -> Result<Self, StorageError> {
		Self::with_fs(HostFs, local_dir, media_root, file_name, mount_pattern)
	}
}

impl<F: Filesystem> Reconciler<F> {
	pub fn with_fs<P: AsRef<Path>, Q: AsRef<Path>>(
		fs: F,
		local_dir: P,
		media_root: Q,
		file_name: &str,
		mount_pattern: Option<glob::Pattern>,
	) -> Result<Self, StorageError> {
		let local_dir = local_dir.as_ref();
		fs.create_dir_all(local_dir)?;
		let mut result = Self {
			fs,
			local_path: local_dir.join(file_name),
			media_root: media_root.as_ref().into(),
			file_name: file_name.into(),
			mount_pattern,
			last: None,
		};
		let probe = result.probe()?;
		if probe.pending_local_export {
			info!(
				"{:?} holds records which still need to be exported",
				result.local_path
			);
		}
		result.log_transition(&probe);
		result.last = Some(probe);
		Ok(result)
	}

	/// Inspect the local buffer and the mounted media.
	///
	/// Failing to enumerate media is not fatal: the record then goes to the local buffer, from where it will be exported later.
	pub fn probe(&self) -> Result<Probe, StorageError> {
		let pending_local_export = match self.fs.file_size(&self.local_path)? {
			Some(size) => size > 0,
			None => false,
		};
		let selection = match media::select_target(
			&self.fs,
			&self.media_root,
			&self.file_name,
			self.mount_pattern.as_ref(),
		) {
			Ok(v) => v,
			Err(e) => {
				warn!(
					"failed to look for media in {:?}: {}; treating as absent",
					self.media_root, e
				);
				Selection::default()
			}
		};
		Ok(Probe {
			pending_local_export,
			target: selection.target,
			unreadable_media: selection.unreadable,
		})
	}

	/// Unreadable media in `probe` which were fine (or absent) at the last probe.
	fn newly_unreadable<'p>(&self, probe: &'p Probe) -> Vec<&'p (PathBuf, String)> {
		let known: Vec<&PathBuf> = match self.last {
			Some(ref v) => v.unreadable_media.iter().map(|(p, _)| p).collect(),
			None => Vec::new(),
		};
		probe
			.unreadable_media
			.iter()
			.filter(|(path, _)| !known.contains(&path))
			.collect()
	}

	fn log_transition(&self, probe: &Probe) {
		for (mount, reason) in self.newly_unreadable(probe) {
			warn!("ignoring medium {:?}: {}", mount, reason);
		}
		let previous = match self.last {
			Some(ref v) => v.target.as_ref().map(|t| &t.path),
			None => None,
		};
		let current = probe.target.as_ref().map(|t| &t.path);
		if previous == current {
			return;
		}
		match current {
			Some(path) => info!("writing to removable medium at {:?}", path),
			None => info!("no removable medium, buffering in {:?}", self.local_path),
		}
	}

	/// Append `chunk` to `path` and sync it.
	///
	/// On failure the file is cut back to its previous length, so no partial row stays behind.
	fn commit(&self, path: &Path, chunk: &[u8]) -> Result<(), StorageError> {
		let size = self.fs.file_size(path)?.unwrap_or(0);
		let mut file = self.fs.open_append(path)?;
		match file.write_all(chunk).and_then(|_| file.sync()) {
			Ok(()) => Ok(()),
			Err(e) => {
				match file.truncate(size).and_then(|_| file.sync()) {
					Ok(()) => debug!("rolled {:?} back to {} bytes", path, size),
					Err(te) => warn!("failed to roll {:?} back to {} bytes: {}", path, size, te),
				}
				Err(e.into())
			}
		}
	}

	fn append(&self, path: &Path, header: bool, row: &csv::StringRecord) -> Result<(), StorageError> {
		let mut writer = encoder(header)?;
		writer.write_record(row)?;
		self.commit(path, &encoded(writer)?)
	}

	/// Copy all buffered rows plus `row` to the target, then drop the local buffer.
	///
	/// The buffer is only removed once the target has been synced. A failed copy is rolled back on the target and the buffer stays for the next write. If removing the buffer fails (or the process dies between sync and removal), the next write exports the same rows again.
	fn migrate(&self, target: &Target, row: &csv::StringRecord) -> Result<usize, StorageError> {
		let source = self.fs.open_read(&self.local_path)?;
		let mut reader = csv::ReaderBuilder::new()
			.has_headers(true)
			.flexible(true)
			.from_reader(source);
		let mut writer = encoder(!target.initialized)?;
		let mut rows = 0;
		for buffered in reader.records() {
			writer.write_record(&buffered?)?;
			rows += 1;
		}
		writer.write_record(row)?;
		self.commit(&target.path, &encoded(writer)?)?;
		self.fs.remove_file(&self.local_path)?;
		Ok(rows)
	}

	/// Persist one record.
	///
	/// On error the record has not been stored; the caller decides whether to retry.
	pub fn write(&mut self, record: Record) -> Result<Action, StorageError> {
		let probe = self.probe()?;
		self.log_transition(&probe);
		let row = record.to_row();
		let result = match (probe.target.as_ref(), probe.pending_local_export) {
			(None, false) => self
				.append(&self.local_path, true, &row)
				.map(|_| Action::StartBuffer),
			(None, true) => self
				.append(&self.local_path, false, &row)
				.map(|_| Action::AppendBuffer),
			(Some(target), true) => {
				info!(
					"exporting {:?} to {:?}",
					self.local_path, target.path
				);
				self.migrate(target, &row).map(|rows| Action::Migrate { rows })
			}
			(Some(target), false) => self
				.append(&target.path, !target.initialized, &row)
				.map(|_| Action::AppendTarget),
		};
		self.last = Some(probe);
		match result {
			Ok(action) => {
				debug!("{:?}: {}", action, record);
				Ok(action)
			}
			Err(e) => Err(e),
		}
	}
}
