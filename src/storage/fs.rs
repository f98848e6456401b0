use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A writer whose contents can be forced onto the medium.
pub trait SyncWrite: Write {
	fn sync(&mut self) -> io::Result<()>;

	/// Cut the file back to `size` bytes.
	fn truncate(&mut self, size: u64) -> io::Result<()>;
}

impl SyncWrite for fs::File {
	fn sync(&mut self) -> io::Result<()> {
		self.sync_all()
	}

	fn truncate(&mut self, size: u64) -> io::Result<()> {
		self.set_len(size)
	}
}

/// The file operations the reconciler needs.
pub trait Filesystem {
	type Reader: io::Read;
	type Writer: SyncWrite;

	/// Size of the regular file at `path`, or `None` if there is none.
	fn file_size(&self, path: &Path) -> io::Result<Option<u64>>;

	/// Directories directly below `path`, in no particular order.
	fn subdirectories(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

	fn open_read(&self, path: &Path) -> io::Result<Self::Reader>;

	/// Open `path` for appending, creating it if needed.
	fn open_append(&self, path: &Path) -> io::Result<Self::Writer>;

	fn remove_file(&self, path: &Path) -> io::Result<()>;

	fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem of the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl Filesystem for HostFs {
	type Reader = fs::File;
	type Writer = fs::File;

	fn file_size(&self, path: &Path) -> io::Result<Option<u64>> {
		match fs::metadata(path) {
			Ok(m) if m.is_file() => Ok(Some(m.len())),
			Ok(_) => Err(io::Error::new(
				io::ErrorKind::Other,
				format!("{:?} exists but is not a regular file", path),
			)),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e),
		}
	}

	fn subdirectories(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
		let mut result = Vec::new();
		for entry in fs::read_dir(path)? {
			let entry = entry?;
			// follows symlinks
			match fs::metadata(entry.path()) {
				Ok(m) if m.is_dir() => result.push(entry.path()),
				_ => continue,
			}
		}
		Ok(result)
	}

	fn open_read(&self, path: &Path) -> io::Result<fs::File> {
		fs::File::open(path)
	}

	fn open_append(&self, path: &Path) -> io::Result<fs::File> {
		fs::OpenOptions::new().append(true).create(true).open(path)
	}

	fn remove_file(&self, path: &Path) -> io::Result<()> {
		fs::remove_file(path)
	}

	fn create_dir_all(&self, path: &Path) -> io::Result<()> {
		fs::create_dir_all(path)
	}
}
