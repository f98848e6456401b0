use std::io;
use std::path::{Path, PathBuf};

use log::{debug, trace};

use super::fs::Filesystem;

/// The data file on a removable medium chosen for writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
	/// Full path of the data file on the medium
	pub path: PathBuf,
	/// Whether the file already exists with content (and thus a header)
	pub initialized: bool,
}

/// Outcome of looking at the mounted media.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
	pub target: Option<Target>,
	/// Media passed over because their data file could not be inspected, with the reason
	pub unreadable: Vec<(PathBuf, String)>,
}

/// Pick the medium to write to.
///
/// Every directory below `root` counts as a mounted medium if its name matches `pattern`.
/// A medium which already holds `file_name` wins, so that a data file keeps growing on the same stick across re-insertions; otherwise the first medium in name order is used.
/// A missing `root` means that nothing is mounted.
pub fn select_target<F: Filesystem>(
	fs: &F,
	root: &Path,
	file_name: &Path,
	pattern: Option<&glob::Pattern>,
) -> io::Result<Selection> {
	let mut mounts = match fs.subdirectories(root) {
		Ok(v) => v,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Selection::default()),
		Err(e) => return Err(e),
	};
	if let Some(pattern) = pattern {
		mounts.retain(|m| match m.file_name() {
			Some(name) => pattern.matches(&name.to_string_lossy()),
			None => false,
		});
	}
	mounts.sort();
	trace!("candidate media: {:?}", mounts);

	let mut unreadable = Vec::new();
	for mount in mounts.iter() {
		let path = mount.join(file_name);
		match fs.file_size(&path) {
			Ok(Some(size)) => {
				return Ok(Selection {
					target: Some(Target {
						path,
						initialized: size > 0,
					}),
					unreadable,
				})
			}
			Ok(None) => (),
			Err(e) => {
				debug!("cannot inspect {:?}: {}", path, e);
				unreadable.push((mount.clone(), e.to_string()));
			}
		}
	}

	Ok(Selection {
		target: mounts.into_iter().next().map(|mount| Target {
			path: mount.join(file_name),
			initialized: false,
		}),
		unreadable,
	})
}
