use std::io;

use crate::sysfs;

/// A sensor feeding one column of the record.
pub trait FieldSource: Send {
	fn read_field(&mut self) -> io::Result<f64>;
}

impl FieldSource for sysfs::Channel {
	fn read_field(&mut self) -> io::Result<f64> {
		self.read()
	}
}
