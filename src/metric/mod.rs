use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime};
use smartstring::alias::String as SmartString;

/// Column titles of the data file, in row order.
pub const HEADER: [&str; 6] = [
	"time",
	"date",
	"air_temp",
	"air_pressure",
	"water_temp",
	"turbidity",
];

/// Largest value the 10 bit converter can produce.
pub const TURBIDITY_MAX: u16 = 1023;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldName {
	AirTemp,
	AirPressure,
	WaterTemp,
}

impl FieldName {
	pub const ALL: [FieldName; 3] = [Self::AirTemp, Self::AirPressure, Self::WaterTemp];

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::AirTemp => "air_temp",
			Self::AirPressure => "air_pressure",
			Self::WaterTemp => "water_temp",
		}
	}
}

impl FromStr for FieldName {
	type Err = &'static str;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"air_temp" => Ok(Self::AirTemp),
			"air_pressure" => Ok(Self::AirPressure),
			"water_temp" => Ok(Self::WaterTemp),
			_ => Err("unknown field"),
		}
	}
}

impl fmt::Display for FieldName {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum Field {
	Number(f64),
	Text(SmartString),
}

impl Field {
	/// Placeholder for a channel which could not be read.
	pub fn missing() -> Self {
		Self::Text(SmartString::new())
	}
}

impl From<&str> for Field {
	fn from(v: &str) -> Self {
		Self::Text(v.into())
	}
}

impl fmt::Display for Field {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		match self {
			Self::Number(v) => write!(f, "{}", v),
			Self::Text(s) => f.write_str(s),
		}
	}
}

/// One measurement event, as it ends up in a row of the data file.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
	/// Local wall-clock time of the measurement
	timestamp: NaiveDateTime,
	air_temp: Field,
	air_pressure: Field,
	water_temp: Field,
	turbidity: u16,
}

impl Record {
	/// Assemble a record.
	///
	/// `turbidity` values outside of the converter range are replaced with 0.
	pub fn new(
		timestamp: DateTime<Local>,
		air_temp: Field,
		air_pressure: Field,
		water_temp: Field,
		turbidity: u16,
	) -> Self {
		let turbidity = if turbidity <= TURBIDITY_MAX { turbidity } else { 0 };
		Self {
			timestamp: timestamp.naive_local(),
			air_temp,
			air_pressure,
			water_temp,
			turbidity,
		}
	}

	pub fn field(&self, name: FieldName) -> &Field {
		match name {
			FieldName::AirTemp => &self.air_temp,
			FieldName::AirPressure => &self.air_pressure,
			FieldName::WaterTemp => &self.water_temp,
		}
	}

	pub fn turbidity(&self) -> u16 {
		self.turbidity
	}

	/// Render the record into its CSV columns, matching [`HEADER`].
	pub fn to_row(&self) -> csv::StringRecord {
		let mut row = csv::StringRecord::with_capacity(64, HEADER.len());
		row.push_field(&self.timestamp.format("%H:%M:%S").to_string());
		row.push_field(&self.timestamp.format("%d-%m-%Y").to_string());
		for name in FieldName::ALL.iter() {
			row.push_field(&self.field(*name).to_string());
		}
		row.push_field(&self.turbidity.to_string());
		row
	}
}

impl fmt::Display for Record {
	fn fmt<'f>(&self, f: &'f mut fmt::Formatter) -> fmt::Result {
		let row = self.to_row();
		for (i, v) in row.iter().enumerate() {
			if i > 0 {
				f.write_str(",")?;
			}
			f.write_str(v)?;
		}
		Ok(())
	}
}
