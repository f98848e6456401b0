pub mod metric;
pub mod runtime;
pub mod sampling;
mod schedule;
pub mod storage;
pub mod sysfs;
