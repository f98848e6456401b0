use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use tokio::task::spawn_blocking;

use crate::schedule::Rhythm;

/// Something which yields one raw reading per call, e.g. a converter input.
pub trait RawSource: Send {
	/// Fails if the device is absent or the channel does not exist.
	fn read_raw(&mut self) -> io::Result<u16>;
}

/// Consumer side of an averaging buffer.
pub trait MeanSource: Send + Sync {
	/// Return the rounded mean of everything accumulated since the last drain and start over.
	///
	/// Returns 0 if nothing was accumulated in the meantime.
	fn drain_mean(&self) -> u16;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AverageState {
	pub sum: u64,
	pub count: u64,
}

impl AverageState {
	/// Mean rounded half away from zero, or 0 for an empty state.
	pub fn mean(&self) -> u16 {
		if self.count == 0 {
			return 0;
		}
		((self.sum + self.count / 2) / self.count) as u16
	}
}

/// Running sum and count of samples, shared between the sampling task and the consumer.
#[derive(Debug, Default)]
pub struct Accumulator {
	state: Mutex<AverageState>,
}

impl Accumulator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, value: u16) {
		let mut state = self.state.lock().unwrap();
		state.sum += value as u64;
		state.count += 1;
	}

	/// Take the accumulated state, leaving an empty one behind.
	pub fn drain(&self) -> AverageState {
		let mut state = self.state.lock().unwrap();
		std::mem::take(&mut *state)
	}
}

impl MeanSource for Accumulator {
	fn drain_mean(&self) -> u16 {
		let state = self.drain();
		debug!("drained {} samples, sum {}", state.count, state.sum);
		state.mean()
	}
}

/// Feeds an [`Accumulator`] from a [`RawSource`].
pub struct Averager<S> {
	source: Arc<Mutex<S>>,
	accumulator: Arc<Accumulator>,
}

impl<S> Clone for Averager<S> {
	fn clone(&self) -> Self {
		Self {
			source: self.source.clone(),
			accumulator: self.accumulator.clone(),
		}
	}
}

impl<S: RawSource + 'static> Averager<S> {
	pub fn new(source: S) -> Self {
		Self {
			source: Arc::new(Mutex::new(source)),
			accumulator: Arc::new(Accumulator::new()),
		}
	}

	pub fn accumulator(&self) -> Arc<Accumulator> {
		self.accumulator.clone()
	}

	/// Take one reading and add it to the accumulator.
	///
	/// Blocks for the duration of the read; the accumulator itself is only locked for the addition.
	pub fn sample(&self) -> io::Result<()> {
		let value = {
			let mut source = self.source.lock().unwrap();
			source.read_raw()?
		};
		self.accumulator.add(value);
		Ok(())
	}

	async fn run(self, period: Duration) {
		let mut rhythm = Rhythm::new(period);
		let mut failures = 0usize;
		loop {
			rhythm.wait().await;

			let worker = self.clone();
			match spawn_blocking(move || worker.sample()).await {
				Ok(Ok(())) => {
					if failures > 0 {
						info!("sampling recovered after {} failed reads", failures);
						failures = 0;
					}
				}
				Ok(Err(e)) => {
					if failures == 0 {
						warn!("failed to take sample: {}", e);
					} else {
						debug!("failed to take sample ({} in a row): {}", failures + 1, e);
					}
					failures += 1;
				}
				Err(e) => {
					error!("sample task panic'd: {}. sampling stops.", e);
					return;
				}
			}

			rhythm.advance(Instant::now());
		}
	}

	/// Start sampling every `period` in the background and return the consumer handle.
	pub fn spawn(self, period: Duration) -> Arc<Accumulator> {
		let accumulator = self.accumulator();
		debug!("sampling every {:?}", period);
		tokio::spawn(self.run(period));
		accumulator
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::collections::VecDeque;
	use std::thread;

	struct Replay(VecDeque<io::Result<u16>>);

	impl RawSource for Replay {
		fn read_raw(&mut self) -> io::Result<u16> {
			match self.0.pop_front() {
				Some(v) => v,
				None => Err(io::Error::new(io::ErrorKind::NotFound, "device absent")),
			}
		}
	}

	fn replay(values: &[u16]) -> Replay {
		Replay(values.iter().map(|v| Ok(*v)).collect())
	}

	#[test]
	fn test_drain_returns_rounded_mean() {
		let acc = Accumulator::new();
		for v in [500u16, 501, 503].iter() {
			acc.add(*v);
		}
		assert_eq!(acc.drain_mean(), 501);
	}

	#[test]
	fn test_half_rounds_up() {
		let acc = Accumulator::new();
		acc.add(1);
		acc.add(2);
		assert_eq!(acc.drain_mean(), 2);
	}

	#[test]
	fn test_drain_without_samples_is_zero() {
		let acc = Accumulator::new();
		assert_eq!(acc.drain_mean(), 0);
		acc.add(1000);
		assert_eq!(acc.drain_mean(), 1000);
		assert_eq!(acc.drain_mean(), 0);
	}

	#[test]
	fn test_drain_resets() {
		let acc = Accumulator::new();
		acc.add(10);
		acc.add(20);
		assert_eq!(acc.drain(), AverageState { sum: 30, count: 2 });
		assert_eq!(acc.drain(), AverageState::default());
	}

	#[test]
	fn test_concurrent_adds_are_never_lost() {
		const THREADS: u64 = 4;
		const PER_THREAD: u64 = 20000;
		let acc = Arc::new(Accumulator::new());
		let workers: Vec<_> = (0..THREADS)
			.map(|i| {
				let acc = acc.clone();
				thread::spawn(move || {
					for _ in 0..PER_THREAD {
						acc.add(i as u16 + 1);
					}
				})
			})
			.collect();

		let mut total = AverageState::default();
		while workers.iter().any(|w| !w.is_finished()) {
			let part = acc.drain();
			total.sum += part.sum;
			total.count += part.count;
		}
		for w in workers {
			w.join().unwrap();
		}
		let rest = acc.drain();
		total.sum += rest.sum;
		total.count += rest.count;

		assert_eq!(total.count, THREADS * PER_THREAD);
		assert_eq!(total.sum, PER_THREAD * (1..=THREADS).sum::<u64>());
	}

	#[test]
	fn test_sample_reads_source() {
		let averager = Averager::new(replay(&[100, 200, 300]));
		for _ in 0..3 {
			averager.sample().unwrap();
		}
		assert_eq!(averager.accumulator().drain_mean(), 200);
	}

	#[test]
	fn test_failed_read_is_not_counted() {
		let mut source = replay(&[100]);
		source
			.0
			.push_back(Err(io::Error::new(io::ErrorKind::Other, "bus error")));
		source.0.push_back(Ok(300));
		let averager = Averager::new(source);
		averager.sample().unwrap();
		assert!(averager.sample().is_err());
		averager.sample().unwrap();
		assert_eq!(
			averager.accumulator().drain(),
			AverageState { sum: 400, count: 2 }
		);
	}

	#[tokio::test]
	async fn test_spawned_sampler_accumulates() {
		let values: Vec<u16> = std::iter::repeat(42).take(10000).collect();
		let acc = Averager::new(replay(&values[..])).spawn(Duration::from_millis(1));
		tokio::time::sleep(Duration::from_millis(100)).await;
		let state = acc.drain();
		assert!(state.count > 0);
		assert_eq!(state.mean(), 42);
	}
}
