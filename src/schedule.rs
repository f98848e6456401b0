use std::time::{Duration, Instant};

use log::trace;

/// Fixed-interval pacing for a periodic loop.
pub struct Rhythm {
	interval: Duration,
	next: Instant,
}

impl Rhythm {
	pub fn new(interval: Duration) -> Self {
		Self {
			interval,
			next: Instant::now(),
		}
	}

	/// Like [`Rhythm::new`], but the first slot is one interval from now.
	pub fn delayed(interval: Duration) -> Self {
		Self {
			interval,
			next: Instant::now() + interval,
		}
	}

	/// Sleep until the next slot is due.
	pub async fn wait(&self) {
		let now = Instant::now();
		match self.next.checked_duration_since(now) {
			Some(to_sleep) => tokio::time::sleep(to_sleep).await,
			None => trace!(
				"late for slot by {:?}",
				now.saturating_duration_since(self.next)
			),
		}
	}

	/// Schedule the slot after the one which just completed.
	///
	/// A late cycle pushes the next slot to one interval from `now`: the samples in between cannot be recovered anyway, so there is no point in catching up.
	pub fn advance(&mut self, now: Instant) {
		let accurate = self.next + self.interval;
		self.next = if now > accurate {
			trace!("already late by {:?}, resetting rhythm", now - accurate);
			now + self.interval
		} else {
			accurate
		};
	}

	#[cfg(test)]
	fn next(&self) -> Instant {
		self.next
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_on_time_keeps_rhythm() {
		let mut r = Rhythm::new(Duration::from_millis(100));
		let t0 = r.next();
		r.advance(t0 + Duration::from_millis(30));
		assert_eq!(r.next(), t0 + Duration::from_millis(100));
		r.advance(t0 + Duration::from_millis(150));
		assert_eq!(r.next(), t0 + Duration::from_millis(200));
	}

	#[test]
	fn test_late_does_not_catch_up() {
		let mut r = Rhythm::new(Duration::from_millis(100));
		let t0 = r.next();
		r.advance(t0 + Duration::from_millis(350));
		assert_eq!(r.next(), t0 + Duration::from_millis(450));
	}
}
