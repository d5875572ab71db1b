//! An injectable time source.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Where "now" comes from.
///
/// `Manual` shares one instant between clones so tests can advance time under
/// a tracker or migration runner that already holds the clock.
#[derive(Debug, Clone, Default)]
pub enum Clock {
  #[default]
  System,
  Fixed(DateTime<Utc>),
  Manual(Arc<Mutex<DateTime<Utc>>>),
}

impl Clock {
  pub fn fixed(at: DateTime<Utc>) -> Self { Self::Fixed(at) }

  pub fn manual(start: DateTime<Utc>) -> Self {
    Self::Manual(Arc::new(Mutex::new(start)))
  }

  pub fn now(&self) -> DateTime<Utc> {
    match self {
      Self::System => Utc::now(),
      Self::Fixed(t) => *t,
      Self::Manual(t) => match t.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
      },
    }
  }

  /// Move a manual clock forward. Other clocks are unaffected.
  pub fn advance(&self, delta: Duration) {
    if let Self::Manual(t) = self {
      let mut guard = match t.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
      };
      *guard += delta;
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn manual_clock_is_shared_between_clones() {
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let clock = Clock::manual(start);
    let held = clock.clone();

    clock.advance(Duration::seconds(30));
    assert_eq!(held.now(), start + Duration::seconds(30));
  }

  #[test]
  fn fixed_clock_ignores_advance() {
    let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let clock = Clock::fixed(start);
    clock.advance(Duration::seconds(30));
    assert_eq!(clock.now(), start);
  }
}
