//! Delayed sends.
//!
//! The registry only stores due times; it never sleeps. Whoever drives the
//! interpreter asks for [`DelayedEvents::next_deadline`] and hands the
//! current instant back through `fire_due_timers`.

use scxmlrt_model::Event;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Where an event goes once it is due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The interpreter's own external queue.
    External,
    /// The interpreter's own internal queue.
    Internal,
    /// The invoking parent.
    Parent,
    /// A running invoke.
    Invoke(String),
}

/// A pending delayed send.
#[derive(Debug, Clone)]
pub struct DelayedEvent {
    pub send_id: String,
    pub event: Event,
    pub route: Route,
    pub due: Instant,
}

/// Pending delayed sends, ordered by due time then submission order.
#[derive(Debug, Default)]
pub struct DelayedEvents {
    by_due: BTreeMap<(Instant, u64), DelayedEvent>,
    by_send_id: HashMap<String, (Instant, u64)>,
    seq: u64,
}

impl DelayedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event. A pending event with the same send id is replaced.
    pub fn schedule(&mut self, send_id: String, event: Event, route: Route, due: Instant) {
        self.cancel(&send_id);
        let key = (due, self.seq);
        self.seq += 1;
        self.by_send_id.insert(send_id.clone(), key);
        self.by_due.insert(
            key,
            DelayedEvent {
                send_id,
                event,
                route,
                due,
            },
        );
    }

    /// Removes a pending event. Returns false if nothing was pending under
    /// that id (never sent, already fired or already cancelled).
    pub fn cancel(&mut self, send_id: &str) -> bool {
        match self.by_send_id.remove(send_id) {
            Some(key) => self.by_due.remove(&key).is_some(),
            None => false,
        }
    }

    pub fn contains(&self, send_id: &str) -> bool {
        self.by_send_id.contains_key(send_id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_due.keys().next().map(|(due, _)| *due)
    }

    /// Removes and returns every event due at or before `now`, in order.
    pub fn take_due(&mut self, now: Instant) -> Vec<DelayedEvent> {
        let mut due = Vec::new();
        while let Some(entry) = self.by_due.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let event = entry.remove();
            self.by_send_id.remove(&event.send_id);
            due.push(event);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.by_due.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_due.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_due.clear();
        self.by_send_id.clear();
    }
}

/// Parses a delay such as `"50ms"`, `"1.5s"` or `"0s"`.
pub fn parse_delay(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let (number, scale) = if let Some(n) = text.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = text.strip_suffix('s') {
        (n, 1000.0)
    } else {
        return Err(format!("invalid delay '{}': expected a ms or s suffix", text));
    };

    let valid = !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit() || c == '.')
        && number.chars().filter(|c| *c == '.').count() <= 1
        && number.chars().any(|c| c.is_ascii_digit());
    if !valid {
        return Err(format!("invalid delay '{}'", text));
    }
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid delay '{}'", text))?;
    Ok(Duration::from_micros((value * scale * 1000.0).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delay() {
        assert_eq!(parse_delay("50ms").unwrap(), Duration::from_millis(50));
        assert_eq!(parse_delay("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_delay(" 1.5s ").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_delay("0ms").unwrap(), Duration::ZERO);
        assert_eq!(parse_delay(".5s").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_delay_rejects_garbage() {
        assert!(parse_delay("").is_err());
        assert!(parse_delay("10").is_err());
        assert!(parse_delay("-5ms").is_err());
        assert!(parse_delay("abcms").is_err());
        assert!(parse_delay("1.2.3s").is_err());
        assert!(parse_delay("5m").is_err());
        assert!(parse_delay("ms").is_err());
    }

    #[test]
    fn test_take_due_in_order() {
        let mut timers = DelayedEvents::new();
        let now = Instant::now();
        timers.schedule(
            "b".into(),
            Event::new("late"),
            Route::External,
            now + Duration::from_millis(20),
        );
        timers.schedule(
            "a".into(),
            Event::new("early"),
            Route::External,
            now + Duration::from_millis(10),
        );
        timers.schedule(
            "c".into(),
            Event::new("later"),
            Route::External,
            now + Duration::from_millis(30),
        );

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_millis(10)));
        let fired = timers.take_due(now + Duration::from_millis(20));
        let names: Vec<_> = fired.iter().map(|d| d.event.name.as_str()).collect();
        assert_eq!(names, vec!["early", "late"]);
        assert_eq!(timers.len(), 1);
        assert!(!timers.contains("a"));
        assert!(timers.contains("c"));
    }

    #[test]
    fn test_cancel() {
        let mut timers = DelayedEvents::new();
        let now = Instant::now();
        timers.schedule("x".into(), Event::new("x"), Route::Internal, now);
        assert!(timers.cancel("x"));
        assert!(!timers.cancel("x"));
        assert!(timers.take_due(now).is_empty());
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn test_same_due_time_keeps_submission_order() {
        let mut timers = DelayedEvents::new();
        let due = Instant::now();
        for name in ["first", "second", "third"] {
            timers.schedule(name.into(), Event::new(name), Route::External, due);
        }
        let names: Vec<_> = timers
            .take_due(due)
            .into_iter()
            .map(|d| d.event.name)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }
}
