//! Raw neutron events and per-spectrum event lists.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Plain time-of-flight event with its pulse time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TofEvent {
    /// Time of flight (microseconds).
    pub tof: f64,
    /// Pulse time (nanoseconds since run start).
    #[cfg_attr(feature = "serde", serde(default))]
    pub pulse_time: i64,
}

impl TofEvent {
    /// Creates a new TOF event.
    #[inline]
    #[must_use]
    pub fn new(tof: f64, pulse_time: i64) -> Self {
        Self { tof, pulse_time }
    }
}

/// Weighted event carrying its own signal and squared error.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightedEvent {
    /// Time of flight (microseconds).
    pub tof: f64,
    /// Pulse time (nanoseconds since run start).
    #[cfg_attr(feature = "serde", serde(default))]
    pub pulse_time: i64,
    /// Event weight.
    pub weight: f32,
    /// Squared error of the weight.
    pub error_squared: f32,
}

impl WeightedEvent {
    /// Creates a new weighted event.
    #[inline]
    #[must_use]
    pub fn new(tof: f64, pulse_time: i64, weight: f32, error_squared: f32) -> Self {
        Self {
            tof,
            pulse_time,
            weight,
            error_squared,
        }
    }
}

/// Weighted event without pulse time, for compact storage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightedEventNoTime {
    /// Time of flight (microseconds).
    pub tof: f64,
    /// Event weight.
    pub weight: f32,
    /// Squared error of the weight.
    pub error_squared: f32,
}

impl WeightedEventNoTime {
    /// Creates a new weighted event without pulse time.
    #[inline]
    #[must_use]
    pub fn new(tof: f64, weight: f32, error_squared: f32) -> Self {
        Self {
            tof,
            weight,
            error_squared,
        }
    }
}

/// Trait shared by all raw event representations.
///
/// Conversion code is generic over this trait so the event list variant is
/// matched once per spectrum rather than once per event.
pub trait Event: Send + Sync {
    /// Returns the time-of-flight value.
    fn tof(&self) -> f64;

    /// Returns the event weight.
    fn weight(&self) -> f32;

    /// Returns the squared error of the weight.
    fn error_squared(&self) -> f32;
}

impl Event for TofEvent {
    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn weight(&self) -> f32 {
        1.0
    }

    #[inline]
    fn error_squared(&self) -> f32 {
        1.0
    }
}

impl Event for WeightedEvent {
    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn weight(&self) -> f32 {
        self.weight
    }

    #[inline]
    fn error_squared(&self) -> f32 {
        self.error_squared
    }
}

impl Event for WeightedEventNoTime {
    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn weight(&self) -> f32 {
        self.weight
    }

    #[inline]
    fn error_squared(&self) -> f32 {
        self.error_squared
    }
}

/// Storage representation of an event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventType {
    /// Plain TOF events.
    Tof,
    /// Weighted events with pulse time.
    Weighted,
    /// Weighted events without pulse time.
    WeightedNoTime,
}

/// Events recorded by one spectrum.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(tag = "type", content = "events", rename_all = "snake_case")
)]
pub enum EventList {
    /// Plain TOF events.
    Tof(Vec<TofEvent>),
    /// Weighted events with pulse time.
    Weighted(Vec<WeightedEvent>),
    /// Weighted events without pulse time.
    WeightedNoTime(Vec<WeightedEventNoTime>),
}

impl Default for EventList {
    fn default() -> Self {
        Self::Tof(Vec::new())
    }
}

impl EventList {
    /// Returns the storage representation.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Tof(_) => EventType::Tof,
            Self::Weighted(_) => EventType::Weighted,
            Self::WeightedNoTime(_) => EventType::WeightedNoTime,
        }
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Tof(events) => events.len(),
            Self::Weighted(events) => events.len(),
            Self::WeightedNoTime(events) => events.len(),
        }
    }

    /// Returns true if the list holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of event weights.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        fn sum<E: Event>(events: &[E]) -> f64 {
            events.iter().map(|e| f64::from(e.weight())).sum()
        }
        match self {
            Self::Tof(events) => sum(events),
            Self::Weighted(events) => sum(events),
            Self::WeightedNoTime(events) => sum(events),
        }
    }

    /// Smallest and largest time-of-flight values, if any.
    #[must_use]
    pub fn tof_range(&self) -> Option<(f64, f64)> {
        fn range<E: Event>(events: &[E]) -> Option<(f64, f64)> {
            events.iter().fold(None, |acc, e| {
                let t = e.tof();
                Some(match acc {
                    None => (t, t),
                    Some((lo, hi)) => (lo.min(t), hi.max(t)),
                })
            })
        }
        match self {
            Self::Tof(events) => range(events),
            Self::Weighted(events) => range(events),
            Self::WeightedNoTime(events) => range(events),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;

    #[test]
    fn test_tof_event_unit_weight() {
        let event = TofEvent::new(1500.0, 10);
        assert_eq!(event.tof(), 1500.0);
        assert_eq!(event.weight(), 1.0);
        assert_eq!(event.error_squared(), 1.0);
    }

    #[test]
    fn test_event_list_accessors() {
        let list = EventList::Weighted(vec![
            WeightedEvent::new(100.0, 0, 2.0, 4.0),
            WeightedEvent::new(50.0, 0, 0.5, 0.25),
        ]);
        assert_eq!(list.event_type(), EventType::Weighted);
        assert_eq!(list.len(), 2);
        assert!((list.total_weight() - 2.5).abs() < 1e-12);
        assert_eq!(list.tof_range(), Some((50.0, 100.0)));

        let empty = EventList::WeightedNoTime(Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.tof_range(), None);
        assert_eq!(EventList::default().event_type(), EventType::Tof);
    }
}
