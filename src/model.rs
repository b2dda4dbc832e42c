use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::ser::{Serialize, Serializer};
use ulid::Ulid;

/// Wall-clock time of day as minutes since midnight. Wire form is `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(pub u16);

impl TimeOfDay {
    pub const fn from_hm(hour: u16, minute: u16) -> Self {
        Self(hour * 60 + minute)
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeError(String);

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day: {}", self.0)
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseTimeError(s.to_string());
        let (h, m) = s.split_once(':').ok_or_else(bad)?;
        let hour: u16 = h.parse().map_err(|_| bad())?;
        let minute: u16 = m.parse().map_err(|_| bad())?;
        if hour >= 24 || minute >= 60 {
            return Err(bad());
        }
        Ok(Self::from_hm(hour, minute))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimeVisitor;

        impl Visitor<'_> for TimeVisitor {
            type Value = TimeOfDay;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 24-hour time string like \"14:30\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TimeOfDay, E> {
                v.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(TimeVisitor)
    }
}

/// Half-open time interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeSlot {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeSlot {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.0 - self.start.0
    }

    /// Half-open overlap: touching slots (a.end == b.start) do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    Training,
    Match,
    Maintenance,
    Event,
    Rental,
    Tournament,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Confirmed,
    Pending,
    Cancelled,
    /// Derived at read time for confirmed bookings whose end lies in the past.
    /// Never stored.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
}

/// Recurrence descriptor. Stored verbatim; occurrences are never expanded —
/// each occurrence is a distinct booking row created by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Recurrence {
    pub kind: RecurrenceKind,
    pub until: NaiveDate,
}

/// A reservation of one field for a contiguous slot on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub field_id: Ulid,
    pub title: String,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub kind: BookingKind,
    pub status: BookingStatus,
    pub booked_by: String,
    pub notes: Option<String>,
    pub recurrence: Option<Recurrence>,
}

/// A bookable field plus every booking ever placed on it, sorted by
/// `(date, slot.start)`. Cancelled bookings stay in the list for history.
#[derive(Debug, Clone)]
pub struct FieldState {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub indoor: bool,
    /// Non-empty notes imply reduced availability (maintenance status).
    pub maintenance_notes: Option<String>,
    /// Cleared on soft delete; booking history is preserved.
    pub active: bool,
    pub bookings: Vec<Booking>,
}

impl FieldState {
    pub fn new(
        id: Ulid,
        name: String,
        capacity: u32,
        indoor: bool,
        maintenance_notes: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            capacity,
            indoor,
            maintenance_notes,
            active: true,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining `(date, slot.start)` order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.slot.start);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.slot.start) <= key);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        self.bookings
            .iter()
            .position(|b| b.id == id)
            .map(|pos| self.bookings.remove(pos))
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    /// Bookings on a single calendar date, via binary search on the sort key.
    pub fn on_date(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    /// Bookings with `from <= date` and, when given, `date <= to`.
    pub fn in_range(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(move |b| {
            from.is_none_or(|f| b.date >= f) && to.is_none_or(|t| b.date <= t)
        })
    }
}

/// The WAL record format — flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Event {
    FieldCreated {
        id: Ulid,
        name: String,
        capacity: u32,
        indoor: bool,
        maintenance_notes: Option<String>,
    },
    FieldUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
        indoor: bool,
        maintenance_notes: Option<String>,
    },
    FieldDeactivated {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        field_id: Ulid,
        title: String,
        date: NaiveDate,
        slot: TimeSlot,
        kind: BookingKind,
        booked_by: String,
        notes: Option<String>,
        recurrence: Option<Recurrence>,
    },
    BookingUpdated {
        id: Ulid,
        field_id: Ulid,
        title: String,
        date: NaiveDate,
        slot: TimeSlot,
        kind: BookingKind,
        status: BookingStatus,
        notes: Option<String>,
    },
    BookingCancelled {
        id: Ulid,
        field_id: Ulid,
        reason: Option<String>,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Derived availability label for a field listing. Recomputed on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Available,
    Occupied,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldSummary {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
    pub indoor: bool,
    pub maintenance_notes: Option<String>,
    pub active: bool,
    pub status: FieldStatus,
}

/// Summary counts over a filtered booking window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BookingStats {
    pub total: usize,
    pub confirmed: usize,
    pub pending: usize,
    pub cancelled: usize,
    pub completed: usize,
}

/// Result of an availability probe. Alternatives are suggestions only — no
/// hold is placed; the conflict check at commit time is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityResult {
    pub is_available: bool,
    pub conflicts: Vec<Booking>,
    pub alternative_slots: Vec<TimeSlot>,
}
