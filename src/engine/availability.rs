use chrono::NaiveDate;

use crate::model::{FieldState, TimeOfDay, TimeSlot};

use super::conflict::find_conflicts;

// ── Alternative-slot suggestion ───────────────────────────────────

/// Operating-hours grid used to generate candidate slots. A configuration
/// value, not business logic: defaults reproduce the classic academy grid
/// (08:00–09:30, 10:00–11:30, …, 18:00–19:30).
#[derive(Debug, Clone, Copy)]
pub struct SlotGrid {
    pub open: TimeOfDay,
    pub close: TimeOfDay,
    /// Slot length used when the caller gives no duration.
    pub slot_minutes: u16,
    /// Gap between consecutive candidate start times.
    pub stride_minutes: u16,
}

impl Default for SlotGrid {
    fn default() -> Self {
        Self {
            open: TimeOfDay::from_hm(8, 0),
            close: TimeOfDay::from_hm(19, 30),
            slot_minutes: 90,
            stride_minutes: 120,
        }
    }
}

impl SlotGrid {
    /// Candidate slots of `duration_minutes`, starting every `stride_minutes`
    /// from opening time, entirely within operating hours. Chronological.
    pub fn candidate_slots(&self, duration_minutes: u16) -> Vec<TimeSlot> {
        let duration = if duration_minutes == 0 {
            self.slot_minutes
        } else {
            duration_minutes
        };
        let stride = self.stride_minutes.max(1);

        let mut slots = Vec::new();
        let mut start = self.open.minutes();
        while start + duration <= self.close.minutes() {
            slots.push(TimeSlot::new(
                TimeOfDay(start),
                TimeOfDay(start + duration),
            ));
            start += stride;
        }
        slots
    }
}

/// Propose same-day slots of the requested duration that pass the conflict
/// check. Suggestions only: nothing is held or locked, and two callers may
/// race for the same slot — the conflict check at commit time decides.
pub fn suggest_alternatives(
    fs: &FieldState,
    date: NaiveDate,
    duration_minutes: u16,
    grid: &SlotGrid,
) -> Vec<TimeSlot> {
    grid.candidate_slots(duration_minutes)
        .into_iter()
        .filter(|slot| find_conflicts(fs, date, slot, None).is_empty())
        .collect()
}
