use chrono::{NaiveDate, Timelike};
use ulid::Ulid;

use crate::model::{Booking, BookingStatus, FieldState, TimeOfDay, TimeSlot};

use super::EngineError;

/// Current wall-clock date and time of day, minute resolution.
pub(crate) fn today_now() -> (NaiveDate, TimeOfDay) {
    let now = chrono::Local::now().naive_local();
    let tod = TimeOfDay::from_hm(now.time().hour() as u16, now.time().minute() as u16);
    (now.date(), tod)
}

/// Reject degenerate slots before any conflict check runs. The overlap test
/// itself assumes well-formed half-open intervals.
pub(crate) fn validate_slot(slot: &TimeSlot) -> Result<(), EngineError> {
    if slot.start >= slot.end {
        return Err(EngineError::Validation(vec!["start_time", "end_time"]));
    }
    Ok(())
}

/// Return every confirmed booking on `date` whose slot overlaps `slot`,
/// skipping `exclude` (a booking being updated never conflicts with itself).
///
/// Pending, cancelled, and past-derived-completed bookings never conflict.
/// The returned list is empty iff the requested slot is free.
pub(crate) fn find_conflicts(
    fs: &FieldState,
    date: NaiveDate,
    slot: &TimeSlot,
    exclude: Option<Ulid>,
) -> Vec<Booking> {
    fs.on_date(date)
        .iter()
        .filter(|b| {
            b.status == BookingStatus::Confirmed
                && exclude != Some(b.id)
                && b.slot.overlaps(slot)
        })
        .cloned()
        .collect()
}
