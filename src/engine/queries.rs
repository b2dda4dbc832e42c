use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;

use super::availability::suggest_alternatives;
use super::conflict::{find_conflicts, today_now, validate_slot};
use super::status::resolve_status;
use super::{Engine, EngineError};

/// Optional filters for the cross-field booking listing. All absent means
/// "everything".
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub field_id: Option<Ulid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub kind: Option<BookingKind>,
    pub status: Option<BookingStatus>,
}

/// A confirmed booking whose end time has passed reads as `completed`.
/// Derived at read time, never written back.
fn effective_status(b: &Booking, today: NaiveDate, now: TimeOfDay) -> BookingStatus {
    if b.status == BookingStatus::Confirmed
        && (b.date < today || (b.date == today && b.slot.end <= now))
    {
        BookingStatus::Completed
    } else {
        b.status
    }
}

fn with_effective_status(mut b: Booking, today: NaiveDate, now: TimeOfDay) -> Booking {
    b.status = effective_status(&b, today, now);
    b
}

impl Engine {
    /// All fields with their derived availability status, sorted by name.
    pub async fn list_fields(&self) -> Vec<FieldSummary> {
        let (today, _) = today_now();
        let arcs: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();

        let mut out = Vec::with_capacity(arcs.len());
        for fs in arcs {
            let guard = fs.read().await;
            out.push(FieldSummary {
                id: guard.id,
                name: guard.name.clone(),
                capacity: guard.capacity,
                indoor: guard.indoor,
                maintenance_notes: guard.maintenance_notes.clone(),
                active: guard.active,
                status: resolve_status(&guard, today),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Filtered listing across all fields, with counts per status. Stats are
    /// computed over everything matching the field/date/kind filters, before
    /// the status filter narrows the returned rows.
    pub async fn list_bookings(
        &self,
        filter: &BookingFilter,
    ) -> Result<(Vec<Booking>, BookingStats), EngineError> {
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && (to - from).num_days() > MAX_QUERY_WINDOW_DAYS
        {
            return Err(EngineError::LimitExceeded("date window too wide"));
        }

        let (today, now) = today_now();
        let arcs: Vec<_> = match filter.field_id {
            Some(id) => vec![self.get_field(&id).ok_or(EngineError::NotFound(id))?],
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };

        let mut bookings = Vec::new();
        let mut stats = BookingStats::default();
        for fs in arcs {
            let guard = fs.read().await;
            for b in &guard.bookings {
                if filter.from.is_some_and(|from| b.date < from)
                    || filter.to.is_some_and(|to| b.date > to)
                    || filter.kind.is_some_and(|k| b.kind != k)
                {
                    continue;
                }
                let b = with_effective_status(b.clone(), today, now);
                match b.status {
                    BookingStatus::Confirmed => stats.confirmed += 1,
                    BookingStatus::Pending => stats.pending += 1,
                    BookingStatus::Cancelled => stats.cancelled += 1,
                    BookingStatus::Completed => stats.completed += 1,
                }
                stats.total += 1;
                if filter.status.is_none_or(|s| b.status == s) {
                    bookings.push(b);
                }
            }
        }
        bookings.sort_by_key(|b| (b.date, b.slot.start, b.id));
        Ok((bookings, stats))
    }

    /// Bookings for one field, `from` defaulting to today. Cancelled rows are
    /// included: history stays visible.
    pub async fn bookings_for_field(
        &self,
        field_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        let (today, now) = today_now();
        let from = from.unwrap_or(today);
        if let Some(to) = to
            && (to - from).num_days() > MAX_QUERY_WINDOW_DAYS
        {
            return Err(EngineError::LimitExceeded("date window too wide"));
        }

        let fs = self
            .get_field(&field_id)
            .ok_or(EngineError::NotFound(field_id))?;
        let guard = fs.read().await;
        Ok(guard
            .in_range(Some(from), to)
            .map(|b| with_effective_status(b.clone(), today, now))
            .collect())
    }

    /// Dry-run conflict check: would this slot be bookable? When it is not,
    /// same-day alternatives of the same duration are suggested. Nothing is
    /// reserved; a create may still race and lose.
    pub async fn check_availability(
        &self,
        field_id: Ulid,
        date: NaiveDate,
        slot: TimeSlot,
    ) -> Result<AvailabilityResult, EngineError> {
        validate_slot(&slot)?;
        let fs = self
            .get_field(&field_id)
            .ok_or(EngineError::NotFound(field_id))?;
        let guard = fs.read().await;

        let conflicts = find_conflicts(&guard, date, &slot, None);
        let alternative_slots = if conflicts.is_empty() {
            Vec::new()
        } else {
            suggest_alternatives(&guard, date, slot.duration_minutes(), &self.grid)
        };
        Ok(AvailabilityResult {
            is_available: conflicts.is_empty(),
            conflicts,
            alternative_slots,
        })
    }

    pub async fn get_booking(&self, booking_id: &Ulid) -> Option<Booking> {
        let (today, now) = today_now();
        let field_id = self.field_for_booking(booking_id)?;
        let fs = self.get_field(&field_id)?;
        let guard = fs.read().await;
        guard
            .get_booking(booking_id)
            .map(|b| with_effective_status(b.clone(), today, now))
    }
}
