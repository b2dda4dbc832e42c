use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::Principal;
use crate::limits::*;
use crate::model::*;

use super::conflict::{find_conflicts, validate_slot};
use super::{Engine, EngineError};

/// Field attributes for create/update, already validated for presence at the
/// HTTP boundary.
#[derive(Debug, Clone)]
pub struct FieldAttrs {
    pub name: String,
    pub capacity: u32,
    pub indoor: bool,
    pub maintenance_notes: Option<String>,
}

/// A fully-specified booking request. Missing-field validation happens at the
/// HTTP boundary; semantic validation happens here.
#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub field_id: Ulid,
    pub title: String,
    pub date: NaiveDate,
    pub slot: TimeSlot,
    pub kind: BookingKind,
    pub notes: Option<String>,
    pub recurrence: Option<Recurrence>,
}

/// Partial update. `None` means "keep the existing value". Notes are doubly
/// optional so an explicit null can clear them: `Some(None)` clears,
/// `Some(Some(_))` replaces, `None` keeps.
#[derive(Debug, Clone, Default)]
pub struct BookingPatch {
    pub title: Option<String>,
    pub date: Option<NaiveDate>,
    pub start: Option<TimeOfDay>,
    pub end: Option<TimeOfDay>,
    pub kind: Option<BookingKind>,
    pub status: Option<BookingStatus>,
    pub notes: Option<Option<String>>,
}

fn validate_text(title: &str, notes: Option<&str>) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::Validation(vec!["booking_title"]));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("booking title too long"));
    }
    if notes.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

/// Only the original booker or a privileged role may touch a booking.
fn authorize(booking: &Booking, actor: &Principal) -> Result<(), EngineError> {
    if booking.booked_by == actor.user || actor.role.is_privileged() {
        Ok(())
    } else {
        Err(EngineError::Forbidden)
    }
}

impl Engine {
    pub async fn create_field(&self, id: Ulid, attrs: FieldAttrs) -> Result<(), EngineError> {
        if self.state.len() >= MAX_FIELDS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many fields"));
        }
        if attrs.name.trim().is_empty() {
            return Err(EngineError::Validation(vec!["name"]));
        }
        if attrs.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("field name too long"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::FieldCreated {
            id,
            name: attrs.name.clone(),
            capacity: attrs.capacity,
            indoor: attrs.indoor,
            maintenance_notes: attrs.maintenance_notes.clone(),
        };
        self.wal_append(&event).await?;
        let fs = FieldState::new(id, attrs.name, attrs.capacity, attrs.indoor, attrs.maintenance_notes);
        self.state
            .insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(fs)));
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_field(&self, id: Ulid, attrs: FieldAttrs) -> Result<(), EngineError> {
        if attrs.name.trim().is_empty() {
            return Err(EngineError::Validation(vec!["name"]));
        }
        if attrs.name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("field name too long"));
        }
        let fs = self.get_field(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = fs.write().await;

        let event = Event::FieldUpdated {
            id,
            name: attrs.name,
            capacity: attrs.capacity,
            indoor: attrs.indoor,
            maintenance_notes: attrs.maintenance_notes,
        };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Soft delete: the active flag is cleared, booking history stays intact.
    /// Deactivating an already-inactive field is a no-op.
    pub async fn deactivate_field(&self, id: Ulid) -> Result<(), EngineError> {
        let fs = self.get_field(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = fs.write().await;
        if !guard.active {
            return Ok(());
        }

        let event = Event::FieldDeactivated { id };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Create a confirmed booking. The conflict check and the insert run
    /// under one per-field write lock, so two concurrent creates for
    /// overlapping slots cannot both commit.
    pub async fn create_booking(
        &self,
        req: CreateBooking,
        actor: &Principal,
    ) -> Result<Booking, EngineError> {
        validate_text(&req.title, req.notes.as_deref())?;
        validate_slot(&req.slot)?;

        let fs = self
            .get_field(&req.field_id)
            .ok_or(EngineError::NotFound(req.field_id))?;
        let mut guard = fs.write().await;
        if !guard.active {
            return Err(EngineError::Inactive(req.field_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_FIELD {
            return Err(EngineError::LimitExceeded("too many bookings on field"));
        }

        let conflicts = find_conflicts(&guard, req.date, &req.slot, None);
        if !conflicts.is_empty() {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(conflicts));
        }

        let id = Ulid::new();
        let event = Event::BookingCreated {
            id,
            field_id: req.field_id,
            title: req.title,
            date: req.date,
            slot: req.slot,
            kind: req.kind,
            booked_by: actor.user.clone(),
            notes: req.notes,
            recurrence: req.recurrence,
        };
        self.persist_and_apply(req.field_id, &mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);

        guard
            .get_booking(&id)
            .cloned()
            .ok_or_else(|| EngineError::WalError("booking vanished after apply".into()))
    }

    /// PATCH-merge update. Conflicts are re-checked (excluding the booking's
    /// own id) whenever the effective date or slot changes, or when a
    /// non-confirmed booking is being confirmed.
    pub async fn update_booking(
        &self,
        booking_id: Ulid,
        patch: BookingPatch,
        actor: &Principal,
    ) -> Result<Booking, EngineError> {
        // Cancellation goes through cancel_booking, which records the reason.
        if patch.status == Some(BookingStatus::Cancelled)
            || patch.status == Some(BookingStatus::Completed)
        {
            return Err(EngineError::Validation(vec!["status"]));
        }

        let (field_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let existing = guard
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?
            .clone();
        authorize(&existing, actor)?;

        let title = patch.title.unwrap_or_else(|| existing.title.clone());
        let date = patch.date.unwrap_or(existing.date);
        let slot = TimeSlot {
            start: patch.start.unwrap_or(existing.slot.start),
            end: patch.end.unwrap_or(existing.slot.end),
        };
        let kind = patch.kind.unwrap_or(existing.kind);
        let status = patch.status.unwrap_or(existing.status);
        let notes = patch.notes.unwrap_or_else(|| existing.notes.clone());

        validate_text(&title, notes.as_deref())?;
        validate_slot(&slot)?;

        let time_changed = date != existing.date || slot != existing.slot;
        let becomes_confirmed =
            status == BookingStatus::Confirmed && existing.status != BookingStatus::Confirmed;
        if (time_changed && status == BookingStatus::Confirmed) || becomes_confirmed {
            let conflicts = find_conflicts(&guard, date, &slot, Some(booking_id));
            if !conflicts.is_empty() {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::Conflict(conflicts));
            }
        }

        let event = Event::BookingUpdated {
            id: booking_id,
            field_id,
            title,
            date,
            slot,
            kind,
            status,
            notes,
        };
        self.persist_and_apply(field_id, &mut guard, &event).await?;

        guard
            .get_booking(&booking_id)
            .cloned()
            .ok_or_else(|| EngineError::WalError("booking vanished after apply".into()))
    }

    /// Soft cancel: status becomes `cancelled`, the reason is appended to the
    /// notes, the row is kept for history. Cancelling an already-cancelled
    /// booking succeeds silently without touching the recorded reason.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        reason: Option<String>,
        actor: &Principal,
    ) -> Result<(), EngineError> {
        if reason.as_deref().is_some_and(|r| r.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }

        let (field_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let existing = guard
            .get_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        authorize(existing, actor)?;
        if existing.status == BookingStatus::Cancelled {
            return Ok(());
        }

        let event = Event::BookingCancelled {
            id: booking_id,
            field_id,
            reason,
        };
        self.persist_and_apply(field_id, &mut guard, &event).await
    }
}
