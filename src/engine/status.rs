use chrono::NaiveDate;

use crate::model::{BookingStatus, FieldState, FieldStatus};

/// Derive a field's availability label from today's bookings and maintenance
/// notes. Priority order, first match wins:
///
/// 1. any confirmed booking today → `occupied`
/// 2. non-empty maintenance notes → `maintenance`
/// 3. otherwise → `available`
///
/// Recomputed on every listing; never stored on the field.
pub fn resolve_status(fs: &FieldState, today: NaiveDate) -> FieldStatus {
    let occupied = fs
        .on_date(today)
        .iter()
        .any(|b| b.status == BookingStatus::Confirmed);
    if occupied {
        FieldStatus::Occupied
    } else if fs
        .maintenance_notes
        .as_deref()
        .is_some_and(|n| !n.trim().is_empty())
    {
        FieldStatus::Maintenance
    } else {
        FieldStatus::Available
    }
}
