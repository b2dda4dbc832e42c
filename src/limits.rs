//! Hard limits guarding memory and WAL growth. All are generous for a single
//! academy; hitting one indicates a misbehaving client.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_FIELDS_PER_TENANT: usize = 4096;
pub const MAX_BOOKINGS_PER_FIELD: usize = 65_536;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;

/// Widest date range accepted by booking list queries.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;
