use crate::model::{Cents, DAY, Ms};

// Contact fields
pub const MAX_NAME_LEN: usize = 120;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2000;

// Catalog
pub const MAX_SERVICE_NAME_LEN: usize = 200;
pub const MAX_SKU_LEN: usize = 64;
/// 1,000,000.00 in minor units.
pub const MAX_PRICE: Cents = 100_000_000;
pub const MAX_SERVICE_DURATION_MS: Ms = 12 * 3_600_000;
pub const MAX_BUFFER_MS: Ms = 4 * 3_600_000;
pub const MAX_RULES: usize = 64;
pub const MAX_BLACKOUTS: usize = 2_000;
pub const MAX_DAYS_OUT: u32 = 730;

// Queries
pub const MAX_QUERY_DAYS: i64 = 92;

// Storefront carts
pub const MAX_CART_LINES: usize = 50;
pub const MAX_LINE_QUANTITY: u32 = 100;

// Webhooks
pub const MAX_WEBHOOK_BODY_BYTES: usize = 256 * 1024;
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

// Reservation timestamps: 2000-01-01 .. 2100-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

// Hold TTL bounds
pub const MIN_HOLD_TTL_MS: Ms = 60_000;
pub const MAX_HOLD_TTL_MS: Ms = DAY;
