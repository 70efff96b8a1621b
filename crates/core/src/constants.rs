//! Constants used throughout the CKD core crate.
//!
//! Clinical bounds and token lifetimes live here so every decision function reads the same values.

/// Lowest accepted serum creatinine (umol/L). Also keeps the eGFR formula away from zero.
pub const MIN_CREATININE_UMOL_PER_L: f64 = 1.0;

/// Inclusive plausibility band for a computed eGFR.
pub const EGFR_MIN: f64 = 0.0;
pub const EGFR_MAX: f64 = 200.0;

/// Inclusive age bounds (whole years) for using the calculator.
pub const MIN_AGE_YEARS: i32 = 18;
pub const MAX_AGE_YEARS: i32 = 110;

/// Password length bounds, counted in characters after trimming.
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 15;

/// Session lifetime for a normal login.
pub const TOKEN_LIFETIME_DAYS: i64 = 1;

/// Session lifetime when "remember me" was requested.
pub const EXTENDED_TOKEN_LIFETIME_DAYS: i64 = 7;

/// Name of the cookie carrying the signed session token.
pub const SESSION_COOKIE_NAME: &str = "jwt";

/// Default base URL used when building the guest registration deep link.
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";

/// Subject line of the guest result notification.
pub const GUEST_RESULT_SUBJECT: &str = "Your CKD calculator result.";
