//! eGFR calculation.
//!
//! Implements the four-variable MDRD equation:
//!
//! ```text
//! eGFR = 186 * (creatinine / 88.4)^-1.154 * age^-0.203 * (0.742 if female) * (1.210 if black)
//! ```
//!
//! with creatinine in umol/L. The functions here are pure; callers must reject creatinine below
//! [`MIN_CREATININE_UMOL_PER_L`](crate::constants::MIN_CREATININE_UMOL_PER_L) and out-of-range
//! ages before calling [`estimate_gfr`].

use crate::models::Gender;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

const CREATININE_MG_DL_DIVISOR: f64 = 88.4;
const MDRD_CONSTANT: f64 = 186.0;
const CREATININE_EXPONENT: f64 = -1.154;
const AGE_EXPONENT: f64 = -0.203;
const FEMALE_FACTOR: f64 = 0.742;
const BLACK_FACTOR: f64 = 1.210;

/// Whole years elapsed between `date_of_birth` and `now`.
///
/// The elapsed span is added to the epoch `0001-01-01T00:00:00` and the resulting calendar year,
/// minus one, is the age. A birthday that has not been reached yet this year therefore rounds
/// down. A date of birth in the future yields a negative age.
pub fn age_in_years(date_of_birth: NaiveDate, now: DateTime<Utc>) -> i32 {
    let born = date_of_birth.and_time(chrono::NaiveTime::MIN);
    let span = now.naive_utc() - born;

    if span < Duration::zero() {
        return -(age_from_span(-span) + 1);
    }
    age_from_span(span)
}

fn age_from_span(span: Duration) -> i32 {
    use chrono::Datelike;

    let epoch = NaiveDate::from_ymd_opt(1, 1, 1)
        .map(|d| d.and_time(chrono::NaiveTime::MIN))
        .unwrap_or(NaiveDateTime::MIN);

    epoch
        .checked_add_signed(span)
        .map(|t| t.year() - 1)
        .unwrap_or(i32::MAX)
}

/// Estimated glomerular filtration rate (mL/min/1.73m²).
pub fn estimate_gfr(
    creatinine_umol_per_l: f64,
    date_of_birth: NaiveDate,
    gender: Gender,
    is_black: bool,
    now: DateTime<Utc>,
) -> f64 {
    let age = f64::from(age_in_years(date_of_birth, now));
    egfr_for_age(creatinine_umol_per_l, age, gender, is_black)
}

/// The MDRD formula with the age already resolved.
pub fn egfr_for_age(creatinine_umol_per_l: f64, age_years: f64, gender: Gender, is_black: bool) -> f64 {
    let sex_factor = match gender {
        Gender::Female => FEMALE_FACTOR,
        Gender::Male => 1.0,
    };
    let ethnicity_factor = if is_black { BLACK_FACTOR } else { 1.0 };

    MDRD_CONSTANT
        * (creatinine_umol_per_l / CREATININE_MG_DL_DIVISOR).powf(CREATININE_EXPONENT)
        * age_years.powf(AGE_EXPONENT)
        * sex_factor
        * ethnicity_factor
}

/// CKD severity band for an eGFR value. Presentation only; never used for decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub enum CkdStage {
    Stage1,
    Stage2,
    Stage3a,
    Stage3b,
    Stage4,
    Stage5,
}

impl CkdStage {
    pub fn from_egfr(egfr: f64) -> Self {
        if egfr >= 90.0 {
            CkdStage::Stage1
        } else if egfr >= 60.0 {
            CkdStage::Stage2
        } else if egfr >= 45.0 {
            CkdStage::Stage3a
        } else if egfr >= 30.0 {
            CkdStage::Stage3b
        } else if egfr >= 15.0 {
            CkdStage::Stage4
        } else {
            CkdStage::Stage5
        }
    }

    /// Tier number 1-6, as shown to users.
    pub fn tier(self) -> u8 {
        match self {
            CkdStage::Stage1 => 1,
            CkdStage::Stage2 => 2,
            CkdStage::Stage3a => 3,
            CkdStage::Stage3b => 4,
            CkdStage::Stage4 => 5,
            CkdStage::Stage5 => 6,
        }
    }
}
