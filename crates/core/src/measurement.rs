//! Turning a creatinine value into a validated, stored eGFR result.
//!
//! ## Single measurement
//!
//! 1. Reject creatinine below the floor.
//! 2. Resolve whose measurement this is: the caller, a supervised patient (clinicians), or an
//!    unregistered guest.
//! 3. Check the subject's age, then compute eGFR.
//! 4. Reject results outside the plausibility band.
//! 5. Persist for registered subjects; optionally notify guests.
//!
//! ## Batch
//!
//! [`MeasurementPipeline::bulk_calculate`] processes entries in order and stops at the first
//! invalid one. Nothing is written until every entry has been accepted.

use crate::authorization::{authorize_supervision, require_clinician};
use crate::clinical::{estimate_gfr, CkdStage};
use crate::config::CoreConfig;
use crate::constants::{EGFR_MAX, EGFR_MIN, GUEST_RESULT_SUBJECT, MIN_CREATININE_UMOL_PER_L};
use crate::error::{CkdError, CkdResult};
use crate::models::{flexible_date, AccessLevel, Gender, Measurement, NewMeasurement, User};
use crate::notify::{DeliveryReceipt, LinkBuilder, Notifier};
use crate::store::{MeasurementStore, UserStore};
use crate::validation::{check_age, validate_guest};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CREATININE_INVALID: &str = "Creatinine value is invalid";
const RESULT_OUT_OF_RANGE: &str = "Result above/below the range, check your creatinine value";

/// A logged-in user's measurement. Clinicians measuring for a patient name them by NHS number.
#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserMeasurementRequest {
    /// Serum creatinine in umol/L.
    pub creatinine: f64,
    pub patient_nhs_number: Option<i64>,
}

/// An anonymous, one-off calculation. Nothing is stored.
#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuestMeasurementRequest {
    pub creatinine: f64,
    pub nhs_number: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    #[serde(with = "flexible_date")]
    #[schema(value_type = String, format = Date)]
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub is_black: bool,
}

/// One row of a clinician's batch upload.
#[derive(Clone, Debug, PartialEq, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkEntry {
    pub creatinine: f64,
    pub nhs_number: i64,
    #[serde(with = "flexible_date")]
    #[schema(value_type = String, format = Date)]
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub is_black: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum NotificationStatus {
    NotRequested,
    Sent,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuestOutcome {
    pub result: f64,
    pub notification: NotificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<DeliveryReceipt>,
}

#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub result: f64,
    pub stage: u8,
    /// Whether the entry matched a registered user and was stored.
    pub persisted: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub results: Vec<BulkResult>,
}

#[derive(Clone)]
pub struct MeasurementPipeline {
    users: Arc<dyn UserStore>,
    measurements: Arc<dyn MeasurementStore>,
    notifier: Arc<dyn Notifier>,
    cfg: Arc<CoreConfig>,
    clock: fn() -> DateTime<Utc>,
}

impl MeasurementPipeline {
    pub fn new(
        users: Arc<dyn UserStore>,
        measurements: Arc<dyn MeasurementStore>,
        notifier: Arc<dyn Notifier>,
        cfg: Arc<CoreConfig>,
    ) -> Self {
        Self {
            users,
            measurements,
            notifier,
            cfg,
            clock: Utc::now,
        }
    }

    /// Replace the time source. Used to pin "now" in tests.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Measure for a logged-in caller.
    ///
    /// Patients measure themselves and may not name anyone else. Clinicians must name a patient
    /// they directly supervise. Managers and Sysadmins measure themselves.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` for creatinine below the floor, an out-of-range age or result
    /// - `Forbidden` for a patient naming another patient, or an unsupervised patient
    /// - `Contract` for a clinician who omits the patient's NHS number
    /// - `NotFound` when the named patient does not exist
    pub fn measure_for_user(
        &self,
        caller: &User,
        request: &UserMeasurementRequest,
    ) -> CkdResult<Measurement> {
        check_creatinine(request.creatinine)?;

        let subject = self.resolve_subject(caller, request.patient_nhs_number)?;
        let now = (self.clock)();

        let result = compute_checked(
            request.creatinine,
            subject.date_of_birth,
            subject.gender,
            subject.is_black,
            now,
        )?;

        let measurement = self.measurements.create(NewMeasurement {
            user_id: subject.id,
            timestamp: now,
            result,
        })?;

        tracing::info!(
            measurement_id = measurement.id.0,
            subject_id = %subject.id,
            caller_id = %caller.id,
            "measurement created"
        );
        Ok(measurement)
    }

    fn resolve_subject(&self, caller: &User, patient_nhs_number: Option<i64>) -> CkdResult<User> {
        match caller.access_level {
            AccessLevel::Patient if patient_nhs_number.is_some() => {
                tracing::warn!(caller_id = %caller.id, "patient tried to measure for someone else");
                Err(CkdError::forbidden("Insufficient permissions"))
            }
            AccessLevel::Clinician => {
                let nhs = patient_nhs_number
                    .ok_or(CkdError::Contract("missing patient's NHS number"))?;
                let patient = self
                    .users
                    .get_by_nhs_number(nhs)?
                    .ok_or_else(|| CkdError::not_found("Target user not found"))?;
                authorize_supervision(caller, &patient)?;
                Ok(patient)
            }
            _ => Ok(caller.clone()),
        }
    }

    /// One-off calculation for an anonymous guest.
    ///
    /// When an email is supplied, a result notification with a registration link is sent.
    /// A failed send is reported in the outcome but the result still stands.
    pub fn measure_guest(&self, request: &GuestMeasurementRequest) -> CkdResult<GuestOutcome> {
        check_creatinine(request.creatinine)?;

        let now = (self.clock)();
        let errors = validate_guest(
            request.date_of_birth,
            request.nhs_number,
            request.email.as_deref(),
            request.name.as_deref(),
            request.surname.as_deref(),
            now,
        );
        if !errors.is_empty() {
            return Err(CkdError::ValidationFailed(errors));
        }

        let result = compute_checked(
            request.creatinine,
            request.date_of_birth,
            request.gender,
            request.is_black,
            now,
        )?;

        let (notification, receipt) = match request.email.as_deref() {
            Some(email) => self.notify_guest(email, request, result),
            None => (NotificationStatus::NotRequested, None),
        };

        Ok(GuestOutcome {
            result,
            notification,
            receipt,
        })
    }

    fn notify_guest(
        &self,
        email: &str,
        request: &GuestMeasurementRequest,
        result: f64,
    ) -> (NotificationStatus, Option<DeliveryReceipt>) {
        let link = registration_link(self.cfg.public_base_url(), email, request, result);
        let body = format!(
            "Hello {} {}\n\n\
             Thank you for using our CKD calculator. Here are your results:\n\n\
             eGFR: {}\n\n\
             If you would like to view more details about the result or register with our service \
             to make your future calculation easier and for your clinician to be able to monitor \
             them please click here: {}",
            request.name.as_deref().unwrap_or_default(),
            request.surname.as_deref().unwrap_or_default(),
            result.floor() as i64,
            link
        );

        match self.notifier.send(email.trim(), GUEST_RESULT_SUBJECT, &body) {
            Ok(receipt) => (NotificationStatus::Sent, Some(receipt)),
            Err(e) => {
                tracing::warn!(error = %e, "guest result notification failed");
                (NotificationStatus::Failed, None)
            }
        }
    }

    /// Batch calculation for a clinician.
    ///
    /// Entries are processed in order. The first entry with invalid creatinine (below the floor
    /// or NaN) or an out-of-range age aborts the whole batch and nothing is stored. Otherwise
    /// every entry whose NHS number belongs to a registered user is stored, and all results are
    /// returned in input order.
    ///
    /// Storing the accepted entries is not atomic: a store failure part-way through leaves the
    /// earlier entries written.
    pub fn bulk_calculate(&self, caller: &User, entries: &[BulkEntry]) -> CkdResult<BulkOutcome> {
        require_clinician(caller)?;

        let now = (self.clock)();
        let mut computed = Vec::with_capacity(entries.len());
        let mut queued: Vec<(usize, NewMeasurement)> = Vec::new();

        for (index, entry) in entries.iter().enumerate() {
            let invalid_entry = || {
                CkdError::invalid(
                    "entries",
                    format!(
                        "Invalid or corrupted CSV file: Invalid creatinine value for entry {}",
                        index + 1
                    ),
                )
            };

            if check_creatinine(entry.creatinine).is_err() {
                tracing::warn!(entry = index + 1, "batch rejected: invalid creatinine");
                return Err(invalid_entry());
            }
            if check_age(entry.date_of_birth, now).is_some() {
                tracing::warn!(entry = index + 1, "batch rejected: age out of range");
                return Err(CkdError::invalid(
                    "entries",
                    format!("Invalid or corrupted CSV file: Invalid age for entry {}", index + 1),
                ));
            }

            let result = estimate_gfr(
                entry.creatinine,
                entry.date_of_birth,
                entry.gender,
                entry.is_black,
                now,
            );

            if let Some(user) = self.users.get_by_nhs_number(entry.nhs_number)? {
                queued.push((
                    index,
                    NewMeasurement {
                        user_id: user.id,
                        timestamp: now,
                        result,
                    },
                ));
            }
            computed.push(result);
        }

        let mut persisted = vec![false; computed.len()];
        for (index, measurement) in queued {
            self.measurements.create(measurement)?;
            persisted[index] = true;
        }

        tracing::info!(
            caller_id = %caller.id,
            entries = computed.len(),
            stored = persisted.iter().filter(|p| **p).count(),
            "batch calculated"
        );

        Ok(BulkOutcome {
            results: computed
                .into_iter()
                .zip(persisted)
                .map(|(result, persisted)| BulkResult {
                    result,
                    stage: CkdStage::from_egfr(result).tier(),
                    persisted,
                })
                .collect(),
        })
    }
}

/// Rejects creatinine below the floor, and NaN.
pub fn check_creatinine(creatinine: f64) -> CkdResult<()> {
    // Written as a negated `>=` so NaN is rejected as well.
    if !(creatinine >= MIN_CREATININE_UMOL_PER_L) {
        return Err(CkdError::invalid("creatinine", CREATININE_INVALID));
    }
    Ok(())
}

/// Age check, formula, then plausibility band.
fn compute_checked(
    creatinine: f64,
    date_of_birth: NaiveDate,
    gender: Gender,
    is_black: bool,
    now: DateTime<Utc>,
) -> CkdResult<f64> {
    if let Some(error) = check_age(date_of_birth, now) {
        return Err(CkdError::ValidationFailed(vec![error]));
    }

    let result = estimate_gfr(creatinine, date_of_birth, gender, is_black, now);
    if !(EGFR_MIN..=EGFR_MAX).contains(&result) {
        tracing::warn!(result, "eGFR outside plausibility band");
        return Err(CkdError::invalid("creatinine", RESULT_OUT_OF_RANGE));
    }
    Ok(result)
}

/// Deep link that pre-fills registration with what the guest submitted and their result.
fn registration_link(
    base_url: &str,
    email: &str,
    request: &GuestMeasurementRequest,
    result: f64,
) -> String {
    LinkBuilder::new(base_url)
        .param("From", "email")
        .param_opt("Name", request.name.as_deref())
        .param_opt("Surname", request.surname.as_deref())
        .param_opt("NhsNumber", request.nhs_number)
        .param("Email", email.trim())
        .param("DoB", request.date_of_birth.format("%Y-%m-%d"))
        .param("Gender", request.gender)
        .param("Result", result)
        .build()
}
