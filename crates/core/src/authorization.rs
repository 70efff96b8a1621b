//! Role-hierarchy authorization.
//!
//! Stateless decision functions over the resolved caller and a description of the target. They
//! never read or write storage themselves, except [`ensure_acyclic`], which walks the supervisor
//! chain through the [`UserStore`].
//!
//! Role comparisons all use the total order on [`AccessLevel`].

use crate::error::{CkdError, CkdResult};
use crate::models::{AccessLevel, User, UserId};
use crate::patch::UserPatch;
use crate::store::UserStore;
use serde::Deserialize;
use std::collections::HashSet;
use std::ops::Range;

pub const NOT_ENOUGH_PERMISSIONS: &str = "Not enough permissions";

fn deny(reason: &str) -> CkdError {
    tracing::warn!(reason, "authorization denied");
    CkdError::forbidden(reason)
}

// ============================================================================
// PROFILE EDITS
// ============================================================================

/// A caller may edit their own profile or the profile of anyone with a strictly lower role.
pub fn can_edit(caller: &User, target: &User) -> bool {
    target.email.eq_ignore_ascii_case(&caller.email) || target.access_level < caller.access_level
}

/// Checks that can run before the target is looked up: a patient may only ever name themself.
pub fn authorize_edit_request(caller: &User, target_email: &str) -> CkdResult<()> {
    if caller.access_level == AccessLevel::Patient
        && !target_email.trim().eq_ignore_ascii_case(&caller.email)
    {
        return Err(deny(NOT_ENOUGH_PERMISSIONS));
    }
    Ok(())
}

/// Full edit decision: self-or-strictly-lower, then the privileged-field gate.
///
/// Supplying `nhsNumber`, `professionalId` or `accessLevel` as anyone but a Sysadmin denies the
/// whole edit; the other fields are not applied either.
pub fn authorize_edit(caller: &User, target: &User, patch: &UserPatch) -> CkdResult<()> {
    if !can_edit(caller, target) {
        return Err(deny(NOT_ENOUGH_PERMISSIONS));
    }
    if caller.access_level != AccessLevel::Sysadmin && patch.touches_privileged_fields() {
        return Err(deny(NOT_ENOUGH_PERMISSIONS));
    }
    Ok(())
}

// ============================================================================
// LISTING AND SEARCH
// ============================================================================

/// Listing everyone at `listed` requires a role strictly above it.
pub fn authorize_listing(caller: &User, listed: AccessLevel) -> CkdResult<()> {
    if caller.access_level > listed {
        Ok(())
    } else {
        Err(deny("Insufficient permission"))
    }
}

pub fn authorize_subordinate_listing(caller: &User) -> CkdResult<()> {
    if caller.access_level == AccessLevel::Patient {
        return Err(deny("Logged in user is a patient"));
    }
    Ok(())
}

/// Which users a search may return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchScope {
    /// Only direct subordinates of this user; no paging.
    Supervised(UserId),
    /// Everyone, with paging.
    Global,
}

pub fn search_scope(caller: &User) -> CkdResult<SearchScope> {
    match caller.access_level {
        AccessLevel::Patient => Err(deny(NOT_ENOUGH_PERMISSIONS)),
        AccessLevel::Clinician | AccessLevel::Manager => Ok(SearchScope::Supervised(caller.id)),
        AccessLevel::Sysadmin => Ok(SearchScope::Global),
    }
}

/// Case-insensitive substring match on both name and surname. An empty filter matches all.
pub fn matches_name_filter(user: &User, first_name: &str, surname: &str) -> bool {
    user.name.to_lowercase().contains(&first_name.to_lowercase())
        && user.surname.to_lowercase().contains(&surname.to_lowercase())
}

/// Resolve a half-open `[start, end)` page over `total` results.
///
/// Missing bounds default to the whole result set. Both bounds are clamped to `[0, total]`; a
/// start beyond the end after clamping is rejected.
pub fn page_range(total: usize, start: Option<i64>, end: Option<i64>) -> CkdResult<Range<usize>> {
    let clamp = |v: i64| usize::try_from(v.max(0)).unwrap_or(usize::MAX).min(total);

    let start = start.map(clamp).unwrap_or(0);
    let end = end.map(clamp).unwrap_or(total);

    if start > end {
        return Err(CkdError::invalid("range", "Bad range format"));
    }
    Ok(start..end)
}

// ============================================================================
// SUPERVISOR ASSIGNMENT
// ============================================================================

#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorRef {
    pub professional_id: i64,
}

#[derive(Clone, Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubordinateRef {
    pub professional_id: Option<i64>,
    pub nhs_number: Option<i64>,
}

/// Make `subordinate` report to `supervisor`.
#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignSupervisorRequest {
    pub supervisor: SupervisorRef,
    pub subordinate: SubordinateRef,
}

/// The two accepted assignment shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubordinateKey {
    /// A clinician placed under a manager, identified by professional ID.
    Clinician { professional_id: i64 },
    /// A patient placed under a clinician, identified by NHS number.
    Patient { nhs_number: i64 },
}

impl SubordinateKey {
    /// Structural check, independent of who is asking: exactly one identifier must be given.
    pub fn from_request(subordinate: &SubordinateRef) -> CkdResult<Self> {
        match (subordinate.professional_id, subordinate.nhs_number) {
            (Some(professional_id), None) => Ok(SubordinateKey::Clinician { professional_id }),
            (None, Some(nhs_number)) => Ok(SubordinateKey::Patient { nhs_number }),
            _ => Err(CkdError::Contract(
                "both or neither NHS number and professional ID provided",
            )),
        }
    }

    /// Least role allowed to make this kind of assignment.
    pub fn required_level(self) -> AccessLevel {
        match self {
            SubordinateKey::Clinician { .. } => AccessLevel::Sysadmin,
            SubordinateKey::Patient { .. } => AccessLevel::Manager,
        }
    }
}

pub fn authorize_assignment(caller: &User, key: SubordinateKey) -> CkdResult<()> {
    if caller.access_level < key.required_level() {
        return Err(deny("Insufficient permissions"));
    }
    Ok(())
}

/// Reject an assignment that would close a loop in the supervisor graph.
///
/// Walks up from `supervisor` following `supervisor_id`. Reaching `subordinate` means the
/// subordinate already (transitively) supervises the proposed supervisor. A loop already present
/// in stored data stops the walk rather than spinning.
pub fn ensure_acyclic(users: &dyn UserStore, subordinate: &User, supervisor: &User) -> CkdResult<()> {
    let cycle = || CkdError::invalid("supervisor", "Assignment would create a supervision cycle");

    if subordinate.id == supervisor.id {
        return Err(cycle());
    }

    let mut visited = HashSet::from([supervisor.id]);
    let mut next = supervisor.supervisor_id;
    while let Some(id) = next {
        if id == subordinate.id {
            return Err(cycle());
        }
        if !visited.insert(id) {
            break;
        }
        next = users.get_by_id(id)?.and_then(|u| u.supervisor_id);
    }
    Ok(())
}

// ============================================================================
// MEASUREMENT ACCESS
// ============================================================================

/// How a clinician names the patient whose history they want.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatientLookup {
    Email(String),
    NhsNumber(i64),
}

impl PatientLookup {
    pub fn from_parts(email: Option<String>, nhs_number: Option<i64>) -> CkdResult<Self> {
        match (email, nhs_number) {
            (Some(email), None) => Ok(PatientLookup::Email(email)),
            (None, Some(nhs)) => Ok(PatientLookup::NhsNumber(nhs)),
            _ => Err(CkdError::Contract(
                "must provide either email or NHS number but not both",
            )),
        }
    }

    pub fn find(&self, users: &dyn UserStore) -> CkdResult<Option<User>> {
        Ok(match self {
            PatientLookup::Email(email) => users.get_by_email(email)?,
            PatientLookup::NhsNumber(nhs) => users.get_by_nhs_number(*nhs)?,
        })
    }
}

/// Measurement history of other users and batch calculation are clinician-only.
pub fn require_clinician(caller: &User) -> CkdResult<()> {
    if caller.access_level != AccessLevel::Clinician {
        return Err(deny("Logged in user is not a clinician"));
    }
    Ok(())
}

/// The patient must be directly supervised by the caller.
pub fn authorize_supervision(caller: &User, patient: &User) -> CkdResult<()> {
    if !patient.is_supervised_by(caller) {
        return Err(deny("Patient is assigned to a different clinician"));
    }
    Ok(())
}
