//! Account operations.
//!
//! Registration, login, profile edits, directory queries and supervisor assignment. Every
//! operation takes the already-resolved caller; permission decisions are delegated to
//! [`crate::authorization`] and field rules to [`crate::validation`].

use crate::authorization::{
    authorize_assignment, authorize_edit, authorize_edit_request, authorize_listing,
    authorize_subordinate_listing, authorize_supervision, ensure_acyclic, matches_name_filter,
    page_range, require_clinician, search_scope, AssignSupervisorRequest, PatientLookup,
    SearchScope, SubordinateKey,
};
use crate::error::{CkdError, CkdResult, StoreError};
use crate::models::{flexible_date, AccessLevel, Gender, Measurement, User, UserId};
use crate::password::PasswordHasher;
use crate::patch::UserPatch;
use crate::store::{MeasurementStore, UserStore};
use crate::token::TokenService;
use crate::validation::{validate_user, PasswordRule};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BAD_CREDENTIALS: &str = "Invalid login credentials";

// ============================================================================
// REQUEST AND RESPONSE TYPES
// ============================================================================

/// Self-registration. Registered users always start as unsupervised patients.
#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub nhs_number: Option<i64>,
    pub email: String,
    pub password: String,
    pub name: String,
    pub surname: String,
    pub gender: Gender,
    pub is_black: bool,
    #[serde(with = "flexible_date")]
    #[schema(value_type = String, format = Date)]
    pub date_of_birth: NaiveDate,
}

/// Login by exactly one of email or NHS number.
#[derive(Clone, Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: Option<String>,
    pub nhs_number: Option<i64>,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// A freshly issued session.
#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub user: User,
    /// Whether the token carries the extended lifetime.
    pub extended: bool,
}

#[derive(Clone, Debug, Default, Deserialize, utoipa::ToSchema, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    pub first_name: Option<String>,
    pub surname: Option<String>,
    /// Inclusive start of the page. Sysadmin only.
    pub offset_start: Option<i64>,
    /// Exclusive end of the page. Sysadmin only.
    pub offset_end: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    /// Matches before paging.
    pub total_users_found: usize,
    pub users: Vec<User>,
}

/// A user created by an administrative import rather than by self-registration.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub nhs_number: Option<i64>,
    #[serde(default)]
    pub professional_id: Option<i64>,
    pub access_level: AccessLevel,
    pub name: String,
    pub surname: String,
    pub gender: Gender,
    pub is_black: bool,
    #[serde(with = "flexible_date")]
    pub date_of_birth: NaiveDate,
    /// Professional ID of a previously imported supervisor.
    #[serde(default)]
    pub supervisor_professional_id: Option<i64>,
}

/// Import stopped at `index`; users before it were created.
#[derive(Debug, thiserror::Error)]
#[error("user {index} could not be imported: {source}")]
pub struct ImportFailure {
    pub index: usize,
    pub source: CkdError,
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserStore>,
    measurements: Arc<dyn MeasurementStore>,
    tokens: Arc<dyn TokenService>,
    hasher: Arc<dyn PasswordHasher>,
    clock: fn() -> DateTime<Utc>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserStore>,
        measurements: Arc<dyn MeasurementStore>,
        tokens: Arc<dyn TokenService>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            users,
            measurements,
            tokens,
            hasher,
            clock: Utc::now,
        }
    }

    /// Replace the time source. Used to pin "now" in tests.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a new patient.
    ///
    /// # Errors
    ///
    /// - `ValidationFailed` listing every field rule that failed
    /// - `Conflict` if the email or NHS number is already registered
    pub fn register(&self, request: RegisterRequest) -> CkdResult<User> {
        let mut candidate = User {
            id: UserId(0),
            supervisor_id: None,
            email: request.email.trim().to_lowercase(),
            professional_id: None,
            nhs_number: request.nhs_number,
            password_hash: String::new(),
            access_level: AccessLevel::Patient,
            name: request.name,
            surname: request.surname,
            gender: request.gender,
            is_black: request.is_black,
            date_of_birth: request.date_of_birth,
        };

        let errors = validate_user(
            &candidate,
            PasswordRule::Check(Some(&request.password)),
            (self.clock)(),
        );
        if !errors.is_empty() {
            return Err(CkdError::ValidationFailed(errors));
        }

        self.ensure_unique(&candidate, None)?;
        candidate.password_hash = self.hasher.hash(&request.password);

        let user = self.users.create(candidate)?;
        tracing::info!(user_id = %user.id, "patient registered");
        Ok(user)
    }

    /// Check credentials and issue a session token.
    ///
    /// An unknown user and a wrong password produce the same error.
    pub fn login(&self, request: &LoginRequest) -> CkdResult<Session> {
        let found = match (&request.email, request.nhs_number) {
            (Some(email), None) => self.users.get_by_email(email.trim())?,
            (None, Some(nhs_number)) => self.users.get_by_nhs_number(nhs_number)?,
            _ => {
                return Err(CkdError::Contract(
                    "must provide either email or NHS number but not both",
                ))
            }
        };

        let Some(user) =
            found.filter(|u| self.hasher.matches(&request.password, &u.password_hash))
        else {
            tracing::debug!("login rejected");
            return Err(CkdError::invalid("credentials", BAD_CREDENTIALS));
        };

        let token = self
            .tokens
            .issue(user.id, request.remember_me)
            .map_err(|e| CkdError::UpstreamFailure(e.to_string()))?;

        tracing::info!(user_id = %user.id, extended = request.remember_me, "user logged in");
        Ok(Session {
            token,
            user,
            extended: request.remember_me,
        })
    }

    pub fn current_user(&self, caller: &User) -> User {
        caller.clone()
    }

    pub fn own_measurements(&self, caller: &User) -> CkdResult<Vec<Measurement>> {
        Ok(self.measurements.get_by_user(caller)?)
    }

    /// Apply `patch` to the user registered under `target_email`.
    ///
    /// Checks run in this order, and the first failure wins: a patient naming someone else, the
    /// target lookup, the self-or-strictly-lower rule, the privileged-field gate, field
    /// validation of the merged profile, then uniqueness of the natural identifiers.
    pub fn edit_user(&self, caller: &User, target_email: &str, patch: &UserPatch) -> CkdResult<User> {
        authorize_edit_request(caller, target_email)?;

        let target = self
            .users
            .get_by_email(target_email.trim())?
            .ok_or_else(|| CkdError::not_found("Target user not found"))?;

        authorize_edit(caller, &target, patch)?;

        let (updated, changed) = patch.apply(&target);
        let errors = validate_user(&updated, PasswordRule::Skip, (self.clock)());
        if !errors.is_empty() {
            return Err(CkdError::ValidationFailed(errors));
        }
        self.ensure_unique(&updated, Some(target.id))?;

        self.users.persist_changes(&updated)?;
        tracing::info!(
            caller_id = %caller.id,
            target_id = %updated.id,
            fields = ?changed,
            "user edited"
        );
        Ok(updated)
    }

    /// Everyone at `listed`. The caller must rank strictly above it.
    pub fn list_by_access(&self, caller: &User, listed: AccessLevel) -> CkdResult<Vec<User>> {
        authorize_listing(caller, listed)?;
        Ok(self.users.get_with_filter(&|u| u.access_level == listed)?)
    }

    /// Users directly supervised by the caller.
    pub fn subordinates(&self, caller: &User) -> CkdResult<Vec<User>> {
        authorize_subordinate_listing(caller)?;
        Ok(self.users.get_by_supervisor(caller.id)?)
    }

    /// Name search. Clinicians and managers search their direct subordinates; Sysadmins search
    /// everyone and may page the results.
    pub fn search(&self, caller: &User, query: &SearchQuery) -> CkdResult<SearchPage> {
        let first_name = query.first_name.as_deref().unwrap_or_default();
        let surname = query.surname.as_deref().unwrap_or_default();

        match search_scope(caller)? {
            SearchScope::Supervised(supervisor_id) => {
                let users: Vec<User> = self
                    .users
                    .get_by_supervisor(supervisor_id)?
                    .into_iter()
                    .filter(|u| matches_name_filter(u, first_name, surname))
                    .collect();
                Ok(SearchPage {
                    total_users_found: users.len(),
                    users,
                })
            }
            SearchScope::Global => {
                let mut found = self
                    .users
                    .get_with_filter(&|u| matches_name_filter(u, first_name, surname))?;
                let total = found.len();
                let range = page_range(total, query.offset_start, query.offset_end)?;
                Ok(SearchPage {
                    total_users_found: total,
                    users: found.drain(range).collect(),
                })
            }
        }
    }

    /// Place a clinician under a manager, or a patient under a clinician.
    ///
    /// Returns the updated subordinate.
    ///
    /// # Errors
    ///
    /// - `Contract` when the subordinate is named by both or neither identifier
    /// - `Forbidden` when the caller's role is too low for the kind of assignment
    /// - `NotFound` for an unknown supervisor or subordinate
    /// - `ValidationFailed` when the assignment would create a supervision cycle
    pub fn assign_supervisor(&self, caller: &User, request: &AssignSupervisorRequest) -> CkdResult<User> {
        let key = SubordinateKey::from_request(&request.subordinate)?;
        authorize_assignment(caller, key)?;

        let supervisor = self
            .users
            .get_by_professional_id(request.supervisor.professional_id)?
            .ok_or_else(|| CkdError::not_found("Supervisor not found"))?;

        let subordinate = match key {
            SubordinateKey::Clinician { professional_id } => {
                self.users.get_by_professional_id(professional_id)?
            }
            SubordinateKey::Patient { nhs_number } => self.users.get_by_nhs_number(nhs_number)?,
        };
        let mut subordinate = subordinate.ok_or_else(|| CkdError::not_found("Subordinate not found"))?;

        ensure_acyclic(self.users.as_ref(), &subordinate, &supervisor)?;

        subordinate.supervisor_id = Some(supervisor.id);
        self.users.persist_changes(&subordinate)?;

        tracing::info!(
            caller_id = %caller.id,
            supervisor_id = %supervisor.id,
            subordinate_id = %subordinate.id,
            "supervisor assigned"
        );
        Ok(subordinate)
    }

    /// Measurement history of a patient the calling clinician supervises.
    pub fn patients_measurements(
        &self,
        caller: &User,
        email: Option<String>,
        nhs_number: Option<i64>,
    ) -> CkdResult<Vec<Measurement>> {
        require_clinician(caller)?;

        let patient = PatientLookup::from_parts(email, nhs_number)?
            .find(self.users.as_ref())?
            .ok_or_else(|| CkdError::not_found("Target user not found"))?;

        authorize_supervision(caller, &patient)?;
        Ok(self.measurements.get_by_user(&patient)?)
    }

    /// Create users in order, stopping at the first one that fails.
    ///
    /// # Errors
    ///
    /// Returns the index of the failing user and why it failed. Users before it remain created.
    pub fn import_users(&self, users: Vec<NewUser>) -> Result<Vec<User>, ImportFailure> {
        let mut created = Vec::with_capacity(users.len());
        for (index, new_user) in users.into_iter().enumerate() {
            let user = self
                .import_one(new_user)
                .map_err(|source| ImportFailure { index, source })?;
            created.push(user);
        }
        tracing::info!(count = created.len(), "users imported");
        Ok(created)
    }

    fn import_one(&self, new_user: NewUser) -> CkdResult<User> {
        let supervisor_id = match new_user.supervisor_professional_id {
            Some(professional_id) => Some(
                self.users
                    .get_by_professional_id(professional_id)?
                    .ok_or_else(|| CkdError::not_found("Supervisor not found"))?
                    .id,
            ),
            None => None,
        };

        let mut candidate = User {
            id: UserId(0),
            supervisor_id,
            email: new_user.email.trim().to_lowercase(),
            professional_id: new_user.professional_id,
            nhs_number: new_user.nhs_number,
            password_hash: String::new(),
            access_level: new_user.access_level,
            name: new_user.name,
            surname: new_user.surname,
            gender: new_user.gender,
            is_black: new_user.is_black,
            date_of_birth: new_user.date_of_birth,
        };

        let errors = validate_user(
            &candidate,
            PasswordRule::Check(Some(&new_user.password)),
            (self.clock)(),
        );
        if !errors.is_empty() {
            return Err(CkdError::ValidationFailed(errors));
        }

        self.ensure_unique(&candidate, None)?;
        candidate.password_hash = self.hasher.hash(&new_user.password);
        Ok(self.users.create(candidate)?)
    }

    /// Pre-check the natural identifiers against everyone except `except`. The store enforces the
    /// same constraints again on write.
    fn ensure_unique(&self, user: &User, except: Option<UserId>) -> CkdResult<()> {
        let taken = |found: Option<User>| found.is_some_and(|other| Some(other.id) != except);

        if taken(self.users.get_by_email(&user.email)?) {
            return Err(StoreError::Conflict { field: "email" }.into());
        }
        if let Some(nhs_number) = user.nhs_number {
            if taken(self.users.get_by_nhs_number(nhs_number)?) {
                return Err(StoreError::Conflict { field: "NHS number" }.into());
            }
        }
        if let Some(professional_id) = user.professional_id {
            if taken(self.users.get_by_professional_id(professional_id)?) {
                return Err(StoreError::Conflict {
                    field: "professional ID",
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorization::{SubordinateRef, SupervisorRef};
    use crate::clinical::tests::{born_years_ago, fixed_now};
    use crate::models::NewMeasurement;
    use crate::password::Sha256PasswordHasher;
    use crate::store::tests::user;
    use crate::store::InMemoryStore;
    use crate::token::{SignedTokenService, TokenVerification};

    struct Fixture {
        store: Arc<InMemoryStore>,
        tokens: Arc<SignedTokenService>,
        accounts: AccountService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let tokens = Arc::new(SignedTokenService::ephemeral());
        let accounts = AccountService::new(
            store.clone(),
            store.clone(),
            tokens.clone(),
            Arc::new(Sha256PasswordHasher),
        )
        .with_clock(fixed_now);
        Fixture {
            store,
            tokens,
            accounts,
        }
    }

    fn seed(f: &Fixture, u: User) -> User {
        UserStore::create(f.store.as_ref(), u).unwrap()
    }

    fn registration(email: &str, nhs_number: i64) -> RegisterRequest {
        RegisterRequest {
            nhs_number: Some(nhs_number),
            email: email.into(),
            password: "Secret123".into(),
            name: "Ada".into(),
            surname: "King".into(),
            gender: Gender::Female,
            is_black: false,
            date_of_birth: born_years_ago(40),
        }
    }

    fn field_names(err: CkdError) -> Vec<String> {
        match err {
            CkdError::ValidationFailed(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------------
    // registration and login
    // ------------------------------------------------------------------------

    #[test]
    fn register_creates_unsupervised_patient_with_hashed_password() {
        let f = fixture();
        let u = f.accounts.register(registration(" Ada@Example.com ", 1_000_000_001)).unwrap();
        assert_eq!(u.access_level, AccessLevel::Patient);
        assert_eq!(u.email, "ada@example.com");
        assert!(u.supervisor_id.is_none());
        assert_eq!(u.password_hash, Sha256PasswordHasher.hash("Secret123"));
    }

    #[test]
    fn register_reports_every_failing_field() {
        let f = fixture();
        let mut request = registration("not-an-email", 12);
        request.password = "short".into();
        request.date_of_birth = born_years_ago(17);
        let fields = field_names(f.accounts.register(request).unwrap_err());
        assert_eq!(fields, vec!["dob", "nhsNumber", "email", "password"]);
    }

    #[test]
    fn register_rejects_duplicates() {
        let f = fixture();
        f.accounts.register(registration("a@x.com", 1_000_000_001)).unwrap();
        assert!(matches!(
            f.accounts.register(registration("A@X.com", 1_000_000_002)),
            Err(CkdError::Conflict(ref m)) if m.contains("email")
        ));
        assert!(matches!(
            f.accounts.register(registration("b@x.com", 1_000_000_001)),
            Err(CkdError::Conflict(ref m)) if m.contains("NHS number")
        ));
    }

    #[test]
    fn login_by_email_or_nhs_number_issues_token_for_user() {
        let f = fixture();
        let registered = f.accounts.register(registration("a@x.com", 1_000_000_001)).unwrap();

        let by_email = f
            .accounts
            .login(&LoginRequest {
                email: Some("a@x.com".into()),
                nhs_number: None,
                password: "Secret123".into(),
                remember_me: true,
            })
            .unwrap();
        assert!(by_email.extended);
        match f.tokens.verify(&by_email.token) {
            TokenVerification::Verified(claims) => assert_eq!(claims.subject(), registered.id),
            TokenVerification::Invalid => panic!("issued token must verify"),
        }

        let by_nhs = f
            .accounts
            .login(&LoginRequest {
                email: None,
                nhs_number: Some(1_000_000_001),
                password: "Secret123".into(),
                remember_me: false,
            })
            .unwrap();
        assert_eq!(by_nhs.user.id, registered.id);
    }

    #[test]
    fn unknown_user_and_wrong_password_look_the_same() {
        let f = fixture();
        f.accounts.register(registration("a@x.com", 1_000_000_001)).unwrap();

        let attempt = |email: &str, password: &str| {
            f.accounts
                .login(&LoginRequest {
                    email: Some(email.into()),
                    nhs_number: None,
                    password: password.into(),
                    remember_me: false,
                })
                .unwrap_err()
                .to_string()
        };
        assert_eq!(attempt("a@x.com", "Wrong1234"), attempt("zz@x.com", "Secret123"));
    }

    #[test]
    fn login_needs_exactly_one_identifier() {
        let f = fixture();
        let request = LoginRequest {
            email: Some("a@x.com".into()),
            nhs_number: Some(1_000_000_001),
            password: "Secret123".into(),
            remember_me: false,
        };
        assert!(matches!(f.accounts.login(&request), Err(CkdError::Contract(_))));
    }

    // ------------------------------------------------------------------------
    // edits
    // ------------------------------------------------------------------------

    #[test]
    fn patient_naming_someone_else_is_forbidden_even_if_absent() {
        let f = fixture();
        let p = seed(&f, user(AccessLevel::Patient, "p@x.com", 1_000_000_001));
        let patch = UserPatch {
            name: Some("Eve".into()),
            ..UserPatch::default()
        };
        assert!(matches!(
            f.accounts.edit_user(&p, "ghost@x.com", &patch),
            Err(CkdError::Forbidden(_))
        ));
    }

    #[test]
    fn unknown_target_is_not_found() {
        let f = fixture();
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        assert!(matches!(
            f.accounts.edit_user(&c, "ghost@x.com", &UserPatch::default()),
            Err(CkdError::NotFound(_))
        ));
    }

    #[test]
    fn manager_cannot_change_access_level_of_anyone() {
        let f = fixture();
        let m = seed(&f, user(AccessLevel::Manager, "m@x.com", 3_000_000_001));
        let p = seed(&f, user(AccessLevel::Patient, "p@x.com", 1_000_000_001));
        let patch = UserPatch {
            access_level: Some(AccessLevel::Clinician),
            name: Some("Grace".into()),
            ..UserPatch::default()
        };
        assert!(matches!(
            f.accounts.edit_user(&m, &p.email, &patch),
            Err(CkdError::Forbidden(_))
        ));
        // Nothing from the denied patch was applied.
        assert_eq!(f.store.get_by_id(p.id).unwrap().unwrap().name, "Test");
    }

    #[test]
    fn clinician_edits_patient_name() {
        let f = fixture();
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        let p = seed(&f, user(AccessLevel::Patient, "p@x.com", 1_000_000_001));
        let patch = UserPatch {
            surname: Some("Hopper".into()),
            ..UserPatch::default()
        };
        let updated = f.accounts.edit_user(&c, "P@x.com", &patch).unwrap();
        assert_eq!(updated.surname, "Hopper");
        assert_eq!(f.store.get_by_id(p.id).unwrap().unwrap().surname, "Hopper");
    }

    #[test]
    fn sysadmin_promotes_patient_with_professional_id() {
        let f = fixture();
        let s = seed(&f, user(AccessLevel::Sysadmin, "s@x.com", 4_000_000_001));
        seed(&f, user(AccessLevel::Patient, "p@x.com", 1_000_000_001));
        let patch = UserPatch {
            access_level: Some(AccessLevel::Clinician),
            professional_id: Some(2_000_000_009),
            ..UserPatch::default()
        };
        let updated = f.accounts.edit_user(&s, "p@x.com", &patch).unwrap();
        assert_eq!(updated.access_level, AccessLevel::Clinician);
        assert_eq!(updated.natural_id(), Some(2_000_000_009));
    }

    #[test]
    fn edit_validates_merged_profile_and_uniqueness() {
        let f = fixture();
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        seed(&f, user(AccessLevel::Patient, "p@x.com", 1_000_000_001));
        seed(&f, user(AccessLevel::Patient, "q@x.com", 1_000_000_002));

        let bad_name = UserPatch {
            name: Some("R2D2".into()),
            ..UserPatch::default()
        };
        assert_eq!(
            field_names(f.accounts.edit_user(&c, "p@x.com", &bad_name).unwrap_err()),
            vec!["name"]
        );

        let taken_email = UserPatch {
            email: Some("Q@x.com".into()),
            ..UserPatch::default()
        };
        assert!(matches!(
            f.accounts.edit_user(&c, "p@x.com", &taken_email),
            Err(CkdError::Conflict(_))
        ));

        // Re-supplying one's own email is not a conflict.
        let same_email = UserPatch {
            email: Some("p@x.com".into()),
            ..UserPatch::default()
        };
        assert!(f.accounts.edit_user(&c, "p@x.com", &same_email).is_ok());
    }

    // ------------------------------------------------------------------------
    // listing and search
    // ------------------------------------------------------------------------

    #[test]
    fn listing_by_role() {
        let f = fixture();
        let s = seed(&f, user(AccessLevel::Sysadmin, "s@x.com", 4_000_000_001));
        let m = seed(&f, user(AccessLevel::Manager, "m@x.com", 3_000_000_001));
        seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));

        let managers = f.accounts.list_by_access(&s, AccessLevel::Manager).unwrap();
        assert_eq!(managers.len(), 1);
        assert_eq!(f.accounts.list_by_access(&m, AccessLevel::Clinician).unwrap().len(), 1);
        assert!(matches!(
            f.accounts.list_by_access(&m, AccessLevel::Manager),
            Err(CkdError::Forbidden(_))
        ));
    }

    #[test]
    fn subordinates_are_direct_reports_only() {
        let f = fixture();
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        let mut p = user(AccessLevel::Patient, "p@x.com", 1_000_000_001);
        p.supervisor_id = Some(c.id);
        seed(&f, p);
        seed(&f, user(AccessLevel::Patient, "q@x.com", 1_000_000_002));

        assert_eq!(f.accounts.subordinates(&c).unwrap().len(), 1);
        let patient = f.store.get_by_email("q@x.com").unwrap().unwrap();
        assert!(f.accounts.subordinates(&patient).is_err());
    }

    #[test]
    fn sysadmin_search_pages_are_clamped() {
        let f = fixture();
        let s = seed(&f, user(AccessLevel::Sysadmin, "s@x.com", 4_000_000_001));
        for i in 0..29 {
            seed(
                &f,
                user(AccessLevel::Patient, &format!("p{i}@x.com"), 1_000_000_100 + i),
            );
        }

        let page = f
            .accounts
            .search(
                &s,
                &SearchQuery {
                    offset_start: Some(25),
                    offset_end: Some(40),
                    ..SearchQuery::default()
                },
            )
            .unwrap();
        assert_eq!(page.total_users_found, 30);
        assert_eq!(page.users.len(), 5);
        assert_eq!(page.users[0].email, "p24@x.com");

        let inverted = SearchQuery {
            offset_start: Some(20),
            offset_end: Some(10),
            ..SearchQuery::default()
        };
        assert!(matches!(
            f.accounts.search(&s, &inverted),
            Err(CkdError::ValidationFailed(_))
        ));
    }

    #[test]
    fn clinician_search_sees_only_own_patients_and_ignores_paging() {
        let f = fixture();
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        let mut mine = user(AccessLevel::Patient, "p@x.com", 1_000_000_001);
        mine.supervisor_id = Some(c.id);
        mine.name = "Grace".into();
        seed(&f, mine);
        let mut other = user(AccessLevel::Patient, "q@x.com", 1_000_000_002);
        other.name = "Grace".into();
        seed(&f, other);

        let page = f
            .accounts
            .search(
                &c,
                &SearchQuery {
                    first_name: Some("grA".into()),
                    offset_start: Some(5),
                    offset_end: Some(1),
                    ..SearchQuery::default()
                },
            )
            .unwrap();
        assert_eq!(page.total_users_found, 1);
        assert_eq!(page.users[0].email, "p@x.com");

        let p = f.store.get_by_email("p@x.com").unwrap().unwrap();
        assert!(f.accounts.search(&p, &SearchQuery::default()).is_err());
    }

    // ------------------------------------------------------------------------
    // supervisor assignment
    // ------------------------------------------------------------------------

    fn assign_patient(supervisor_pid: i64, nhs_number: i64) -> AssignSupervisorRequest {
        AssignSupervisorRequest {
            supervisor: SupervisorRef {
                professional_id: supervisor_pid,
            },
            subordinate: SubordinateRef {
                professional_id: None,
                nhs_number: Some(nhs_number),
            },
        }
    }

    #[test]
    fn manager_assigns_patient_to_clinician() {
        let f = fixture();
        let m = seed(&f, user(AccessLevel::Manager, "m@x.com", 3_000_000_001));
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        seed(&f, user(AccessLevel::Patient, "p@x.com", 1_000_000_001));

        let updated = f
            .accounts
            .assign_supervisor(&m, &assign_patient(2_000_000_001, 1_000_000_001))
            .unwrap();
        assert_eq!(updated.supervisor_id, Some(c.id));
        assert_eq!(
            f.store.get_by_id(updated.id).unwrap().unwrap().supervisor_id,
            Some(c.id)
        );
    }

    #[test]
    fn assignment_failures() {
        let f = fixture();
        let m = seed(&f, user(AccessLevel::Manager, "m@x.com", 3_000_000_001));
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        seed(&f, user(AccessLevel::Patient, "p@x.com", 1_000_000_001));

        // Structural error wins over the role check.
        let neither = AssignSupervisorRequest {
            supervisor: SupervisorRef {
                professional_id: 2_000_000_001,
            },
            subordinate: SubordinateRef::default(),
        };
        assert!(matches!(
            f.accounts.assign_supervisor(&c, &neither),
            Err(CkdError::Contract(_))
        ));

        assert!(matches!(
            f.accounts.assign_supervisor(&c, &assign_patient(2_000_000_001, 1_000_000_001)),
            Err(CkdError::Forbidden(_))
        ));
        assert!(matches!(
            f.accounts.assign_supervisor(&m, &assign_patient(2_999_999_999, 1_000_000_001)),
            Err(CkdError::NotFound(_))
        ));
        assert!(matches!(
            f.accounts.assign_supervisor(&m, &assign_patient(2_000_000_001, 1_999_999_999)),
            Err(CkdError::NotFound(_))
        ));
    }

    #[test]
    fn assignment_cycle_is_rejected() {
        let f = fixture();
        let s = seed(&f, user(AccessLevel::Sysadmin, "s@x.com", 4_000_000_001));
        let m = seed(&f, user(AccessLevel::Manager, "m@x.com", 3_000_000_001));
        let mut c = user(AccessLevel::Clinician, "c@x.com", 2_000_000_001);
        c.supervisor_id = Some(m.id);
        seed(&f, c);

        // The manager under their own clinician.
        let request = AssignSupervisorRequest {
            supervisor: SupervisorRef {
                professional_id: 2_000_000_001,
            },
            subordinate: SubordinateRef {
                professional_id: Some(3_000_000_001),
                nhs_number: None,
            },
        };
        assert_eq!(
            field_names(f.accounts.assign_supervisor(&s, &request).unwrap_err()),
            vec!["supervisor"]
        );
    }

    // ------------------------------------------------------------------------
    // measurement history
    // ------------------------------------------------------------------------

    #[test]
    fn clinician_reads_supervised_patient_history() {
        let f = fixture();
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        let mut p = user(AccessLevel::Patient, "p@x.com", 1_000_000_001);
        p.supervisor_id = Some(c.id);
        let p = seed(&f, p);
        MeasurementStore::create(
            f.store.as_ref(),
            NewMeasurement {
                user_id: p.id,
                timestamp: fixed_now(),
                result: 72.5,
            },
        )
        .unwrap();

        let history = f
            .accounts
            .patients_measurements(&c, None, Some(1_000_000_001))
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(f.accounts.own_measurements(&p).unwrap(), history);
    }

    #[test]
    fn patient_history_access_rules() {
        let f = fixture();
        let c = seed(&f, user(AccessLevel::Clinician, "c@x.com", 2_000_000_001));
        let m = seed(&f, user(AccessLevel::Manager, "m@x.com", 3_000_000_001));
        seed(&f, user(AccessLevel::Patient, "p@x.com", 1_000_000_001));

        // Role is checked before the lookup shape.
        assert!(matches!(
            f.accounts.patients_measurements(&m, None, None),
            Err(CkdError::Forbidden(_))
        ));
        assert!(matches!(
            f.accounts.patients_measurements(&c, None, None),
            Err(CkdError::Contract(_))
        ));
        assert!(matches!(
            f.accounts.patients_measurements(&c, Some("ghost@x.com".into()), None),
            Err(CkdError::NotFound(_))
        ));
        assert!(matches!(
            f.accounts.patients_measurements(&c, Some("p@x.com".into()), None),
            Err(CkdError::Forbidden(_))
        ));
    }

    // ------------------------------------------------------------------------
    // import
    // ------------------------------------------------------------------------

    fn new_user(access_level: AccessLevel, email: &str, natural_id: i64) -> NewUser {
        let (nhs_number, professional_id) = match access_level {
            AccessLevel::Patient => (Some(natural_id), None),
            _ => (None, Some(natural_id)),
        };
        NewUser {
            email: email.into(),
            password: "Secret123".into(),
            nhs_number,
            professional_id,
            access_level,
            name: "Test".into(),
            surname: "User".into(),
            gender: Gender::Male,
            is_black: false,
            date_of_birth: born_years_ago(40),
            supervisor_professional_id: None,
        }
    }

    #[test]
    fn import_links_supervisors_and_stops_at_first_failure() {
        let f = fixture();
        let mut patient = new_user(AccessLevel::Patient, "p@x.com", 1_000_000_001);
        patient.supervisor_professional_id = Some(2_000_000_001);
        let mut broken = new_user(AccessLevel::Patient, "q@x.com", 1_000_000_002);
        broken.password = "weak".into();

        let failure = f
            .accounts
            .import_users(vec![
                new_user(AccessLevel::Clinician, "c@x.com", 2_000_000_001),
                patient,
                broken,
                new_user(AccessLevel::Patient, "r@x.com", 1_000_000_003),
            ])
            .unwrap_err();
        assert_eq!(failure.index, 2);
        assert!(matches!(failure.source, CkdError::ValidationFailed(_)));

        let c = f.store.get_by_email("c@x.com").unwrap().unwrap();
        let p = f.store.get_by_email("p@x.com").unwrap().unwrap();
        assert!(p.is_supervised_by(&c));
        assert!(f.store.get_by_email("r@x.com").unwrap().is_none());
    }
}
