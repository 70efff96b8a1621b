//! Field-level validation of user profiles.
//!
//! Every rule runs independently and contributes at most one [`FieldError`]; an empty list means
//! the input is valid. Nothing here fails with an error of its own.

use crate::clinical::age_in_years;
use crate::constants::{MAX_AGE_YEARS, MAX_PASSWORD_LEN, MIN_AGE_YEARS, MIN_PASSWORD_LEN};
use crate::error::FieldError;
use crate::models::{AccessLevel, User};
use chrono::{DateTime, NaiveDate, Utc};
use ckd_types::{EmailAddress, NaturalId};

pub const AGE_MESSAGE: &str = "You need to be between 18 and 110 years old to use this calculator";
pub const NHS_NUMBER_MESSAGE: &str = "Invalid NHS number format";
pub const PROFESSIONAL_ID_MESSAGE: &str = "Invalid professional ID format";
pub const EMAIL_MESSAGE: &str = "Invalid e-mail address";
pub const PASSWORD_MESSAGE: &str = "Invalid password, needs at least one upper-case letter, \
     one lower-case letter, one number and needs to be between 8 and 15 characters";
pub const NAME_MESSAGE: &str = "Invalid name format";
pub const SURNAME_MESSAGE: &str = "Invalid surname format";

/// Whether the password rules apply to this validation run.
#[derive(Clone, Copy, Debug)]
pub enum PasswordRule<'a> {
    /// Profile edits never carry a password.
    Skip,
    /// Registration and import check the plaintext before it is hashed.
    Check(Option<&'a str>),
}

/// Validate a complete user profile.
pub fn validate_user(user: &User, password: PasswordRule<'_>, now: DateTime<Utc>) -> Vec<FieldError> {
    let mut errors = Vec::new();

    push_if(&mut errors, check_age(user.date_of_birth, now));

    match user.access_level {
        AccessLevel::Patient => {
            if !is_natural_id(user.nhs_number) {
                errors.push(FieldError::new("nhsNumber", NHS_NUMBER_MESSAGE));
            }
        }
        _ => {
            if !is_natural_id(user.professional_id) {
                errors.push(FieldError::new("professionalId", PROFESSIONAL_ID_MESSAGE));
            }
        }
    }

    if EmailAddress::parse(&user.email).is_err() {
        errors.push(FieldError::new("email", EMAIL_MESSAGE));
    }

    if let PasswordRule::Check(plaintext) = password {
        if !plaintext.is_some_and(is_acceptable_password) {
            errors.push(FieldError::new("password", PASSWORD_MESSAGE));
        }
    }

    if !is_letters_only(&user.name) {
        errors.push(FieldError::new("name", NAME_MESSAGE));
    }
    if !is_letters_only(&user.surname) {
        errors.push(FieldError::new("surname", SURNAME_MESSAGE));
    }

    // Gender is a closed enum by the time a `User` exists; malformed values are rejected when
    // the request is deserialised.

    errors
}

/// The partial rule set applied to an unregistered guest. Optional fields are only checked when
/// supplied.
pub fn validate_guest(
    date_of_birth: NaiveDate,
    nhs_number: Option<i64>,
    email: Option<&str>,
    name: Option<&str>,
    surname: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<FieldError> {
    let mut errors = Vec::new();

    push_if(&mut errors, check_age(date_of_birth, now));

    if nhs_number.is_some() && !is_natural_id(nhs_number) {
        errors.push(FieldError::new("nhsNumber", NHS_NUMBER_MESSAGE));
    }
    if email.is_some_and(|e| EmailAddress::parse(e).is_err()) {
        errors.push(FieldError::new("email", EMAIL_MESSAGE));
    }
    if name.is_some_and(|n| !is_letters_only(n)) {
        errors.push(FieldError::new("name", NAME_MESSAGE));
    }
    if surname.is_some_and(|s| !is_letters_only(s)) {
        errors.push(FieldError::new("surname", SURNAME_MESSAGE));
    }

    errors
}

/// Age eligibility on its own, used wherever the calculator is about to run.
pub fn check_age(date_of_birth: NaiveDate, now: DateTime<Utc>) -> Option<FieldError> {
    let age = age_in_years(date_of_birth, now);
    if (MIN_AGE_YEARS..=MAX_AGE_YEARS).contains(&age) {
        None
    } else {
        Some(FieldError::new("dob", AGE_MESSAGE))
    }
}

fn push_if(errors: &mut Vec<FieldError>, error: Option<FieldError>) {
    if let Some(e) = error {
        errors.push(e);
    }
}

fn is_natural_id(value: Option<i64>) -> bool {
    value.is_some_and(|v| NaturalId::new(v).is_ok())
}

/// 8-15 characters after trimming, with at least one lower-case letter, one upper-case letter
/// and one digit.
pub fn is_acceptable_password(password: &str) -> bool {
    let password = password.trim();
    let len = password.chars().count();

    (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len)
        && password.chars().any(|c| c.is_lowercase())
        && password.chars().any(|c| c.is_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

fn is_letters_only(value: &str) -> bool {
    !value.trim().is_empty() && value.chars().all(char::is_alphabetic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinical::tests::{born_years_ago, fixed_now};
    use crate::models::{Gender, UserId};

    fn patient() -> User {
        User {
            id: UserId(1),
            supervisor_id: None,
            email: "patient@example.com".into(),
            professional_id: None,
            nhs_number: Some(4_857_773_456),
            password_hash: String::new(),
            access_level: AccessLevel::Patient,
            name: "Ann".into(),
            surname: "Lee".into(),
            gender: Gender::Female,
            is_black: false,
            date_of_birth: born_years_ago(40),
        }
    }

    fn fields(errors: &[FieldError]) -> Vec<&str> {
        errors.iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn valid_patient_has_no_errors() {
        let errors = validate_user(&patient(), PasswordRule::Check(Some("Secret123")), fixed_now());
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn every_age_in_range_is_accepted() {
        let mut user = patient();
        for years in MIN_AGE_YEARS..=MAX_AGE_YEARS {
            user.date_of_birth = born_years_ago(years);
            let errors = validate_user(&user, PasswordRule::Skip, fixed_now());
            assert!(errors.is_empty(), "age {years}: {errors:?}");
        }
    }

    #[test]
    fn ages_just_outside_range_report_exactly_one_age_error() {
        let mut user = patient();
        for years in [17, 111] {
            user.date_of_birth = born_years_ago(years);
            let errors = validate_user(&user, PasswordRule::Skip, fixed_now());
            assert_eq!(fields(&errors), vec!["dob"], "age {years}");
        }
    }

    #[test]
    fn staff_need_professional_id_not_nhs_number() {
        let mut user = patient();
        user.access_level = AccessLevel::Clinician;
        let errors = validate_user(&user, PasswordRule::Skip, fixed_now());
        assert_eq!(fields(&errors), vec!["professionalId"]);

        user.professional_id = Some(1_234_567_890);
        user.nhs_number = None;
        assert!(validate_user(&user, PasswordRule::Skip, fixed_now()).is_empty());
    }

    #[test]
    fn rules_are_not_short_circuited() {
        let mut user = patient();
        user.date_of_birth = born_years_ago(12);
        user.nhs_number = Some(123);
        user.email = "not-an-email".into();
        user.name = "Ann2".into();
        user.surname = "".into();
        let errors = validate_user(&user, PasswordRule::Check(None), fixed_now());
        assert_eq!(
            fields(&errors),
            vec!["dob", "nhsNumber", "email", "password", "name", "surname"]
        );
    }

    #[test]
    fn email_check_is_case_insensitive_and_trimmed() {
        let mut user = patient();
        user.email = "  Ann.Lee@Example.ORG ".into();
        assert!(validate_user(&user, PasswordRule::Skip, fixed_now()).is_empty());
    }

    #[test]
    fn password_rules() {
        assert!(is_acceptable_password("Abcdefg1"));
        assert!(is_acceptable_password("Abcdefghijklmn1"));
        assert!(!is_acceptable_password("Abcdef1"));
        assert!(!is_acceptable_password("Abcdefghijklmno1"));
        assert!(!is_acceptable_password("abcdefg1"));
        assert!(!is_acceptable_password("ABCDEFG1"));
        assert!(!is_acceptable_password("Abcdefgh"));
    }

    #[test]
    fn names_must_be_letters_only() {
        let mut user = patient();
        user.name = "Mary Ann".into();
        user.surname = "O'Neil".into();
        let errors = validate_user(&user, PasswordRule::Skip, fixed_now());
        assert_eq!(fields(&errors), vec!["name", "surname"]);
    }

    #[test]
    fn guest_optional_fields_only_checked_when_present() {
        let errors = validate_guest(born_years_ago(45), None, None, None, None, fixed_now());
        assert!(errors.is_empty());

        let errors = validate_guest(
            born_years_ago(45),
            Some(42),
            Some("bad"),
            Some("J0hn"),
            Some(""),
            fixed_now(),
        );
        assert_eq!(fields(&errors), vec!["nhsNumber", "email", "name", "surname"]);
    }
}
