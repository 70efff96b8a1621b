//! Partial profile updates.
//!
//! A [`UserPatch`] names only the fields to change. [`UserPatch::apply`] is a pure merge that
//! returns the updated user together with the set of fields the patch supplied, so permission
//! checks can look at *which* fields are being written without touching the stored record.

use crate::models::{flexible_date, AccessLevel, Gender, User};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UserField {
    Email,
    Name,
    Surname,
    DateOfBirth,
    Gender,
    IsBlack,
    NhsNumber,
    ProfessionalId,
    AccessLevel,
}

impl UserField {
    /// Fields only a Sysadmin may write.
    pub const PRIVILEGED: [UserField; 3] = [
        UserField::NhsNumber,
        UserField::ProfessionalId,
        UserField::AccessLevel,
    ];

    pub fn is_privileged(self) -> bool {
        Self::PRIVILEGED.contains(&self)
    }
}

pub type ChangedFields = BTreeSet<UserField>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    #[serde(default, with = "flexible_date::option")]
    #[schema(value_type = Option<String>, format = Date)]
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub is_black: Option<bool>,
    pub nhs_number: Option<i64>,
    pub professional_id: Option<i64>,
    pub access_level: Option<AccessLevel>,
}

impl UserPatch {
    /// Fields this patch supplies, whether or not the value differs from the stored one.
    pub fn supplied_fields(&self) -> ChangedFields {
        let mut fields = ChangedFields::new();
        let mut mark = |present: bool, field: UserField| {
            if present {
                fields.insert(field);
            }
        };
        mark(self.email.is_some(), UserField::Email);
        mark(self.name.is_some(), UserField::Name);
        mark(self.surname.is_some(), UserField::Surname);
        mark(self.date_of_birth.is_some(), UserField::DateOfBirth);
        mark(self.gender.is_some(), UserField::Gender);
        mark(self.is_black.is_some(), UserField::IsBlack);
        mark(self.nhs_number.is_some(), UserField::NhsNumber);
        mark(self.professional_id.is_some(), UserField::ProfessionalId);
        mark(self.access_level.is_some(), UserField::AccessLevel);
        fields
    }

    pub fn touches_privileged_fields(&self) -> bool {
        self.supplied_fields().iter().any(|f| f.is_privileged())
    }

    /// Merge this patch onto `base`.
    ///
    /// Returns the merged user and the fields the patch supplied. `base` is left unchanged.
    pub fn apply(&self, base: &User) -> (User, ChangedFields) {
        let mut user = base.clone();

        if let Some(email) = &self.email {
            user.email = email.trim().to_lowercase();
        }
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(surname) = &self.surname {
            user.surname = surname.clone();
        }
        if let Some(dob) = self.date_of_birth {
            user.date_of_birth = dob;
        }
        if let Some(gender) = self.gender {
            user.gender = gender;
        }
        if let Some(is_black) = self.is_black {
            user.is_black = is_black;
        }
        if let Some(nhs) = self.nhs_number {
            user.nhs_number = Some(nhs);
        }
        if let Some(pid) = self.professional_id {
            user.professional_id = Some(pid);
        }
        if let Some(level) = self.access_level {
            user.access_level = level;
        }

        (user, self.supplied_fields())
    }
}
