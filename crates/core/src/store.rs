//! Persistence collaborators.
//!
//! The core only talks to storage through [`UserStore`] and [`MeasurementStore`]. Lookups return
//! owned snapshots; nothing is cached between calls. [`InMemoryStore`] is the reference
//! implementation used by the server binary and the tests.
//!
//! Uniqueness of email, NHS number and professional ID is enforced here as the final backstop:
//! services pre-check, but a racing write surfaces as [`StoreError::Conflict`].

use crate::error::{StoreError, StoreResult};
use crate::models::{Measurement, MeasurementId, NewMeasurement, User, UserId};
use std::sync::RwLock;

pub trait UserStore: Send + Sync {
    fn get_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    fn get_by_nhs_number(&self, nhs_number: i64) -> StoreResult<Option<User>>;
    fn get_by_professional_id(&self, professional_id: i64) -> StoreResult<Option<User>>;
    fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>>;
    fn get_by_supervisor(&self, supervisor_id: UserId) -> StoreResult<Vec<User>>;
    fn get_with_filter(&self, predicate: &dyn Fn(&User) -> bool) -> StoreResult<Vec<User>>;

    /// Store a new user. The `id` on the input is ignored and a fresh one assigned.
    fn create(&self, user: User) -> StoreResult<User>;

    /// Write back a modified user, matched by `id`.
    fn persist_changes(&self, user: &User) -> StoreResult<()>;
}

pub trait MeasurementStore: Send + Sync {
    fn create(&self, measurement: NewMeasurement) -> StoreResult<Measurement>;
    fn get_by_user(&self, user: &User) -> StoreResult<Vec<Measurement>>;
}

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    measurements: Vec<Measurement>,
    next_user_id: i64,
    next_measurement_id: i64,
}

/// Thread-safe in-process store implementing both collaborator traits.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }

    fn find_user(&self, predicate: impl Fn(&User) -> bool) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.iter().find(|u| predicate(u)).cloned())
    }
}

/// Reject `candidate` if another user (different id) already holds one of its unique keys.
fn check_unique(users: &[User], candidate: &User, skip_id: Option<UserId>) -> StoreResult<()> {
    for existing in users.iter().filter(|u| Some(u.id) != skip_id) {
        if existing.email.eq_ignore_ascii_case(candidate.email.trim()) {
            return Err(StoreError::Conflict { field: "email" });
        }
        if candidate.nhs_number.is_some() && existing.nhs_number == candidate.nhs_number {
            return Err(StoreError::Conflict {
                field: "NHS number",
            });
        }
        if candidate.professional_id.is_some()
            && existing.professional_id == candidate.professional_id
        {
            return Err(StoreError::Conflict {
                field: "professional ID",
            });
        }
    }
    Ok(())
}

impl UserStore for InMemoryStore {
    fn get_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.trim();
        self.find_user(|u| u.email.eq_ignore_ascii_case(email))
    }

    fn get_by_nhs_number(&self, nhs_number: i64) -> StoreResult<Option<User>> {
        self.find_user(|u| u.nhs_number == Some(nhs_number))
    }

    fn get_by_professional_id(&self, professional_id: i64) -> StoreResult<Option<User>> {
        self.find_user(|u| u.professional_id == Some(professional_id))
    }

    fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.find_user(|u| u.id == id)
    }

    fn get_by_supervisor(&self, supervisor_id: UserId) -> StoreResult<Vec<User>> {
        self.get_with_filter(&|u: &User| u.supervisor_id == Some(supervisor_id))
    }

    fn get_with_filter(&self, predicate: &dyn Fn(&User) -> bool) -> StoreResult<Vec<User>> {
        Ok(self
            .read()?
            .users
            .iter()
            .filter(|u| predicate(u))
            .cloned()
            .collect())
    }

    fn create(&self, mut user: User) -> StoreResult<User> {
        let mut tables = self.write()?;
        check_unique(&tables.users, &user, None)?;

        tables.next_user_id += 1;
        user.id = UserId(tables.next_user_id);
        tables.users.push(user.clone());
        Ok(user)
    }

    fn persist_changes(&self, user: &User) -> StoreResult<()> {
        let mut tables = self.write()?;
        check_unique(&tables.users, user, Some(user.id))?;

        let slot = tables
            .users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or(StoreError::NotFound)?;
        *slot = user.clone();
        Ok(())
    }
}

impl MeasurementStore for InMemoryStore {
    fn create(&self, measurement: NewMeasurement) -> StoreResult<Measurement> {
        let mut tables = self.write()?;
        if !tables.users.iter().any(|u| u.id == measurement.user_id) {
            return Err(StoreError::NotFound);
        }

        tables.next_measurement_id += 1;
        let stored = Measurement {
            id: MeasurementId(tables.next_measurement_id),
            user_id: measurement.user_id,
            timestamp: measurement.timestamp,
            result: measurement.result,
        };
        tables.measurements.push(stored.clone());
        Ok(stored)
    }

    fn get_by_user(&self, user: &User) -> StoreResult<Vec<Measurement>> {
        Ok(self
            .read()?
            .measurements
            .iter()
            .filter(|m| m.user_id == user.id)
            .cloned()
            .collect())
    }
}
