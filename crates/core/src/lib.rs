//! # CKD Core
//!
//! Decision logic for the CKD eGFR calculator service.
//!
//! This crate contains:
//! - the eGFR calculation and the field rules for user profiles
//! - session token issuance and caller resolution
//! - role-hierarchy authorization over profiles, listings, supervision and measurement history
//! - the measurement pipeline (single, guest and batch)
//! - account operations and the collaborator traits they run against
//!
//! **No transport concerns**: HTTP handlers, cookies and status codes belong in `api-rest`.
//! Services take the already-resolved caller and return a [`CkdResult`].

pub mod accounts;
pub mod authorization;
pub mod clinical;
pub mod config;
pub mod constants;
pub mod error;
pub mod identity;
pub mod import;
pub mod measurement;
pub mod models;
pub mod notify;
pub mod password;
pub mod patch;
pub mod store;
pub mod token;
pub mod validation;

pub use accounts::AccountService;
pub use config::CoreConfig;
pub use error::{CkdError, CkdResult, FieldError, StoreError};
pub use identity::IdentityResolver;
pub use measurement::MeasurementPipeline;
pub use models::{AccessLevel, Gender, Measurement, User, UserId};
