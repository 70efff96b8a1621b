//! Resolving the caller behind a session token.
//!
//! Every request re-verifies its token and re-reads the user, so role changes and deletions take
//! effect on the next request. A missing, malformed, expired or forged token and a token whose
//! user no longer exists are indistinguishable to the caller: all of them are "not logged in".

use crate::error::{CkdError, CkdResult};
use crate::models::User;
use crate::store::UserStore;
use crate::token::{TokenService, TokenVerification};
use std::sync::Arc;

#[derive(Clone)]
pub struct IdentityResolver {
    tokens: Arc<dyn TokenService>,
    users: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(tokens: Arc<dyn TokenService>, users: Arc<dyn UserStore>) -> Self {
        Self { tokens, users }
    }

    /// Resolve the caller, or `None` for an anonymous request.
    ///
    /// # Errors
    ///
    /// Only store faults propagate. Every token problem resolves to `Ok(None)`.
    pub fn resolve(&self, session_token: Option<&str>) -> CkdResult<Option<User>> {
        let Some(token) = session_token.filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };

        let claims = match self.tokens.verify(token) {
            TokenVerification::Verified(claims) => claims,
            TokenVerification::Invalid => {
                tracing::debug!("session token failed verification");
                return Ok(None);
            }
        };

        let user = self.users.get_by_id(claims.subject())?;
        if user.is_none() {
            tracing::debug!(user_id = %claims.subject(), "verified token for unknown user");
        }
        Ok(user)
    }

    /// Resolve the caller, treating an anonymous request as an error.
    pub fn require(&self, session_token: Option<&str>) -> CkdResult<User> {
        self.resolve(session_token)?
            .ok_or(CkdError::Unauthenticated)
    }
}
