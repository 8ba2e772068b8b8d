//! Role-hierarchy-aware authorization
//!
//! The decision function is pure; the [`AccessGate`] wrapper adds the audit
//! emission on denial and produces the error carrying both required and
//! actual roles for diagnosability.

use crate::{
    Error,
    error::AuthError,
    events::{AuditDispatcher, PipelineStage, SecurityEvent, SecurityEventKind},
    principal::Principal,
    role::Role,
};

/// Decide whether `role` may access a route declared for `allowed`.
///
/// Membership always allows. Outside strict mode, the role hierarchy is
/// consulted: a role also passes when it dominates any allowed role, so an
/// admin reaches a `Client`-declared route without the route enumerating
/// every senior role. Strict mode disables the hierarchy and requires exact
/// membership.
pub fn authorize(role: Role, allowed: &[Role], strict: bool) -> bool {
    if allowed.contains(&role) {
        return true;
    }
    if strict {
        return false;
    }
    allowed.iter().any(|a| role.dominates(*a))
}

/// Authorization gate emitting an audit event on every denial.
pub struct AccessGate {
    audit: AuditDispatcher,
}

impl AccessGate {
    pub fn new(audit: AuditDispatcher) -> Self {
        Self { audit }
    }

    /// Check a principal against the allowed roles, returning the 403-shaped
    /// error on denial.
    pub async fn check(
        &self,
        principal: &Principal,
        allowed: &[Role],
        strict: bool,
    ) -> Result<(), Error> {
        if authorize(principal.role, allowed, strict) {
            return Ok(());
        }

        self.audit
            .emit(
                SecurityEvent::new(
                    SecurityEventKind::AuthorizationDenied,
                    serde_json::json!({
                        "user_id": principal.user_id.to_string(),
                        "required": allowed,
                        "actual": principal.role,
                        "strict": strict,
                    }),
                )
                .with_client_key(principal.ip_address.clone().unwrap_or_default())
                .with_stage(PipelineStage::AccessControl),
            )
            .await;

        Err(AuthError::InsufficientRole {
            required: allowed.to_vec(),
            actual: principal.role,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::ConnectionInfo;
    use crate::user::UserRecord;

    #[test]
    fn hierarchy_applies_outside_strict_mode() {
        assert!(authorize(Role::Admin, &[Role::Client], false));
        assert!(!authorize(Role::Client, &[Role::Admin], false));
        assert!(authorize(Role::Manager, &[Role::Client], false));
        assert!(authorize(Role::Client, &[Role::TeamMember], false));
    }

    #[test]
    fn strict_mode_requires_exact_membership() {
        assert!(!authorize(Role::Admin, &[Role::Client], true));
        assert!(authorize(Role::Admin, &[Role::Admin], true));
        assert!(authorize(Role::Client, &[Role::Admin, Role::Client], true));
    }

    #[test]
    fn inactive_is_never_authorized() {
        assert!(!authorize(Role::Inactive, &[Role::Client], false));
        assert!(!authorize(Role::Inactive, &[Role::TeamMember], false));
        // Even explicit membership cannot make an inactive role pass outside
        // of a route that literally allows it, which no route should.
        assert!(authorize(Role::Inactive, &[Role::Inactive], false));
    }

    #[tokio::test]
    async fn denial_surfaces_required_and_actual_roles() {
        let record = UserRecord::builder()
            .email("member@example.com".to_string())
            .role(Role::TeamMember)
            .build()
            .unwrap();
        let principal =
            Principal::from_record(&record, "ext-1".to_string(), &ConnectionInfo::default());

        let gate = AccessGate::new(AuditDispatcher::new());
        let err = gate
            .check(&principal, &[Role::Admin, Role::Manager], false)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "FORBIDDEN");
        match err {
            Error::Auth(AuthError::InsufficientRole { required, actual }) => {
                assert_eq!(required, vec![Role::Admin, Role::Manager]);
                assert_eq!(actual, Role::TeamMember);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
