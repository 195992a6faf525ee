//! Composable authorization predicates.

use super::models::{Identity, Role, RouteClass};

/// What the pipeline knows about a request when it decides.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub ip_blocked: bool,
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    IpBlocked,
    Unauthenticated,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessPredicate {
    NotBlocked,
    IdentityPresent,
    HasRole(Role),
    /// First failing predicate decides.
    AllOf(Vec<AccessPredicate>),
}

impl AccessPredicate {
    pub fn for_route(class: RouteClass) -> Self {
        use AccessPredicate::*;
        match class {
            RouteClass::Public | RouteClass::OptionalAuth => AllOf(vec![NotBlocked]),
            RouteClass::Authenticated => AllOf(vec![NotBlocked, IdentityPresent]),
            RouteClass::Admin => AllOf(vec![NotBlocked, IdentityPresent, HasRole(Role::Admin)]),
        }
    }

    pub fn evaluate(&self, facts: &RequestFacts) -> AccessDecision {
        match self {
            AccessPredicate::NotBlocked if facts.ip_blocked => {
                AccessDecision::Deny(DenyReason::IpBlocked)
            }
            AccessPredicate::IdentityPresent if facts.identity.is_none() => {
                AccessDecision::Deny(DenyReason::Unauthenticated)
            }
            AccessPredicate::HasRole(role) => match &facts.identity {
                None => AccessDecision::Deny(DenyReason::Unauthenticated),
                Some(identity) if identity.role != *role => {
                    AccessDecision::Deny(DenyReason::Forbidden)
                }
                Some(_) => AccessDecision::Allow,
            },
            AccessPredicate::AllOf(predicates) => predicates
                .iter()
                .map(|p| p.evaluate(facts))
                .find(|decision| *decision != AccessDecision::Allow)
                .unwrap_or(AccessDecision::Allow),
            _ => AccessDecision::Allow,
        }
    }
}
