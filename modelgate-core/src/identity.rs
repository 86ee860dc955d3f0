//! Identity gating: the cheap, short-circuiting checks that run before any
//! cohort resolution.

use crate::config::GuardConfig;
use crate::templates;

/// Role granted the admin bypass.
pub const ADMIN_ROLE: &str = "admin";

/// An already-authenticated identity, as handed over by the routing layer.
/// The engine never authenticates; it trusts these fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Stable identifier used as the usage-accounting key.
    pub id: String,
    pub email: String,
    pub role: String,
}

/// Result of the identity gate. The first matching rule decides; later rules
/// are never consulted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// Short-circuit allow: the remaining pipeline stages are skipped
    /// entirely (no clipping, no accounting).
    Allow,
    Deny {
        reason: String,
    },
    /// No identity rule matched; cohort resolution takes over.
    PassThrough,
}

/// Email comparisons everywhere in the engine are case-insensitive and
/// whitespace-trimmed; this is the single normalization point.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Membership test under normalization.
pub(crate) fn email_in(list: &[String], email: &str) -> bool {
    let target = normalize_email(email);
    list.iter()
        .any(|candidate| normalize_email(candidate) == target)
}

/// Domain = substring after the last `@`, case-folded. An email without `@`
/// has no domain and fails any enabled domain check.
fn email_domain(email: &str) -> String {
    email
        .trim()
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_lowercase())
        .unwrap_or_default()
}

/// Evaluates the fixed-order identity rules.
pub fn evaluate(config: &GuardConfig, identity: &Identity) -> GateOutcome {
    if !config.base.enabled {
        return GateOutcome::Allow;
    }

    if identity.role == ADMIN_ROLE && !config.base.admin_effective {
        tracing::debug!(user = %identity.email, "admin bypass");
        return GateOutcome::Allow;
    }

    if config.exemption.enabled && email_in(&config.exemption.emails, &identity.email) {
        tracing::debug!(user = %identity.email, "exempted user");
        return GateOutcome::Allow;
    }

    if config.auth.enabled {
        let domain = email_domain(&identity.email);
        let allowed = config
            .auth
            .providers
            .iter()
            .any(|provider| provider.trim().to_lowercase() == domain);
        if !allowed {
            return GateOutcome::Deny {
                reason: config.auth.deny_msg.clone(),
            };
        }
    }

    if config.whitelist.enabled && !email_in(&config.whitelist.emails, &identity.email) {
        return GateOutcome::Deny {
            reason: templates::lookup(&config.custom_strings, "whitelist_deny").to_string(),
        };
    }

    for rule in &config.ban_reasons {
        if email_in(&rule.emails, &identity.email) {
            return GateOutcome::Deny {
                reason: rule.msg.clone(),
            };
        }
    }

    GateOutcome::PassThrough
}
