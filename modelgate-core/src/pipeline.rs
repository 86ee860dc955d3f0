//! The decision pipeline: identity gate, cohort resolution, permission
//! resolution, rate limiting, and context shaping, combined into a single
//! caller-facing outcome.

use rand::seq::IndexedRandom;
use serde_json::Value;

use crate::config::GuardConfig;
use crate::error::Error;
use crate::groups;
use crate::identity::{self, GateOutcome, Identity};
use crate::messages;
use crate::permission::resolve_permission;
use crate::rate_limiting::{
    Clock, GLOBAL_TARGET, InMemoryUsageStore, LimitScope, RateLimiter, SystemClock, UsageStore,
};
use crate::templates;

/// Terminal access decision for one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// The request proceeds against the configured substitute model; the
    /// caller writes the substitution back into the request.
    AllowWithSubstituteModel { model: String },
    /// The request is rejected with a caller-visible reason.
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Deny { .. })
    }
}

/// Full pipeline output: the decision plus orthogonal annotations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    pub decision: Decision,
    /// Context-clip size applied to the request's message list, when any.
    pub clip: Option<usize>,
    /// User-facing notices the caller should surface (fallback notification,
    /// promotional content).
    pub notices: Vec<String>,
}

impl Outcome {
    fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            clip: None,
            notices: Vec::new(),
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            decision: Decision::Deny { reason },
            clip: None,
            notices: Vec::new(),
        }
    }
}

/// The access decision engine. One instance lives for the process lifetime
/// and owns the usage-history table; configurations are passed per request
/// as immutable snapshots.
pub struct DecisionEngine<S = InMemoryUsageStore, C = SystemClock> {
    limiter: RateLimiter<S, C>,
}

impl DecisionEngine {
    pub fn new() -> Self {
        Self {
            limiter: RateLimiter::new(),
        }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: UsageStore, C: Clock> DecisionEngine<S, C> {
    /// Builds an engine over a custom store and clock (tests inject a manual
    /// clock here).
    pub fn with_parts(store: S, clock: C) -> Self {
        Self {
            limiter: RateLimiter::with_parts(store, clock),
        }
    }

    pub fn limiter(&self) -> &RateLimiter<S, C> {
        &self.limiter
    }

    /// Decides one request. The body is only ever mutated in one way: the
    /// authoritative message list is clipped in place when the effective
    /// permission asks for it.
    pub fn decide(
        &self,
        config: &GuardConfig,
        identity: &Identity,
        body: &mut Value,
    ) -> Result<Outcome, Error> {
        match identity::evaluate(config, identity) {
            GateOutcome::Allow => return Ok(Outcome::allow()),
            GateOutcome::Deny { reason } => return Ok(Outcome::deny(reason)),
            GateOutcome::PassThrough => {}
        }

        let model_id = groups::extract_model_id(body.get("model")).unwrap_or_default();
        let user_group = groups::resolve_user_group(config, &identity.email)?;
        let model_group = groups::resolve_model_group(config, &model_id);
        let model_group_label = model_group.map_or("none", |group| group.id.as_str());

        let permission = resolve_permission(user_group, model_group);
        tracing::debug!(
            user_group = %user_group.id,
            model_group = model_group_label,
            source = %permission.source,
            model = %model_id,
            "resolved permission"
        );

        if !model_id.is_empty()
            && user_group
                .deny_models
                .iter()
                .any(|denied| groups::models_match(denied, &model_id))
        {
            let reason = templates::render(
                templates::lookup(&config.custom_strings, "user_deny_model"),
                &[
                    ("u_tier", user_group.id.as_str()),
                    ("u_group", user_group.id.as_str()),
                    ("model_id", model_id.as_str()),
                ],
            );
            return Ok(Outcome::deny(reason));
        }

        if !permission.set.enabled {
            let reason = permission.set.deny_message.clone().unwrap_or_else(|| {
                templates::render(
                    templates::lookup(&config.custom_strings, "group_deny"),
                    &[
                        ("u_group", user_group.id.as_str()),
                        ("m_group", model_group_label),
                    ],
                )
            });
            return Ok(Outcome::deny(reason));
        }

        let target = if config.global_limit.enabled {
            GLOBAL_TARGET
        } else {
            model_id.as_str()
        };
        let scope = LimitScope {
            user_group_id: user_group.id.as_str(),
            model_group_id: model_group.map(|group| group.id.as_str()),
        };

        let mut outcome = match self
            .limiter
            .check_and_record(permission.set, scope, &identity.id, target)
        {
            Some(hit) => {
                let reason = hit.reason();
                tracing::info!(user = %identity.email, bucket = target, %reason, "rate limit hit");
                if config.fallback.enabled {
                    let mut outcome = Outcome {
                        decision: Decision::AllowWithSubstituteModel {
                            model: config.fallback.model.clone(),
                        },
                        clip: None,
                        notices: Vec::new(),
                    };
                    if config.fallback.notify {
                        outcome.notices.push(config.fallback.notify_msg.clone());
                    }
                    outcome
                } else {
                    let reason = templates::render(
                        templates::lookup(&config.custom_strings, "rate_limit_deny"),
                        &[("reason", reason.as_str())],
                    );
                    return Ok(Outcome::deny(reason));
                }
            }
            None => Outcome::allow(),
        };

        let clip = permission.set.clip;
        if clip > 0 {
            outcome.clip = Some(clip);
            if messages::clip_messages(body, clip) {
                tracing::debug!(clip, "context clipped");
            }
        }

        if config.ads.enabled {
            if let Some(notice) = pick_notice(&config.ads.content) {
                outcome.notices.push(notice);
            }
        }

        Ok(outcome)
    }
}

/// Uniformly picks one non-blank entry from the notice pool.
fn pick_notice(pool: &[String]) -> Option<String> {
    let valid: Vec<&String> = pool.iter().filter(|entry| !entry.trim().is_empty()).collect();
    valid.choose(&mut rand::rng()).map(|entry| (*entry).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(email: &str) -> Identity {
        Identity {
            id: format!("id-{email}"),
            email: email.to_string(),
            role: "user".to_string(),
        }
    }

    fn body(model: &str) -> Value {
        json!({"model": model, "messages": []})
    }

    #[test]
    fn test_disabled_base_always_allows() {
        let config = GuardConfig::parse(
            r#"{
                "base": {"enabled": false},
                "ban_reasons": [{"emails": ["x@y.com"], "msg": "out"}]
            }"#,
        )
        .unwrap();
        let engine = DecisionEngine::new();
        let outcome = engine
            .decide(&config, &identity("x@y.com"), &mut body("m"))
            .unwrap();
        assert_eq!(outcome.decision, Decision::Allow);
        assert_eq!(outcome.clip, None);
        assert!(outcome.notices.is_empty());
    }

    #[test]
    fn test_gate_deny_reaches_caller() {
        let config = GuardConfig::parse(
            r#"{"ban_reasons": [{"emails": ["x@y.com"], "msg": "suspended"}]}"#,
        )
        .unwrap();
        let engine = DecisionEngine::new();
        let outcome = engine
            .decide(&config, &identity("x@y.com"), &mut body("m"))
            .unwrap();
        assert_eq!(
            outcome.decision,
            Decision::Deny {
                reason: "suspended".to_string()
            }
        );
    }

    #[test]
    fn test_no_groups_is_an_error() {
        let config = GuardConfig::parse(
            r#"{"user_groups": [], "model_groups": [{"id": "mg", "models": ["m"]}]}"#,
        )
        .unwrap();
        let engine = DecisionEngine::new();
        let err = engine
            .decide(&config, &identity("x@y.com"), &mut body("m"))
            .unwrap_err();
        assert_eq!(
            err.get_details(),
            &crate::error::ErrorDetails::NoUserGroups
        );
    }

    #[test]
    fn test_disabled_permission_names_both_cohorts() {
        let config = GuardConfig::parse(
            r#"{
                "user_groups": [
                    {"id": "free", "overrides": {"frontier": {"enabled": false}}}
                ],
                "model_groups": [{"id": "frontier", "models": ["gpt-4o"]}]
            }"#,
        )
        .unwrap();
        let engine = DecisionEngine::new();
        let outcome = engine
            .decide(&config, &identity("x@y.com"), &mut body("openai/gpt-4o"))
            .unwrap();
        assert_eq!(
            outcome.decision,
            Decision::Deny {
                reason:
                    "Access Denied: user group free has no permission for model group frontier"
                        .to_string()
            }
        );
    }

    #[test]
    fn test_deny_models_trumps_permissions() {
        let config = GuardConfig::parse(
            r#"{
                "user_groups": [{"id": "free", "deny_models": ["gpt-4o"]}],
                "model_groups": []
            }"#,
        )
        .unwrap();
        let engine = DecisionEngine::new();
        let outcome = engine
            .decide(&config, &identity("x@y.com"), &mut body("openai/gpt-4o:latest"))
            .unwrap();
        assert_eq!(
            outcome.decision,
            Decision::Deny {
                reason: "Tier free users cannot use model openai/gpt-4o:latest".to_string()
            }
        );
    }

    #[test]
    fn test_unmatched_model_is_ungoverned() {
        let config = GuardConfig::parse(
            r#"{
                "user_groups": [
                    {"id": "free", "overrides": {"frontier": {"enabled": false}}}
                ],
                "model_groups": [{"id": "frontier", "models": ["gpt-4o"]}]
            }"#,
        )
        .unwrap();
        let engine = DecisionEngine::new();
        let outcome = engine
            .decide(&config, &identity("x@y.com"), &mut body("mistral-7b"))
            .unwrap();
        assert_eq!(outcome.decision, Decision::Allow);
    }

    #[test]
    fn test_clip_annotation_and_body_mutation() {
        let config = GuardConfig::parse(
            r#"{
                "user_groups": [{"id": "free", "permissions": {"clip": 2}}]
            }"#,
        )
        .unwrap();
        let engine = DecisionEngine::new();
        let mut body = json!({
            "model": "m",
            "messages": [
                {"role": "system", "content": "s"},
                {"role": "user", "content": "m1"},
                {"role": "assistant", "content": "m2"},
                {"role": "user", "content": "m3"},
                {"role": "assistant", "content": "m4"},
                {"role": "user", "content": "m5"},
            ]
        });
        let outcome = engine
            .decide(&config, &identity("x@y.com"), &mut body)
            .unwrap();
        assert_eq!(outcome.decision, Decision::Allow);
        assert_eq!(outcome.clip, Some(2));
        let clipped = body["messages"].as_array().unwrap();
        assert_eq!(clipped.len(), 3);
        assert_eq!(clipped[0]["content"], "s");
        assert_eq!(clipped[1]["content"], "m4");
        assert_eq!(clipped[2]["content"], "m5");
    }

    #[test]
    fn test_notice_pool_skips_blank_entries() {
        assert_eq!(pick_notice(&[String::new(), "  ".to_string()]), None);
        assert_eq!(
            pick_notice(&["  ".to_string(), "hello".to_string()]),
            Some("hello".to_string())
        );
        assert_eq!(pick_notice(&[]), None);
    }

    #[test]
    fn test_ads_attach_a_notice() {
        let config = GuardConfig::parse(
            r#"{
                "user_groups": [{"id": "free"}],
                "ads": {"enabled": true, "content": ["try the new model"]}
            }"#,
        )
        .unwrap();
        let engine = DecisionEngine::new();
        let outcome = engine
            .decide(&config, &identity("x@y.com"), &mut body("m"))
            .unwrap();
        assert_eq!(outcome.notices, vec!["try the new model".to_string()]);
    }
}
