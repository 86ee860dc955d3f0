//! Legacy tier schema → group schema derivation.
//!
//! Runs once at configuration load, only when no group schema is present.
//! The derivation is a pure function of the tier schema, so running it twice
//! over the same input yields identical output.

use std::collections::HashMap;

use super::{
    ModelGroup, ModelTier, ModelTiersConfig, PermissionSet, PriorityConfig, RateLimits, UserGroup,
    UserTier,
};
use crate::identity::normalize_email;
use crate::templates;

fn tier_group_id(tier_id: i64) -> String {
    format!("tier_{tier_id}")
}

/// Derives an equivalent group schema from the legacy tier schema.
pub(super) fn migrate_tier_schema(
    user_tiers: &[UserTier],
    model_tiers: &[ModelTier],
    tiers_config: ModelTiersConfig,
    priority: PriorityConfig,
    custom_strings: &HashMap<String, String>,
) -> (Vec<UserGroup>, Vec<ModelGroup>) {
    let model_groups: Vec<ModelGroup> = model_tiers
        .iter()
        .map(|tier| ModelGroup {
            id: tier_group_id(tier.tier_id),
            name: tier.tier_name.clone(),
            models: tier.models.clone(),
        })
        .collect();

    let user_groups = user_tiers
        .iter()
        .map(|user_tier| {
            let overrides = model_tiers
                .iter()
                .map(|model_tier| {
                    (
                        tier_group_id(model_tier.tier_id),
                        permission_for_pair(
                            user_tier,
                            model_tier,
                            tiers_config,
                            priority,
                            custom_strings,
                        ),
                    )
                })
                .collect();

            UserGroup {
                id: tier_group_id(user_tier.tier_id),
                name: user_tier.tier_name.clone(),
                priority: user_tier.tier_id,
                emails: user_tier.emails.clone(),
                permissions: PermissionSet {
                    enabled: true,
                    limits: user_limits(user_tier),
                    clip: user_tier.clip,
                    model_limits: None,
                    user_priority: priority.user_priority,
                    deny_message: None,
                },
                overrides,
                deny_models: if user_tier.deny_model_enabled {
                    user_tier.deny_models.clone()
                } else {
                    Vec::new()
                },
            }
        })
        .collect();

    (user_groups, model_groups)
}

fn user_limits(user_tier: &UserTier) -> RateLimits {
    RateLimits {
        rpm: user_tier.rpm,
        rph: user_tier.rph,
        window_minutes: user_tier.win_time,
        window_limit: user_tier.win_limit,
    }
}

fn model_limits(model_tier: &ModelTier) -> RateLimits {
    RateLimits {
        rpm: model_tier.rpm,
        rph: model_tier.rph,
        window_minutes: model_tier.win_time,
        window_limit: model_tier.win_limit,
    }
}

/// Access decision and limits for one (user tier, model tier) pair.
fn permission_for_pair(
    user_tier: &UserTier,
    model_tier: &ModelTier,
    tiers_config: ModelTiersConfig,
    priority: PriorityConfig,
    custom_strings: &HashMap<String, String>,
) -> PermissionSet {
    let u_tier = user_tier.tier_id.to_string();
    let m_tier = model_tier.tier_id.to_string();

    let deny_message = if tiers_config.match_tiers {
        if user_tier.tier_id == model_tier.tier_id {
            None
        } else {
            Some(templates::render(
                templates::lookup(custom_strings, "tier_mismatch"),
                &[("u_tier", u_tier.as_str()), ("m_tier", m_tier.as_str())],
            ))
        }
    } else if model_tier.access_list.is_empty() {
        // An empty access list places no restriction on the tier.
        None
    } else {
        let member_listed = user_tier.emails.iter().any(|email| {
            let email = normalize_email(email);
            model_tier
                .access_list
                .iter()
                .any(|listed| normalize_email(listed) == email)
        });
        if model_tier.mode_whitelist {
            // A memberless tier has no email in any list, so it is denied.
            if member_listed {
                None
            } else {
                Some(templates::render(
                    templates::lookup(custom_strings, "model_wl_deny"),
                    &[("m_tier", m_tier.as_str())],
                ))
            }
        } else if member_listed {
            Some(templates::render(
                templates::lookup(custom_strings, "model_bl_deny"),
                &[("m_tier", m_tier.as_str())],
            ))
        } else {
            None
        }
    };

    PermissionSet {
        enabled: deny_message.is_none(),
        limits: user_limits(user_tier),
        clip: user_tier.clip.max(model_tier.clip),
        model_limits: Some(model_limits(model_tier)),
        user_priority: priority.user_priority || model_tier.user_priority,
        deny_message,
    }
}
