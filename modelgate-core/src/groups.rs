//! Two-sided cohort resolution: which user group an email belongs to, and
//! which model group a requested model id falls into.

use std::collections::HashSet;

use serde_json::Value;

use crate::config::{GuardConfig, ModelGroup, UserGroup};
use crate::error::{Error, ErrorDetails};
use crate::identity::normalize_email;

/// Resolves the user cohort for an email: highest priority wins, declaration
/// order breaks ties, explicit membership beats the catch-all.
pub fn resolve_user_group<'a>(
    config: &'a GuardConfig,
    email: &str,
) -> Result<&'a UserGroup, Error> {
    let groups = &config.user_groups;
    if groups.is_empty() {
        return Err(Error::new(ErrorDetails::NoUserGroups));
    }

    let target = normalize_email(email);
    let mut order: Vec<usize> = (0..groups.len()).collect();
    // Stable sort keeps declaration order among equal priorities.
    order.sort_by_key(|&idx| std::cmp::Reverse(groups[idx].priority));

    for &idx in &order {
        let group = &groups[idx];
        if !group.emails.is_empty()
            && group
                .emails
                .iter()
                .any(|candidate| normalize_email(candidate) == target)
        {
            return Ok(group);
        }
    }

    if let Some(catch_all) = groups.iter().find(|group| group.emails.is_empty()) {
        return Ok(catch_all);
    }
    groups
        .first()
        .ok_or_else(|| Error::new(ErrorDetails::NoUserGroups))
}

/// Resolves the model cohort for a requested model id. `None` is a valid,
/// intentionally ungoverned state, not an error.
pub fn resolve_model_group<'a>(config: &'a GuardConfig, model_id: &str) -> Option<&'a ModelGroup> {
    if model_id.trim().is_empty() {
        return None;
    }
    config.model_groups.iter().find(|group| {
        group
            .models
            .iter()
            .any(|configured| models_match(configured, model_id))
    })
}

/// Derived spellings of a model id: the case-folded id itself, its last `/`
/// segment, the portion before `:`, and the combination. This tolerates
/// provider-qualified (`openai/gpt-4o`) and tagged (`llama3:8b`) names
/// without the configuration enumerating every variant.
pub(crate) fn model_id_variants(id: &str) -> HashSet<String> {
    let base = id.trim().to_lowercase();
    let mut variants = HashSet::new();
    if base.is_empty() {
        return variants;
    }
    let last_segment = base.rsplit('/').next().unwrap_or("");
    let before_tag = base.split(':').next().unwrap_or("");
    let segment_before_tag = last_segment.split(':').next().unwrap_or("");
    for variant in [segment_before_tag, last_segment, before_tag] {
        // Ids like `:tag` or `provider/` produce empty derivations; an empty
        // string must never match anything.
        if !variant.is_empty() {
            variants.insert(variant.to_string());
        }
    }
    variants.insert(base);
    variants
}

/// Two ids match when their variant sets intersect.
pub(crate) fn models_match(configured: &str, requested: &str) -> bool {
    let configured = model_id_variants(configured);
    if configured.is_empty() {
        return false;
    }
    !configured.is_disjoint(&model_id_variants(requested))
}

/// Normalizes the request's `model` field, which may arrive as a bare string
/// or as a structured value. Anything else is treated as absent.
pub(crate) fn extract_model_id(model: Option<&Value>) -> Option<String> {
    match model? {
        Value::String(id) => Some(id.clone()),
        Value::Object(map) => ["id", "model", "name"].iter().find_map(|key| {
            map.get(*key)
                .and_then(Value::as_str)
                .map(str::to_string)
        }),
        _ => None,
    }
}
