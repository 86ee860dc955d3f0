//! Effective-permission resolution for a resolved (user group, model group)
//! pair.

use strum::Display;

use crate::config::{ModelGroup, PermissionSet, UserGroup};

/// Where the effective permission set came from.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum PermissionSource {
    /// A per-model-group entry in the user group's override map.
    Override,
    /// The user group's blanket default.
    Default,
}

#[derive(Clone, Copy, Debug)]
pub struct ResolvedPermission<'a> {
    pub set: &'a PermissionSet,
    pub source: PermissionSource,
}

/// Override entry for the matched model group wins; the group default covers
/// everything else, including requests whose model matched no group at all.
pub fn resolve_permission<'a>(
    user_group: &'a UserGroup,
    model_group: Option<&ModelGroup>,
) -> ResolvedPermission<'a> {
    if let Some(model_group) = model_group {
        if let Some(set) = user_group.overrides.get(&model_group.id) {
            return ResolvedPermission {
                set,
                source: PermissionSource::Override,
            };
        }
    }
    ResolvedPermission {
        set: &user_group.permissions,
        source: PermissionSource::Default,
    }
}
