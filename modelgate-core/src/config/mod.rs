//! Configuration ingestion: comment-tolerant parsing, defaulting, and
//! resolution of the legacy tier schema into the canonical group schema.
//!
//! Raw configuration text deserializes into [`UninitializedGuardConfig`],
//! which may carry either cohort schema; [`UninitializedGuardConfig::load`]
//! produces the canonical, always-group-shaped [`GuardConfig`] the decision
//! pipeline consumes. A `GuardConfig` is an immutable snapshot: the engine
//! never mutates it, and a request must see exactly one snapshot end to end.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, map::Entry};

use crate::error::{Error, ErrorDetails};
use crate::templates;

mod migration;

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BaseConfig {
    /// Master switch. When off, every request is allowed untouched.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the rules below apply to admin-role identities too.
    #[serde(default)]
    pub admin_effective: bool,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            admin_effective: false,
        }
    }
}

fn default_auth_providers() -> Vec<String> {
    vec![
        "outlook.com".to_string(),
        "gmail.com".to_string(),
        "qq.com".to_string(),
    ]
}

fn default_auth_deny_msg() -> String {
    "Access Denied: Your email provider is not supported.".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Email domains accepted when domain authentication is on.
    #[serde(default = "default_auth_providers")]
    pub providers: Vec<String>,
    #[serde(default = "default_auth_deny_msg")]
    pub deny_msg: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            providers: default_auth_providers(),
            deny_msg: default_auth_deny_msg(),
        }
    }
}

/// A switchable email list, used for both the whitelist and the exemption
/// list.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct EmailListGate {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub emails: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PriorityConfig {
    /// Legacy flag: when set, only user-tier limits can force a rejection.
    #[serde(default)]
    pub user_priority: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct GlobalLimitConfig {
    /// When on, usage accounting is shared across all models instead of
    /// tracked per model.
    #[serde(default)]
    pub enabled: bool,
}

fn default_ban_msg() -> String {
    "Account Suspended".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BanRule {
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default = "default_ban_msg")]
    pub msg: String,
}

fn default_fallback_model() -> String {
    "qwen2:0.5b".to_string()
}

fn default_fallback_notify_msg() -> String {
    "Rate limit exceeded. Switched to fallback model.".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Substitute model id used instead of rejecting a rate-limited request.
    #[serde(default = "default_fallback_model")]
    pub model: String,
    #[serde(default = "default_true")]
    pub notify: bool,
    #[serde(default = "default_fallback_notify_msg")]
    pub notify_msg: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_fallback_model(),
            notify: true,
            notify_msg: default_fallback_notify_msg(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct AdsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Pool of promotional notices; one is chosen at random per request.
    #[serde(default)]
    pub content: Vec<String>,
}

/// Windowed request thresholds. Zero disables the corresponding check.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RateLimits {
    /// Requests per fixed 60-second window.
    #[serde(default)]
    pub rpm: u32,
    /// Requests per fixed 3600-second window.
    #[serde(default)]
    pub rph: u32,
    /// Length of the configurable window, in minutes.
    #[serde(default)]
    pub window_minutes: u64,
    /// Request cap inside the configurable window.
    #[serde(default)]
    pub window_limit: u32,
}

/// Effective permissions for a (user group, model group) pair.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PermissionSet {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub limits: RateLimits,
    /// Context clip: keep the system message plus the last `clip` non-system
    /// messages. Zero disables clipping.
    #[serde(default)]
    pub clip: usize,
    /// Legacy model-tier limits attached by schema migration. Group-schema
    /// configurations never set this.
    #[serde(skip)]
    pub model_limits: Option<RateLimits>,
    /// Legacy flag: a model-side limit hit alone does not reject.
    #[serde(skip)]
    pub user_priority: bool,
    /// Deny message pre-rendered by schema migration for pairs whose access
    /// check failed, so migrated configurations keep their exact wording.
    #[serde(skip)]
    pub deny_message: Option<String>,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self {
            enabled: true,
            limits: RateLimits::default(),
            clip: 0,
            model_limits: None,
            user_priority: false,
            deny_message: None,
        }
    }
}

/// A user cohort. An empty member list makes the group the catch-all.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct UserGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Higher priority wins membership resolution; declaration order breaks
    /// ties.
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub emails: Vec<String>,
    /// Permissions applied when no override matches the resolved model group.
    #[serde(default)]
    pub permissions: PermissionSet,
    /// Per-model-group permission overrides, keyed by model group id.
    #[serde(default)]
    pub overrides: HashMap<String, PermissionSet>,
    /// Model ids this cohort may never use, regardless of permissions.
    #[serde(default)]
    pub deny_models: Vec<String>,
}

/// A model cohort. Membership tolerates provider-qualified and tagged
/// variants of the listed ids.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ModelGroup {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub models: Vec<String>,
}

/// Raw user group as parsed; `load` drops empty-object override entries
/// before they become authoritative.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct UninitializedUserGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub permissions: PermissionSet,
    #[serde(default)]
    pub overrides: HashMap<String, Value>,
    #[serde(default)]
    pub deny_models: Vec<String>,
}

impl UninitializedUserGroup {
    fn load(self) -> Result<UserGroup, Error> {
        let mut overrides = HashMap::new();
        for (model_group_id, entry) in self.overrides {
            // An empty entry is a placeholder, not a configured override.
            if entry.is_null() || entry.as_object().is_some_and(Map::is_empty) {
                continue;
            }
            let set: PermissionSet = serde_json::from_value(entry).map_err(|e| {
                Error::new(ErrorDetails::ConfigParse {
                    message: format!(
                        "invalid permission override `{model_group_id}` in user group `{}`: {e}",
                        self.id
                    ),
                })
            })?;
            overrides.insert(model_group_id, set);
        }
        Ok(UserGroup {
            id: self.id,
            name: self.name,
            priority: self.priority,
            emails: self.emails,
            permissions: self.permissions,
            overrides,
            deny_models: self.deny_models,
        })
    }
}

/// Legacy user tier.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct UserTier {
    #[serde(default)]
    pub tier_id: i64,
    #[serde(default)]
    pub tier_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub rpm: u32,
    #[serde(default)]
    pub rph: u32,
    /// Configurable window length, in minutes.
    #[serde(default)]
    pub win_time: u64,
    #[serde(default)]
    pub win_limit: u32,
    #[serde(default)]
    pub clip: usize,
    #[serde(default)]
    pub deny_model_enabled: bool,
    #[serde(default)]
    pub deny_models: Vec<String>,
}

impl Default for UserTier {
    fn default() -> Self {
        Self {
            tier_id: 0,
            tier_name: "Default".to_string(),
            enabled: true,
            emails: Vec::new(),
            rpm: 0,
            rph: 0,
            win_time: 0,
            win_limit: 0,
            clip: 0,
            deny_model_enabled: false,
            deny_models: Vec::new(),
        }
    }
}

/// Legacy model tier.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ModelTier {
    #[serde(default)]
    pub tier_id: i64,
    #[serde(default)]
    pub tier_name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub rpm: u32,
    #[serde(default)]
    pub rph: u32,
    #[serde(default)]
    pub win_time: u64,
    #[serde(default)]
    pub win_limit: u32,
    #[serde(default)]
    pub clip: usize,
    /// Whitelist mode for `access_list`; blacklist mode otherwise.
    #[serde(default)]
    pub mode_whitelist: bool,
    #[serde(default)]
    pub access_list: Vec<String>,
    /// Legacy flag: user-tier limits take precedence for this model tier.
    #[serde(default)]
    pub user_priority: bool,
}

impl Default for ModelTier {
    fn default() -> Self {
        Self {
            tier_id: 0,
            tier_name: "Default".to_string(),
            enabled: false,
            models: Vec::new(),
            rpm: 0,
            rph: 0,
            win_time: 0,
            win_limit: 0,
            clip: 0,
            mode_whitelist: false,
            access_list: Vec::new(),
            user_priority: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct ModelTiersConfig {
    /// Strict mode: a user tier may only access the model tier with the same
    /// id.
    #[serde(default)]
    pub match_tiers: bool,
}

fn default_user_tiers() -> Vec<UserTier> {
    vec![UserTier::default()]
}

fn default_model_tiers() -> Vec<ModelTier> {
    vec![ModelTier::default()]
}

fn default_custom_strings() -> HashMap<String, String> {
    templates::MESSAGE_KEYS
        .iter()
        .filter_map(|key| {
            templates::builtin_message(key).map(|text| ((*key).to_string(), text.to_string()))
        })
        .collect()
}

/// Configuration as parsed from text, before schema resolution. Either
/// cohort schema may be present; when both are, the group schema wins.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UninitializedGuardConfig {
    #[serde(default)]
    pub base: BaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub whitelist: EmailListGate,
    #[serde(default)]
    pub exemption: EmailListGate,
    #[serde(default)]
    pub priority: PriorityConfig,
    #[serde(default)]
    pub global_limit: GlobalLimitConfig,
    #[serde(default = "default_user_tiers")]
    pub user_tiers: Vec<UserTier>,
    #[serde(default)]
    pub model_tiers_config: ModelTiersConfig,
    #[serde(default = "default_model_tiers")]
    pub model_tiers: Vec<ModelTier>,
    #[serde(default)]
    pub ban_reasons: Vec<BanRule>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub ads: AdsConfig,
    #[serde(default = "default_custom_strings")]
    pub custom_strings: HashMap<String, String>,
    #[serde(default)]
    pub user_groups: Vec<UninitializedUserGroup>,
    #[serde(default)]
    pub model_groups: Vec<ModelGroup>,
}

impl Default for UninitializedGuardConfig {
    fn default() -> Self {
        Self {
            base: BaseConfig::default(),
            auth: AuthConfig::default(),
            whitelist: EmailListGate::default(),
            exemption: EmailListGate::default(),
            priority: PriorityConfig::default(),
            global_limit: GlobalLimitConfig::default(),
            user_tiers: default_user_tiers(),
            model_tiers_config: ModelTiersConfig::default(),
            model_tiers: default_model_tiers(),
            ban_reasons: Vec::new(),
            fallback: FallbackConfig::default(),
            ads: AdsConfig::default(),
            custom_strings: default_custom_strings(),
            user_groups: Vec::new(),
            model_groups: Vec::new(),
        }
    }
}

impl UninitializedGuardConfig {
    /// Resolves the raw configuration into the canonical group-shaped form,
    /// migrating the legacy tier schema when no group schema is present.
    pub fn load(self) -> Result<GuardConfig, Error> {
        let group_schema_present = !self.user_groups.is_empty() || !self.model_groups.is_empty();
        let (user_groups, model_groups) = if group_schema_present {
            let user_groups = self
                .user_groups
                .into_iter()
                .map(UninitializedUserGroup::load)
                .collect::<Result<Vec<_>, _>>()?;
            (user_groups, self.model_groups)
        } else {
            migration::migrate_tier_schema(
                &self.user_tiers,
                &self.model_tiers,
                self.model_tiers_config,
                self.priority,
                &self.custom_strings,
            )
        };

        warn_on_extra_catch_alls(&user_groups);

        Ok(GuardConfig {
            base: self.base,
            auth: self.auth,
            whitelist: self.whitelist,
            exemption: self.exemption,
            global_limit: self.global_limit,
            ban_reasons: self.ban_reasons,
            fallback: self.fallback,
            ads: self.ads,
            custom_strings: self.custom_strings,
            user_groups,
            model_groups,
        })
    }
}

/// Several catch-all groups cannot all be authoritative; the first declared
/// wins and the rest are flagged.
fn warn_on_extra_catch_alls(user_groups: &[UserGroup]) {
    let mut catch_alls = user_groups.iter().filter(|group| group.emails.is_empty());
    if let Some(first) = catch_alls.next() {
        for extra in catch_alls {
            tracing::warn!(
                "user group `{}` is a second catch-all (no members); catch-all resolution uses `{}`",
                extra.id,
                first.id
            );
        }
    }
}

/// Canonical configuration: always group-shaped, immutable per request.
#[derive(Clone, Debug, PartialEq)]
pub struct GuardConfig {
    pub base: BaseConfig,
    pub auth: AuthConfig,
    pub whitelist: EmailListGate,
    pub exemption: EmailListGate,
    pub global_limit: GlobalLimitConfig,
    pub ban_reasons: Vec<BanRule>,
    pub fallback: FallbackConfig,
    pub ads: AdsConfig,
    pub custom_strings: HashMap<String, String>,
    pub user_groups: Vec<UserGroup>,
    pub model_groups: Vec<ModelGroup>,
}

impl GuardConfig {
    /// Parses raw configuration text: strips comments, fills every missing
    /// or null field from the built-in defaults, and resolves the cohort
    /// schema. Parse failures are fatal — defaulting a malformed
    /// configuration could unintentionally widen access.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let stripped = strip_comments(text);
        let parsed: Value = serde_json::from_str(&stripped).map_err(|e| {
            Error::new(ErrorDetails::ConfigParse {
                message: e.to_string(),
            })
        })?;
        if !parsed.is_object() {
            return Err(Error::new(ErrorDetails::ConfigParse {
                message: "configuration root must be an object".to_string(),
            }));
        }

        let defaults = serde_json::to_value(UninitializedGuardConfig::default()).map_err(|e| {
            Error::new(ErrorDetails::ConfigParse {
                message: format!("failed to build default configuration: {e}"),
            })
        })?;
        let merged = deep_merge(defaults, parsed);

        let raw: UninitializedGuardConfig =
            serde_path_to_error::deserialize(merged).map_err(|e| {
                Error::new(ErrorDetails::ConfigParse {
                    message: e.to_string(),
                })
            })?;
        raw.load()
    }
}

/// Fills `overlay` from `default`: objects merge key by key, `null` falls
/// back to the default, and everything else (arrays included) replaces the
/// default wholesale — so a configuration can set `[]` to disable a
/// populated default list.
fn deep_merge(default: Value, overlay: Value) -> Value {
    match (default, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base;
            for (key, value) in overlay {
                match merged.entry(key) {
                    Entry::Occupied(mut slot) => {
                        let base_value = std::mem::replace(slot.get_mut(), Value::Null);
                        *slot.get_mut() = deep_merge(base_value, value);
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(value);
                    }
                }
            }
            Value::Object(merged)
        }
        (default, Value::Null) => default,
        (_, overlay) => overlay,
    }
}

/// Strips `//` line comments, `/* */` block comments, and `#` line comments,
/// leaving comment markers inside string literals untouched. Newlines inside
/// block comments are preserved so parse errors keep meaningful line
/// numbers.
fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|&next| next != '\n') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                while let Some(inner) = chars.next() {
                    if inner == '\n' {
                        out.push('\n');
                    } else if inner == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        break;
                    }
                }
            }
            '#' => {
                while chars.peek().is_some_and(|&next| next != '\n') {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}
