//! Caller-visible message templates with named placeholders.
//!
//! This is deliberately a fixed-placeholder substitution over an enumerated
//! name set, not a template engine: unknown `{...}` sequences pass through
//! verbatim and are never evaluated.

use std::collections::HashMap;

/// Placeholder names the engine ever substitutes. Each message kind uses a
/// subset of these.
pub(crate) const RECOGNIZED_PLACEHOLDERS: &[&str] =
    &["u_tier", "m_tier", "u_group", "m_group", "model_id", "reason"];

/// Message keys with a built-in default text.
pub(crate) const MESSAGE_KEYS: &[&str] = &[
    "whitelist_deny",
    "tier_mismatch",
    "user_deny_model",
    "model_wl_deny",
    "model_bl_deny",
    "rate_limit_deny",
    "group_deny",
];

/// Built-in default text for a recognized message key.
pub(crate) fn builtin_message(key: &str) -> Option<&'static str> {
    let message = match key {
        "whitelist_deny" => "Access Denied: Not in whitelist.",
        "tier_mismatch" => "Tier Mismatch. User Tier {u_tier} cannot access Model Tier {m_tier}",
        "user_deny_model" => "Tier {u_tier} users cannot use model {model_id}",
        "model_wl_deny" => "Access Denied to Tier {m_tier} Model (Whitelist)",
        "model_bl_deny" => "Access Denied to Tier {m_tier} Model (Blacklist)",
        "rate_limit_deny" => "Rate Limit Exceeded: {reason}",
        "group_deny" => "Access Denied: user group {u_group} has no permission for model group {m_group}",
        _ => return None,
    };
    Some(message)
}

/// Looks up a message template: configured text first, built-in default
/// otherwise. A key unknown to both sides degrades to a generic denial
/// rather than an internal error.
pub(crate) fn lookup<'a>(strings: &'a HashMap<String, String>, key: &str) -> &'a str {
    strings
        .get(key)
        .map(String::as_str)
        .or_else(|| builtin_message(key))
        .unwrap_or("Access Denied")
}

/// Substitutes `{name}` placeholders from `args`; anything unrecognized
/// (unknown names, stray braces) is preserved as written.
pub(crate) fn render(template: &str, args: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                let value = if RECOGNIZED_PLACEHOLDERS.contains(&name) {
                    args.iter()
                        .find(|(candidate, _)| *candidate == name)
                        .map(|(_, value)| *value)
                } else {
                    None
                };
                if let Some(value) = value {
                    out.push_str(value);
                } else {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unmatched brace: literal.
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let rendered = render(
            "Tier {u_tier} cannot access Tier {m_tier}",
            &[("u_tier", "1"), ("m_tier", "3")],
        );
        assert_eq!(rendered, "Tier 1 cannot access Tier 3");
    }

    #[test]
    fn test_render_preserves_unknown_placeholders() {
        let rendered = render("hello {nobody} and {reason}", &[("reason", "RPM")]);
        assert_eq!(rendered, "hello {nobody} and RPM");
    }

    #[test]
    fn test_render_preserves_unmatched_brace() {
        let rendered = render("left { open", &[("reason", "x")]);
        assert_eq!(rendered, "left { open");
    }

    #[test]
    fn test_builtin_templates_use_only_recognized_placeholders() {
        for key in MESSAGE_KEYS {
            let template = builtin_message(key).unwrap();
            let mut rest = template;
            while let Some(start) = rest.find('{') {
                let after = &rest[start + 1..];
                let end = after.find('}').unwrap();
                let name = &after[..end];
                assert!(
                    RECOGNIZED_PLACEHOLDERS.contains(&name),
                    "placeholder `{name}` in `{key}` is not recognized"
                );
                rest = &after[end + 1..];
            }
        }
    }

    #[test]
    fn test_lookup_prefers_configured_text() {
        let mut strings = HashMap::new();
        strings.insert("whitelist_deny".to_string(), "custom text".to_string());
        assert_eq!(lookup(&strings, "whitelist_deny"), "custom text");
        assert_eq!(
            lookup(&strings, "rate_limit_deny"),
            "Rate Limit Exceeded: {reason}"
        );
        assert_eq!(lookup(&strings, "not_a_key"), "Access Denied");
    }
}
