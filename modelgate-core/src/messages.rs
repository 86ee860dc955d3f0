//! Conversation-history discovery and context clipping.
//!
//! Request bodies carry their message list in one of a handful of
//! conventional locations. The longest structurally valid candidate is
//! authoritative; malformed candidates count as absent rather than failing
//! the request.

use serde_json::Value;

const CONTAINER_KEYS: &[&str] = &["metadata", "chat", "conversation", "data"];
const MESSAGE_KEYS: &[&str] = &[
    "messages",
    "history",
    "chat_history",
    "conversation_messages",
    "all_messages",
];

/// Valid = an array whose every element is an object with a `role` member.
fn is_message_list(value: &Value) -> bool {
    value.as_array().is_some_and(|items| {
        items
            .iter()
            .all(|item| item.as_object().is_some_and(|obj| obj.contains_key("role")))
    })
}

/// Locates the authoritative message list: the longest valid candidate
/// across the conventional locations, first found winning ties.
fn find_message_location(body: &Value) -> Option<(Option<&'static str>, &'static str)> {
    let mut best: Option<(Option<&'static str>, &'static str, usize)> = None;

    let mut consider = |container: Option<&'static str>, key: &'static str, value: &Value| {
        if !is_message_list(value) {
            return;
        }
        let len = value.as_array().map_or(0, Vec::len);
        if best.is_none_or(|(_, _, best_len)| len > best_len) {
            best = Some((container, key, len));
        }
    };

    for key in MESSAGE_KEYS {
        if let Some(value) = body.get(key) {
            consider(None, key, value);
        }
    }
    for container in CONTAINER_KEYS {
        if let Some(inner) = body.get(container) {
            for key in MESSAGE_KEYS {
                if let Some(value) = inner.get(key) {
                    consider(Some(container), key, value);
                }
            }
        }
    }

    best.map(|(container, key, _)| (container, key))
}

/// Clips the authoritative message list in place: the system message (if
/// any) is retained, followed by the last `clip` non-system messages in
/// their original order. Returns whether a list was found and rewritten.
pub(crate) fn clip_messages(body: &mut Value, clip: usize) -> bool {
    if clip == 0 {
        return false;
    }
    let Some((container, key)) = find_message_location(body) else {
        return false;
    };
    let slot = match container {
        None => body.get_mut(key),
        Some(container) => body.get_mut(container).and_then(|inner| inner.get_mut(key)),
    };
    let Some(slot) = slot else {
        return false;
    };
    let Some(items) = slot.as_array() else {
        return false;
    };

    let is_system =
        |message: &Value| message.get("role").and_then(Value::as_str) == Some("system");
    let system = items.iter().find(|message| is_system(message)).cloned();
    let chat: Vec<Value> = items
        .iter()
        .filter(|message| !is_system(message))
        .cloned()
        .collect();

    let tail_start = chat.len().saturating_sub(clip);
    let mut clipped = Vec::with_capacity(clip + 1);
    if let Some(system) = system {
        clipped.push(system);
    }
    clipped.extend(chat.into_iter().skip(tail_start));
    *slot = Value::Array(clipped);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(role: &str, content: &str) -> Value {
        json!({"role": role, "content": content})
    }

    #[test]
    fn test_clip_keeps_system_and_tail() {
        let mut body = json!({
            "messages": [
                message("system", "s"),
                message("user", "m1"),
                message("assistant", "m2"),
                message("user", "m3"),
                message("assistant", "m4"),
                message("user", "m5"),
            ]
        });
        assert!(clip_messages(&mut body, 2));
        let clipped = body["messages"].as_array().unwrap();
        assert_eq!(clipped.len(), 3);
        assert_eq!(clipped[0]["role"], "system");
        assert_eq!(clipped[1]["content"], "m4");
        assert_eq!(clipped[2]["content"], "m5");
    }

    #[test]
    fn test_clip_without_system_message() {
        let mut body = json!({
            "messages": [message("user", "m1"), message("assistant", "m2"), message("user", "m3")]
        });
        assert!(clip_messages(&mut body, 1));
        let clipped = body["messages"].as_array().unwrap();
        assert_eq!(clipped.len(), 1);
        assert_eq!(clipped[0]["content"], "m3");
    }

    #[test]
    fn test_clip_larger_than_history_keeps_everything() {
        let mut body = json!({"messages": [message("user", "m1"), message("user", "m2")]});
        assert!(clip_messages(&mut body, 10));
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_clip_zero_is_a_no_op() {
        let mut body = json!({"messages": [message("user", "m1")]});
        assert!(!clip_messages(&mut body, 0));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_longest_candidate_wins() {
        let mut body = json!({
            "messages": [message("user", "short")],
            "chat": {
                "history": [
                    message("user", "m1"),
                    message("user", "m2"),
                    message("user", "m3"),
                ]
            }
        });
        assert!(clip_messages(&mut body, 1));
        // The longer nested list is authoritative and rewritten in place.
        assert_eq!(body["chat"]["history"].as_array().unwrap().len(), 1);
        assert_eq!(body["chat"]["history"][0]["content"], "m3");
        assert_eq!(
            body["messages"].as_array().unwrap().len(),
            1,
            "the shorter candidate is untouched"
        );
    }

    #[test]
    fn test_malformed_candidates_are_ignored() {
        let mut body = json!({
            // Longer but structurally invalid: one element has no role.
            "history": [message("user", "m1"), {"content": "no role"}, message("user", "m2")],
            "messages": [message("user", "m1"), message("user", "m2")]
        });
        assert!(clip_messages(&mut body, 1));
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(
            body["history"].as_array().unwrap().len(),
            3,
            "invalid candidate is left alone"
        );
    }

    #[test]
    fn test_no_valid_list_degrades_gracefully() {
        let mut body = json!({"messages": "not a list", "model": "m"});
        assert!(!clip_messages(&mut body, 3));
    }

    #[test]
    fn test_multiple_system_messages_keep_first() {
        let mut body = json!({
            "messages": [
                message("system", "first"),
                message("user", "m1"),
                message("system", "second"),
                message("user", "m2"),
            ]
        });
        assert!(clip_messages(&mut body, 1));
        let clipped = body["messages"].as_array().unwrap();
        assert_eq!(clipped.len(), 2);
        assert_eq!(clipped[0]["content"], "first");
        assert_eq!(clipped[1]["content"], "m2");
    }
}
