//! JavaScript snippet plumbing for page evaluation.
//!
//! Every snippet this runtime injects is an IIFE returning a JSON-friendly
//! value, and every dynamic string is routed through [`js_string`] before it
//! lands inside a script. Nothing here knows about any particular site.

/// Escape a string for safe injection into a JavaScript string literal.
///
/// Escapes everything that could break out of a JS string context:
/// backslashes, all three quote characters, newlines, carriage returns, and
/// tabs. Null bytes are stripped, and angle brackets are hex-escaped so a
/// reflected value can never close a script tag.
pub fn js_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\'' => result.push_str("\\'"),
            '"' => result.push_str("\\\""),
            '`' => result.push_str("\\`"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            '\0' => {}
            '<' => result.push_str("\\x3c"),
            '>' => result.push_str("\\x3e"),
            _ => result.push(ch),
        }
    }
    result
}

/// Render a slice of strings as a JS array literal of single-quoted,
/// sanitized string literals: `['a', 'b']`.
pub fn js_string_array<S: AsRef<str>>(items: &[S]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|s| format!("'{}'", js_string(s.as_ref())))
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// Name of the page-side binding that CDP installs for DOM and visibility
/// signals. Scripts call it with a short payload tag.
pub const SIGNAL_BINDING: &str = "__courierSignal";

/// Payload tag for a coalesced DOM mutation batch.
pub const SIGNAL_MUTATION: &str = "mutation";

/// Payload tag for the page becoming the foreground tab.
pub const SIGNAL_VISIBLE: &str = "visible";

/// Payload tag for the page leaving the foreground.
pub const SIGNAL_HIDDEN: &str = "hidden";

/// Script installing the page-side observers that feed [`SIGNAL_BINDING`].
///
/// Idempotent per document: a guard flag makes re-evaluation after soft
/// navigations a no-op, while a real navigation wipes the flag and the next
/// install starts fresh. Mutation signals are coalesced page-side so a
/// streaming reply does not flood the binding.
pub fn observer_install() -> String {
    format!(
        r#"(() => {{
            if (window.__courierObserved) {{
                return {{ success: true, fresh: false }};
            }}
            const signal = (tag) => {{
                if (window.{binding}) {{ window.{binding}(tag); }}
            }};
            let pending = false;
            const observer = new MutationObserver(() => {{
                if (pending) return;
                pending = true;
                setTimeout(() => {{
                    pending = false;
                    signal('{mutation}');
                }}, 250);
            }});
            observer.observe(document.documentElement || document, {{
                childList: true,
                subtree: true,
                characterData: true,
                attributes: true,
            }});
            document.addEventListener('visibilitychange', () => {{
                signal(document.visibilityState === 'visible' ? '{visible}' : '{hidden}');
            }});
            window.__courierObserved = true;
            signal(document.visibilityState === 'visible' ? '{visible}' : '{hidden}');
            return {{ success: true, fresh: true }};
        }})()"#,
        binding = SIGNAL_BINDING,
        mutation = SIGNAL_MUTATION,
        visible = SIGNAL_VISIBLE,
        hidden = SIGNAL_HIDDEN,
    )
}

/// Script queueing an alert dialog with the given text.
///
/// The alert is deferred through `setTimeout` so the evaluation returns
/// before the (synchronous, user-dismissed) dialog opens.
pub fn alert(message: &str) -> String {
    format!(
        r#"(() => {{ setTimeout(() => alert('{}'), 0); return {{ success: true }}; }})()"#,
        js_string(message)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_basic() {
        assert_eq!(js_string("hello"), "hello");
        assert_eq!(js_string("it's"), "it\\'s");
        assert_eq!(js_string("a\"b"), "a\\\"b");
        assert_eq!(js_string("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn test_js_string_blocks_script_breakout() {
        let malicious = r#"</script><script>alert(1)</script>"#;
        let sanitized = js_string(malicious);
        assert!(!sanitized.contains("</script>"));
        assert!(sanitized.contains("\\x3c/script\\x3e"));
    }

    #[test]
    fn test_js_string_strips_null_bytes() {
        assert_eq!(js_string("abc\0def"), "abcdef");
    }

    #[test]
    fn test_js_string_array() {
        let items = vec!["plain".to_string(), "it's".to_string()];
        assert_eq!(js_string_array(&items), r"['plain', 'it\'s']");
        let empty: [&str; 0] = [];
        assert_eq!(js_string_array(&empty), "[]");
    }

    #[test]
    fn test_observer_install_is_guarded() {
        let script = observer_install();
        assert!(script.contains("window.__courierObserved"));
        assert!(script.contains(SIGNAL_BINDING));
        assert!(script.contains("MutationObserver"));
        assert!(script.contains("visibilitychange"));
    }

    #[test]
    fn test_alert_sanitizes_message() {
        let script = alert("it's done");
        assert!(script.contains(r"alert('it\'s done')"));
    }
}
