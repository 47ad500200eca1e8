use crate::message::Message;
use regex::Regex;

/// A matching-item tree used to decide whether a handler, post-hook, or
/// queue hook accepts a given message.
pub enum Filter {
    /// `name == value`.
    Value { name: String, value: String },
    /// `name` matches `pattern` as a regular expression.
    Regex { name: String, pattern: Regex },
    /// Accepts a caller-chosen fraction of messages, keyed by a stable
    /// hash of `name`'s value so the same input always falls on the same
    /// side of the bucket boundary.
    RandomBucket { name: String, accept_fraction: f64 },
    /// Matches the message's own `name`, not a param — used to build the
    /// post-hook default filter ("everything except `engine.timer`").
    MessageName(String),
    Not(Box<Filter>),
    All(Vec<Filter>),
    Any(Vec<Filter>),
}

impl Filter {
    pub fn value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Value { name: name.into(), value: value.into() }
    }

    pub fn regex(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Filter::Regex { name: name.into(), pattern: Regex::new(pattern)? })
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Filter::Value { name, value } => message.get_param(name).as_deref() == Some(value.as_str()),
            Filter::Regex { name, pattern } => {
                message.get_param(name).map(|v| pattern.is_match(&v)).unwrap_or(false)
            }
            Filter::RandomBucket { name, accept_fraction } => {
                let key = message.get_param(name).unwrap_or_default();
                let hash = xxhash_rust::xxh64::xxh64(key.as_bytes(), 0);
                let normalized = (hash % 1_000_000) as f64 / 1_000_000.0;
                normalized < *accept_fraction
            }
            Filter::MessageName(name) => message.name() == name,
            Filter::Not(inner) => !inner.matches(message),
            Filter::All(items) => items.iter().all(|f| f.matches(message)),
            Filter::Any(items) => items.iter().any(|f| f.matches(message)),
        }
    }
}

/// The filter post-hooks get when the caller supplies none: everything
/// except `engine.timer`.
pub fn default_post_hook_filter() -> Filter {
    Filter::Not(Box::new(Filter::MessageName("engine.timer".to_string())))
}

impl Filter {
    /// A canonical, order-sensitive string rendering of this filter tree,
    /// used as one field of a global handler's identity descriptor.
    pub fn descriptor(&self) -> String {
        match self {
            Filter::Value { name, value } => format!("value({name}={value})"),
            Filter::Regex { name, pattern } => format!("regex({name}~{pattern})"),
            Filter::RandomBucket { name, accept_fraction } => {
                format!("bucket({name},{accept_fraction})")
            }
            Filter::MessageName(name) => format!("msgname({name})"),
            Filter::Not(inner) => format!("not({})", inner.descriptor()),
            Filter::All(items) => {
                format!("all({})", items.iter().map(Filter::descriptor).collect::<Vec<_>>().join(","))
            }
            Filter::Any(items) => {
                format!("any({})", items.iter().map(Filter::descriptor).collect::<Vec<_>>().join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_with(name: &str, value: &str) -> Message {
        let m = Message::new("test", false, 0);
        m.set_param(name, value);
        m
    }

    #[test]
    fn value_filter_matches_exact_param() {
        let f = Filter::value("dest", "sip");
        assert!(f.matches(&msg_with("dest", "sip")));
        assert!(!f.matches(&msg_with("dest", "pstn")));
    }

    #[test]
    fn regex_filter_matches_pattern() {
        let f = Filter::regex("dest", "^sip:").unwrap();
        assert!(f.matches(&msg_with("dest", "sip:alice")));
        assert!(!f.matches(&msg_with("dest", "pstn:123")));
    }

    #[test]
    fn all_and_any_compose() {
        let and = Filter::All(vec![Filter::value("a", "1"), Filter::value("b", "2")]);
        let m = Message::new("t", false, 0);
        m.set_param("a", "1");
        m.set_param("b", "2");
        assert!(and.matches(&m));
        m.set_param("b", "3");
        assert!(!and.matches(&m));

        let or = Filter::Any(vec![Filter::value("a", "9"), Filter::value("b", "3")]);
        assert!(or.matches(&m));
    }

    #[test]
    fn default_post_hook_filter_excludes_only_engine_timer() {
        let f = default_post_hook_filter();
        assert!(!f.matches(&Message::new("engine.timer", false, 0)));
        assert!(f.matches(&Message::new("call.execute", false, 0)));
    }

    #[test]
    fn random_bucket_is_deterministic_for_the_same_key() {
        let f = Filter::RandomBucket { name: "id".into(), accept_fraction: 0.5 };
        let m1 = msg_with("id", "caller-1");
        let m2 = msg_with("id", "caller-1");
        assert_eq!(f.matches(&m1), f.matches(&m2));
    }
}
