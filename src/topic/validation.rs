//! Topic name and filter checks for the gateway's own subscriptions and
//! command topics.
//!
//! - Topic names (what we publish to) carry no wildcards
//! - `+` must occupy a whole level
//! - `#` must occupy the last level

/// Validate a topic name used for a command publish
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }
    if topic.len() > u16::MAX as usize {
        return Err("topic name exceeds maximum length");
    }
    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }
    if topic.contains(&['+', '#'][..]) {
        return Err("topic name cannot contain wildcards");
    }
    Ok(())
}

/// Validate a subscription filter
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }
    if filter.len() > u16::MAX as usize {
        return Err("topic filter exceeds maximum length");
    }
    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('#') {
            if level != "#" {
                return Err("multi-level wildcard must occupy entire level");
            }
            if levels.peek().is_some() {
                return Err("multi-level wildcard must be last level");
            }
        }
        if level.contains('+') && level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(())
}

/// Check if a topic filter matches a topic name
///
/// `$`-prefixed topics never match a filter starting with a wildcard.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    for filter_level in filter.split('/') {
        if filter_level == "#" {
            return true;
        }
        match topic_levels.next() {
            Some(level) if filter_level == "+" || filter_level == level => {}
            _ => return false,
        }
    }

    topic_levels.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_topic_name() {
        assert!(validate_topic_name("v1/42/update/cancel").is_ok());
        assert!(validate_topic_name("v1/1/2/3/update/request/firmware").is_ok());

        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("v1/+/update/cancel").is_err());
        assert!(validate_topic_name("v1/#").is_err());
    }

    #[test]
    fn test_validate_topic_filter() {
        assert!(validate_topic_filter("v1/+/update/progress").is_ok());
        assert!(validate_topic_filter("v1/+/+/+/status/system").is_ok());
        assert!(validate_topic_filter("v1/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());

        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("v1/dev+/status").is_err());
        assert!(validate_topic_filter("v1/#/status").is_err());
        assert!(validate_topic_filter("v1/status#").is_err());
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches_filter(
            "v1/42/update/progress",
            "v1/+/update/progress"
        ));
        assert!(topic_matches_filter("v1/42/status/system", "v1/#"));
        assert!(topic_matches_filter("v1", "v1/#"));

        // request/ack must not be swallowed by a shorter filter
        assert!(!topic_matches_filter(
            "v1/42/update/request/ack",
            "v1/+/update/request"
        ));
        assert!(!topic_matches_filter(
            "v1/42/update/cancel/ack",
            "v1/+/update/cancel"
        ));
        assert!(!topic_matches_filter("v1/42", "v1/+/status/system"));
        assert!(!topic_matches_filter("$SYS/broker", "+/broker"));
    }
}
