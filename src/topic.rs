//! Topic name and topic filter checks.
//!
//! Names are what PUBLISH carries and may not contain wildcards. Filters are
//! what SUBSCRIBE and UNSUBSCRIBE carry; `+` must fill a whole level and `#`
//! must be the whole last level.

const SEPARATOR: char = '/';
const SINGLE_LEVEL: char = '+';
const MULTI_LEVEL: char = '#';

/// Checks a topic name used for publishing.
pub fn validate_name(topic: &str) -> Result<(), crate::Error> {
    if topic.is_empty() || topic.contains(['\0', SINGLE_LEVEL, MULTI_LEVEL]) {
        return Err(crate::Error::InvalidTopic);
    }

    Ok(())
}

/// Checks a topic filter used for subscribing.
pub fn validate_filter(filter: &str) -> Result<(), crate::Error> {
    if filter.is_empty() || filter.contains('\0') {
        return Err(crate::Error::InvalidTopic);
    }

    let mut levels = filter.split(SEPARATOR).peekable();

    while let Some(level) = levels.next() {
        let is_last = levels.peek().is_none();

        let valid = match level {
            "#" => is_last,
            "+" => true,
            _ => !level.contains([SINGLE_LEVEL, MULTI_LEVEL]),
        };

        if !valid {
            return Err(crate::Error::InvalidTopic);
        }
    }

    Ok(())
}
