/// Rejected user input. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("weekly cadence requires a weekday")]
    MissingWeekday,

    #[error("weekday is only valid for weekly cadence")]
    UnexpectedWeekday,

    #[error("invalid time '{0}'; expected HH:MM, HHMM, or h:mm am/pm")]
    InvalidTime(String),

    #[error("unknown weekday '{0}'")]
    InvalidWeekday(String),

    #[error("unknown cadence '{0}'; expected daily or weekly")]
    InvalidCadence(String),

    #[error("unknown severity '{0}'; expected advisory, watch, or warning")]
    InvalidSeverity(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} is too long")]
    TooLong(&'static str),

    #[error("outlook days must be between 3 and 10, got {0}")]
    OutlookDays(u8),

    #[error("no location given and no default location saved")]
    MissingLocation,
}

const MAX_KEY_LEN: usize = 64;

/// Trims an owner or location key and rejects empty or oversized values.
pub(crate) fn normalize_key(raw: &str, field: &'static str) -> Result<String, ValidationError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if value.len() > MAX_KEY_LEN {
        return Err(ValidationError::TooLong(field));
    }
    Ok(value.to_string())
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key__should_trim_values() {
        assert_eq!(normalize_key("  60614 ", "location"), Ok("60614".to_string()));
    }

    #[test]
    fn normalize_key__should_reject_blank_and_long_values() {
        assert_eq!(
            normalize_key("   ", "owner"),
            Err(ValidationError::Empty("owner"))
        );
        assert_eq!(
            normalize_key(&"x".repeat(65), "owner"),
            Err(ValidationError::TooLong("owner"))
        );
    }
}
