//! RFC 3339 helpers shared by the persisted rows and the JSON API.

use serde::Serializer;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub(crate) fn format(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

pub(crate) fn parse(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339)
}

pub(crate) fn serialize<S: Serializer>(at: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(*at))
}

pub(crate) mod option {
    use super::*;

    pub(crate) fn serialize<S: Serializer>(
        at: &Option<OffsetDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => serializer.serialize_some(&format(*at)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn format__should_render_rfc3339() {
        assert_eq!(format(datetime!(2024-01-16 13:30 UTC)), "2024-01-16T13:30:00Z");
    }

    #[test]
    fn parse__should_accept_offsets() {
        let parsed = parse("2024-01-16T07:30:00-06:00").expect("parse");
        assert_eq!(parsed, datetime!(2024-01-16 13:30 UTC));
    }
}
