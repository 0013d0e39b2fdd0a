//! Content-type tagging for bus payloads.
//!
//! Coordination messages travel as `application/vnd.silica.coordination+json`
//! with an optional `; compression=gzip` parameter. Worker-to-worker peer
//! payloads use a distinct content type and are opaque to the coordination
//! codec.

use sc_domain::error::Result;

use crate::compression::Compression;

pub const COORDINATION_CONTENT_TYPE: &str = "application/vnd.silica.coordination+json";
pub const PEER_CONTENT_TYPE: &str = "application/vnd.silica.peer+json";

/// Build the coordination content type for the given compression method.
pub fn content_type_for(compression: Compression) -> String {
    match compression.as_param() {
        Some(param) => format!("{COORDINATION_CONTENT_TYPE}; compression={param}"),
        None => COORDINATION_CONTENT_TYPE.to_owned(),
    }
}

/// Whether a content type carries a coordination message.
pub fn is_coordination(content_type: &str) -> bool {
    content_type.starts_with(COORDINATION_CONTENT_TYPE)
}

/// Extract the compression method from a content type's parameters.
///
/// Fails with `InvalidCompression` on an unrecognised `compression=` value.
pub fn compression_param(content_type: &str) -> Result<Compression> {
    for part in content_type.split(';').skip(1) {
        if let Some(value) = part.trim().strip_prefix("compression=") {
            return Compression::from_param(value);
        }
    }
    Ok(Compression::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_content_type_has_no_param() {
        assert_eq!(content_type_for(Compression::None), COORDINATION_CONTENT_TYPE);
        assert_eq!(
            compression_param(COORDINATION_CONTENT_TYPE).unwrap(),
            Compression::None
        );
    }

    #[test]
    fn gzip_content_type_roundtrips() {
        let ct = content_type_for(Compression::Gzip);
        assert_eq!(
            ct,
            "application/vnd.silica.coordination+json; compression=gzip"
        );
        assert_eq!(compression_param(&ct).unwrap(), Compression::Gzip);
    }

    #[test]
    fn unknown_compression_param_is_refused() {
        let err = compression_param(
            "application/vnd.silica.coordination+json; compression=brotli",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidCompression");
    }

    #[test]
    fn peer_payloads_are_not_coordination() {
        assert!(is_coordination(&content_type_for(Compression::Gzip)));
        assert!(!is_coordination(PEER_CONTENT_TYPE));
        assert!(!is_coordination("text/plain"));
    }
}
