//! Connection reuse strategy.

use crate::http::headers::name;
use crate::http::request::Version;
use crate::http::response::{Entity, ResponseHead};

/// Whether the connection may carry another request after this response.
///
/// A body delimited by closing the connection ends it. Otherwise the
/// response `Connection` header decides (`close` wins over `keep-alive`),
/// falling back to the protocol default: persistent on HTTP/1.1 only.
pub fn keep_alive(response: &ResponseHead) -> bool {
    match response.entity {
        Entity::UntilClose => return false,
        Entity::Chunked if response.version == Version::Http10 => return false,
        _ => {}
    }

    let mut keep_alive = false;
    for token in response.headers.tokens(name::CONNECTION) {
        if token.eq_ignore_ascii_case("close") {
            return false;
        }
        if token.eq_ignore_ascii_case("keep-alive") {
            keep_alive = true;
        }
    }

    keep_alive || response.version == Version::Http11
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::{ResponseBuilder, StatusCode};

    fn head(version: Version, entity: Entity, connection: Option<&str>) -> ResponseHead {
        let mut builder = ResponseBuilder::new(StatusCode::Ok)
            .version(version)
            .entity(entity);
        if let Some(value) = connection {
            builder = builder.header("Connection", value);
        }
        builder.build()
    }

    #[test]
    fn reuse_table() {
        assert!(keep_alive(&head(Version::Http11, Entity::Length(3), None)));
        assert!(keep_alive(&head(Version::Http11, Entity::Chunked, None)));
        assert!(!keep_alive(&head(Version::Http11, Entity::Length(3), Some("close"))));
        assert!(!keep_alive(&head(Version::Http11, Entity::UntilClose, None)));
        assert!(!keep_alive(&head(Version::Http10, Entity::Length(3), None)));
        assert!(keep_alive(&head(Version::Http10, Entity::Length(3), Some("Keep-Alive"))));
        assert!(!keep_alive(&head(Version::Http10, Entity::UntilClose, Some("keep-alive"))));
        assert!(!keep_alive(&head(Version::Http11, Entity::None, Some("keep-alive, close"))));
    }
}
