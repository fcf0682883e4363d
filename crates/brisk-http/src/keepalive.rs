//! Keep-alive policy.
//!
//! HTTP/1.1 defaults to persistent connections, HTTP/1.0 to closing.
//! An explicit `connection: close` always wins, even alongside a
//! keep-alive token.

use brisk_core::{HeaderTable, HttpVersion};

/// Connection-header intent parsed from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    close: bool,
    keep_alive: bool,
}

impl ConnectionInfo {
    pub fn parse(headers: &HeaderTable) -> Self {
        let mut info = Self { close: false, keep_alive: false };
        if let Some(header) = headers.get("connection") {
            for token in header.value().split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    info.close = true;
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    info.keep_alive = true;
                }
            }
        }
        info
    }

    pub fn should_keep_alive(&self, version: HttpVersion) -> bool {
        if self.close {
            return false;
        }
        match version {
            HttpVersion::Http11 => true,
            HttpVersion::Http10 => self.keep_alive,
        }
    }
}

/// Whether the connection survives this exchange, before the drain
/// flag is considered.
pub fn should_keep_alive(version: HttpVersion, headers: &HeaderTable) -> bool {
    ConnectionInfo::parse(headers).should_keep_alive(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_connection(value: Option<&str>) -> HeaderTable {
        let mut headers = HeaderTable::empty();
        if let Some(value) = value {
            headers.append("connection", value);
        }
        headers
    }

    #[test]
    fn http11_defaults_to_keep_alive() {
        let headers = headers_with_connection(None);
        assert!(should_keep_alive(HttpVersion::Http11, &headers));
    }

    #[test]
    fn http10_defaults_to_close() {
        let headers = headers_with_connection(None);
        assert!(!should_keep_alive(HttpVersion::Http10, &headers));
    }

    #[test]
    fn http10_honours_explicit_keep_alive() {
        let headers = headers_with_connection(Some("Keep-Alive"));
        assert!(should_keep_alive(HttpVersion::Http10, &headers));
    }

    #[test]
    fn close_wins_over_keep_alive() {
        let headers = headers_with_connection(Some("keep-alive, close"));
        assert!(!should_keep_alive(HttpVersion::Http11, &headers));
        assert!(!should_keep_alive(HttpVersion::Http10, &headers));
    }

    #[test]
    fn http11_explicit_close() {
        let headers = headers_with_connection(Some("close"));
        assert!(!should_keep_alive(HttpVersion::Http11, &headers));
    }
}
