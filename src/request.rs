use std::{collections::BTreeMap, ffi::OsString};

use getset::Getters;

use serde::Serialize;

use tokio::io::AsyncWrite;

use crate::connection::FastCGIConnectionID;

const HTTP_HEADER_PREFIX: &str = "http_";

/// CGI/1.1 meta-variables taken from the process environment. `HTTP_*` keys are
/// always taken. Anything else the server exports stays out of the request.
const CGI_META_VARIABLES: &[&str] = &[
    "AUTH_TYPE",
    "DOCUMENT_URI",
    "GATEWAY_INTERFACE",
    "PATH_INFO",
    "PATH_TRANSLATED",
    "QUERY_STRING",
    "REQUEST_METHOD",
    "REQUEST_URI",
    "SCRIPT_NAME",
];

const CGI_META_VARIABLE_PREFIXES: &[&str] = &["HTTP_", "SERVER_", "REMOTE_", "CONTENT_"];

fn is_cgi_meta_variable(key: &str) -> bool {
    CGI_META_VARIABLES.contains(&key)
        || CGI_META_VARIABLE_PREFIXES
            .iter()
            .any(|prefix| key.starts_with(prefix))
}

#[derive(Debug, Clone, Copy, Serialize, Getters)]
#[getset(get = "pub")]
pub struct FastCGIRequestID {
    connection_id: u64,
    request_id: u16,
}

/// Transport-neutral view of an inbound request.
///
/// Built from FastCGI params or the CGI process environment. Parameter names are
/// lower-cased so both transports look the same to templates.
#[derive(Debug, Clone, Default, Serialize, Getters)]
#[getset(get = "pub")]
pub struct RequestMetadata {
    role: Option<&'static str>,
    fastcgi_request_id: Option<FastCGIRequestID>,
    request_uri: Option<String>,
    path: String,
    method: Option<String>,
    query_string: Option<String>,
    http_headers: BTreeMap<String, String>,
    other_params: BTreeMap<String, String>,
}

impl RequestMetadata {
    pub fn from_params<I, K, V>(params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut metadata = Self::default();

        for (key, value) in params {
            let key = key.as_ref().to_ascii_lowercase();
            let value = value.as_ref().to_string();

            if let Some(http_header_key) = key.strip_prefix(HTTP_HEADER_PREFIX) {
                metadata
                    .http_headers
                    .insert(http_header_key.replace('_', "-"), value);
            } else {
                metadata.other_params.insert(key, value);
            }
        }

        metadata.request_uri = metadata.non_empty_param("request_uri");
        metadata.method = metadata.non_empty_param("request_method");
        metadata.query_string = metadata.non_empty_param("query_string");
        metadata.path = metadata.decoded_path();

        metadata
    }

    pub fn from_fastcgi<W: AsyncWrite + Unpin>(
        connection_id: FastCGIConnectionID,
        request: &tokio_fastcgi::Request<W>,
    ) -> Self {
        let role = match request.role {
            tokio_fastcgi::Role::Authorizer => "Authorizer",
            tokio_fastcgi::Role::Filter => "Filter",
            tokio_fastcgi::Role::Responder => "Responder",
        };

        let params: Vec<(&str, &str)> = match request.str_params_iter() {
            Some(iter) => iter
                .map(|v| (v.0, v.1.unwrap_or("[Invalid UTF8]")))
                .collect(),
            None => Vec::new(),
        };

        let mut metadata = Self::from_params(params);
        metadata.role = Some(role);
        metadata.fastcgi_request_id = Some(FastCGIRequestID {
            connection_id: connection_id.0,
            request_id: request.get_request_id(),
        });
        metadata
    }

    /// Reads a CGI/1.1 request from the process environment.
    pub fn from_cgi_environment() -> Self {
        Self::from_cgi_variables(std::env::vars_os())
    }

    /// Header values are client input and may not be UTF-8; those bytes are
    /// replaced rather than rejected.
    fn from_cgi_variables<I>(variables: I) -> Self
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        Self::from_params(variables.into_iter().filter_map(|(key, value)| {
            let key = key.to_string_lossy().into_owned();
            if is_cgi_meta_variable(&key) {
                Some((key, value.to_string_lossy().into_owned()))
            } else {
                None
            }
        }))
    }

    /// The path used for routing: the raw request URI when the transport sent
    /// one, the decoded path otherwise.
    pub fn routing_path(&self) -> &str {
        self.request_uri.as_deref().unwrap_or(&self.path)
    }

    fn non_empty_param(&self, key: &str) -> Option<String> {
        self.other_params
            .get(key)
            .filter(|value| !value.is_empty())
            .cloned()
    }

    fn decoded_path(&self) -> String {
        if let Some(document_uri) = self.non_empty_param("document_uri") {
            return document_uri;
        }

        let script_name = self.non_empty_param("script_name").unwrap_or_default();
        let path_info = self.non_empty_param("path_info").unwrap_or_default();
        let path = format!("{}{}", script_name, path_info);

        if path.is_empty() {
            "/".to_string()
        } else {
            path
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_raw_request_uri() {
        let metadata = RequestMetadata::from_params([
            ("REQUEST_URI", "/blog/a%20b?page=2"),
            ("DOCUMENT_URI", "/blog/a b"),
        ]);

        assert_eq!(metadata.routing_path(), "/blog/a%20b?page=2");
        assert_eq!(metadata.path(), "/blog/a b");
    }

    #[test]
    fn falls_back_to_document_uri() {
        let metadata = RequestMetadata::from_params([("document_uri", "/home")]);

        assert_eq!(metadata.request_uri(), &None);
        assert_eq!(metadata.routing_path(), "/home");
    }

    #[test]
    fn falls_back_to_script_name_and_path_info() {
        let metadata = RequestMetadata::from_params([
            ("SCRIPT_NAME", "/cgi-bin/tmpl.cgi"),
            ("PATH_INFO", "/api/users"),
            ("REQUEST_URI", ""),
        ]);

        assert_eq!(metadata.routing_path(), "/cgi-bin/tmpl.cgi/api/users");
    }

    #[test]
    fn defaults_to_root_path() {
        let metadata = RequestMetadata::from_params(Vec::<(String, String)>::new());

        assert_eq!(metadata.routing_path(), "/");
    }

    #[test]
    fn splits_http_headers_from_other_params() {
        let metadata = RequestMetadata::from_params([
            ("HTTP_USER_AGENT", "curl/8.0"),
            ("HTTP_HOST", "example.com"),
            ("REQUEST_METHOD", "GET"),
            ("QUERY_STRING", "a=1"),
            ("SERVER_PROTOCOL", "HTTP/1.1"),
        ]);

        assert_eq!(metadata.http_headers()["user-agent"], "curl/8.0");
        assert_eq!(metadata.http_headers()["host"], "example.com");
        assert_eq!(metadata.method().as_deref(), Some("GET"));
        assert_eq!(metadata.query_string().as_deref(), Some("a=1"));
        assert_eq!(metadata.other_params()["server_protocol"], "HTTP/1.1");
        assert!(!metadata.other_params().contains_key("http_host"));
        assert_eq!(metadata.role(), &None);
    }

    #[cfg(unix)]
    fn non_utf8(bytes: &[u8]) -> OsString {
        use std::os::unix::ffi::OsStringExt;

        OsString::from_vec(bytes.to_vec())
    }

    #[cfg(unix)]
    #[test]
    fn cgi_variables_tolerate_non_utf8_headers() {
        let metadata = RequestMetadata::from_cgi_variables([
            (OsString::from("REQUEST_URI"), OsString::from("/menu")),
            (OsString::from("HTTP_X_LEGACY"), non_utf8(b"caf\xe9")),
        ]);

        assert_eq!(metadata.routing_path(), "/menu");
        assert_eq!(metadata.http_headers()["x-legacy"], "caf\u{fffd}");
    }

    #[cfg(unix)]
    #[test]
    fn cgi_environment_with_non_utf8_header_does_not_panic() {
        std::env::set_var("HTTP_X_TMPL_CGI_LEGACY", non_utf8(b"caf\xe9"));

        let metadata = RequestMetadata::from_cgi_environment();

        std::env::remove_var("HTTP_X_TMPL_CGI_LEGACY");
        assert_eq!(
            metadata.http_headers()["x-tmpl-cgi-legacy"],
            "caf\u{fffd}"
        );
    }

    #[test]
    fn cgi_variables_keep_only_meta_variables() {
        let metadata = RequestMetadata::from_cgi_variables(
            [
                ("PATH", "/usr/bin"),
                ("TMPL_CGI_CONFIG", "/etc/tmpl-cgi/config.yaml"),
                ("DATABASE_PASSWORD", "hunter2"),
                ("REQUEST_METHOD", "GET"),
                ("SERVER_NAME", "example.com"),
                ("REMOTE_ADDR", "10.0.0.1"),
                ("CONTENT_LENGTH", "0"),
                ("GATEWAY_INTERFACE", "CGI/1.1"),
                ("HTTP_ACCEPT", "text/html"),
            ]
            .map(|(key, value)| (OsString::from(key), OsString::from(value))),
        );

        assert!(!metadata.other_params().contains_key("path"));
        assert!(!metadata.other_params().contains_key("tmpl_cgi_config"));
        assert!(!metadata.other_params().contains_key("database_password"));
        assert_eq!(metadata.method().as_deref(), Some("GET"));
        assert_eq!(metadata.other_params()["server_name"], "example.com");
        assert_eq!(metadata.other_params()["remote_addr"], "10.0.0.1");
        assert_eq!(metadata.other_params()["content_length"], "0");
        assert_eq!(metadata.other_params()["gateway_interface"], "CGI/1.1");
        assert_eq!(metadata.http_headers()["accept"], "text/html");
    }
}
