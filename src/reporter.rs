use std::fmt::Write;

use http::{header::CONTENT_TYPE, StatusCode};

use log::warn;

use minijinja::{context, Environment};

use serde::Serialize;

use crate::{
    response::{cgi, ResponseCapture},
    templates::install_html_formatter,
};

pub const DEBUG_ENVIRONMENT_VARIABLE: &str = "TMPL_CGI_DEBUG";

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const DEBUG_TEMPLATE_NAME: &str = "debug-error.html";

const DEBUG_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Runtime Error - Debug Mode</title>
    <style>
        body { font-family: monospace; margin: 20px; background-color: #f5f5f5; }
        .error-container { background-color: white; padding: 20px; border-left: 5px solid #d32f2f; }
        .error-title { color: #d32f2f; font-size: 24px; margin-bottom: 20px; }
        .error-section { margin-bottom: 20px; }
        .error-label { font-weight: bold; color: #333; }
        .error-value { background-color: #f8f8f8; padding: 10px; border: 1px solid #ddd; white-space: pre-wrap; }
        .warning { background-color: #fff3cd; border: 1px solid #ffeaa7; padding: 10px; margin-bottom: 20px; }
    </style>
</head>
<body>
    <div class="warning">
        <strong>Debug Mode Enabled:</strong> These error details are shown because debug mode is on
        (the --debug flag, or TMPL_CGI_DEBUG set to true, yes or 1).
        Do not run with debug mode in production: unset TMPL_CGI_DEBUG or set it to false.
    </div>
    <div class="error-container">
        <div class="error-title">Runtime Error</div>
{%- for diagnostic in diagnostics %}
        <div class="error-section">
            <div class="error-label">{{ diagnostic.label }}:</div>
            <div class="error-value">{{ diagnostic.value }}</div>
        </div>
{%- endfor %}
    </div>
</body>
</html>
"#;

const PRODUCTION_ERROR_PAGE: &str = r#"<!DOCTYPE HTML PUBLIC "-//IETF//DTD HTML 2.0//EN">
<html><head>
<title>500 Server Error</title>
</head><body>
<h1>Server Error</h1>
<p>The server encountered an error processing this request.</p>
</body></html>"#;

/// Whether error responses may expose diagnostic detail.
///
/// Resolved once at startup and handed to the [`ErrorReporter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugMode {
    explicit: bool,
    environment: bool,
}

impl DebugMode {
    pub fn new(explicit: bool, environment_value: Option<&str>) -> Self {
        Self {
            explicit,
            environment: environment_value.map_or(false, is_truthy),
        }
    }

    pub fn from_environment(explicit: bool) -> Self {
        Self::new(
            explicit,
            std::env::var(DEBUG_ENVIRONMENT_VARIABLE).ok().as_deref(),
        )
    }

    pub fn enabled(&self) -> bool {
        self.explicit || self.environment
    }
}

fn is_truthy(value: &str) -> bool {
    let value = value.to_ascii_lowercase();
    value == "true" || value == "yes" || value == "1"
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    label: String,
    value: String,
}

/// Labeled values shown on the debug error page, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push(Diagnostic {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }
}

#[derive(Debug, Clone)]
pub struct ErrorReporter {
    debug_mode: DebugMode,
    debug_template: &'static str,
}

impl ErrorReporter {
    pub fn new(debug_mode: DebugMode) -> Self {
        Self {
            debug_mode,
            debug_template: DEBUG_TEMPLATE,
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_mode.enabled()
    }

    /// Builds the 500 response for a failed request. Detailed in debug mode,
    /// generic otherwise.
    pub fn report(&self, diagnostics: &Diagnostics) -> ResponseCapture {
        if self.debug_enabled() {
            self.render_debug(diagnostics)
        } else {
            let mut capture = error_capture();
            capture.write_bytes(PRODUCTION_ERROR_PAGE.as_bytes());
            capture
        }
    }

    /// CGI-framed debug report for failures that happen before any response
    /// sink exists.
    pub fn debug_report_as_cgi(diagnostics: &Diagnostics) -> Vec<u8> {
        let reporter = Self::new(DebugMode::new(true, None));
        cgi::frame(&reporter.render_debug(diagnostics))
    }

    fn render_debug(&self, diagnostics: &Diagnostics) -> ResponseCapture {
        let mut capture = error_capture();

        match self.render_debug_page(diagnostics) {
            Ok(page) => {
                capture.write_bytes(page.as_bytes());
            }
            Err(err) => {
                warn!("debug error page render failed: {}", err);
                capture.write_bytes(plain_text_report(&err, diagnostics).as_bytes());
            }
        }

        capture
    }

    fn render_debug_page(&self, diagnostics: &Diagnostics) -> Result<String, minijinja::Error> {
        let mut environment = Environment::new();
        install_html_formatter(&mut environment);
        environment.add_template(DEBUG_TEMPLATE_NAME, self.debug_template)?;
        environment
            .get_template(DEBUG_TEMPLATE_NAME)?
            .render(context! { diagnostics => diagnostics.entries() })
    }
}

fn error_capture() -> ResponseCapture {
    let mut capture = ResponseCapture::new();
    capture.set_header(CONTENT_TYPE, HTML_CONTENT_TYPE);
    capture.set_status(StatusCode::INTERNAL_SERVER_ERROR);
    capture
}

fn plain_text_report(err: &minijinja::Error, diagnostics: &Diagnostics) -> String {
    let mut report = String::new();
    // writing to a String cannot fail
    let _ = write!(report, "Debug template error: {}\n\nMessages:\n", err);
    for diagnostic in diagnostics.entries() {
        let _ = writeln!(report, "{}: {}", diagnostic.label, diagnostic.value);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_diagnostics() -> Diagnostics {
        Diagnostics::new()
            .with("Template Name", "page.html")
            .with("Request URI", "/x")
            .with("Error", "field not found")
    }

    fn body(capture: &ResponseCapture) -> String {
        String::from_utf8(capture.body().to_vec()).unwrap()
    }

    #[test]
    fn explicit_flag_wins_over_environment() {
        for value in [None, Some(""), Some("false"), Some("no"), Some("0"), Some("random")] {
            assert!(DebugMode::new(true, value).enabled(), "{:?}", value);
        }
    }

    #[test]
    fn truthy_environment_values_enable_debug() {
        for value in ["true", "yes", "1", "TRUE", "YES", "True", "yEs"] {
            assert!(DebugMode::new(false, Some(value)).enabled(), "{}", value);
        }
    }

    #[test]
    fn other_environment_values_do_not_enable_debug() {
        for value in ["false", "no", "0", "", "random", " true", "on"] {
            assert!(!DebugMode::new(false, Some(value)).enabled(), "{}", value);
        }
        assert!(!DebugMode::new(false, None).enabled());
        assert!(!DebugMode::default().enabled());
    }

    #[test]
    fn debug_report_shows_every_diagnostic() {
        let reporter = ErrorReporter::new(DebugMode::new(true, None));

        let capture = reporter.report(&sample_diagnostics());
        let body = body(&capture);

        assert_eq!(capture.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(capture.content_type(), Some(HTML_CONTENT_TYPE));
        assert!(body.contains("Debug Mode Enabled"));
        assert!(body.contains("Template Name:"));
        assert!(body.contains("page.html"));
        assert!(body.contains("/x"));
        assert!(body.contains("field not found"));
        assert!(body.find("Template Name").unwrap() < body.find("Request URI").unwrap());
    }

    #[test]
    fn debug_report_escapes_values() {
        let reporter = ErrorReporter::new(DebugMode::new(true, None));

        let capture =
            reporter.report(&Diagnostics::new().with("Error", "<script>alert(1)</script>"));
        let body = body(&capture);

        assert!(!body.contains("<script>"));
        assert!(body.contains("&lt;script&gt;"));
    }

    #[test]
    fn production_report_hides_diagnostics() {
        let reporter = ErrorReporter::new(DebugMode::new(false, Some("no")));

        let capture = reporter.report(&sample_diagnostics());
        let body = body(&capture);

        assert_eq!(capture.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(capture.content_type(), Some(HTML_CONTENT_TYPE));
        assert!(body.contains("<title>500 Server Error</title>"));
        assert!(body.contains("Server Error"));
        assert!(!body.contains("field not found"));
        assert!(!body.contains("page.html"));
    }

    #[test]
    fn broken_debug_template_falls_back_to_plain_text() {
        let reporter = ErrorReporter {
            debug_mode: DebugMode::new(true, None),
            debug_template: "{% for diagnostic in %}",
        };

        let capture = reporter.report(&sample_diagnostics());
        let body = body(&capture);

        assert_eq!(capture.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(capture.content_type(), Some(HTML_CONTENT_TYPE));
        assert!(body.starts_with("Debug template error: "));
        assert!(body.contains("Template Name: page.html\n"));
        assert!(body.contains("Request URI: /x\n"));
        assert!(body.contains("Error: field not found\n"));
    }

    #[test]
    fn duplicate_labels_are_kept() {
        let reporter = ErrorReporter::new(DebugMode::new(true, None));

        let capture = reporter.report(
            &Diagnostics::new()
                .with("Error", "first")
                .with("Error", "second"),
        );
        let body = body(&capture);

        assert!(body.find("first").unwrap() < body.find("second").unwrap());
    }

    #[test]
    fn cgi_debug_report_is_framed_html() {
        let framed = ErrorReporter::debug_report_as_cgi(
            &Diagnostics::new()
                .with("Result", "Failed to start server")
                .with("Stage", "Creating CGI server")
                .with("Error", "boom"),
        );
        let framed = String::from_utf8(framed).unwrap();

        assert!(framed
            .starts_with("Content-Type: text/html; charset=utf-8\r\n\r\n<!DOCTYPE html>"));
        assert!(framed.contains("Creating CGI server"));
        assert!(framed.contains("boom"));
    }
}
