use crate::response::ResponseCapture;

const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Frames a capture for CGI standard output.
///
/// Only `Content-Type` is emitted. Status and any other headers on the capture
/// are not part of the frame.
pub fn frame(capture: &ResponseCapture) -> Vec<u8> {
    let content_type = capture.content_type().unwrap_or(DEFAULT_CONTENT_TYPE);

    let mut out = Vec::with_capacity(content_type.len() + capture.body().len() + 20);
    out.extend_from_slice(b"Content-Type: ");
    out.extend_from_slice(content_type.as_bytes());
    out.extend_from_slice(b"\r\n");

    // blank line between headers and body
    out.extend_from_slice(b"\r\n");

    out.extend_from_slice(capture.body());
    out
}
