use prometheus::{Encoder, TextEncoder};

use crate::metrics::{self, REGISTRY};

/// Render every registered metric in the Prometheus text exposition format.
///
/// The HTTP surface lives outside this crate; whatever serves `/metrics`
/// returns this body with [`content_type`].
pub fn gather_text() -> prometheus::Result<String> {
    metrics::init();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Content type of the [`gather_text`] body.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}
