//! Builders for the server's own URIs.
//!
//! Every URI handed to a client carries the route version it arrived on and
//! the device identifier so follow-up requests land on the same surface.

use url::form_urlencoded;

/// Route version and device identifier of the request being answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriScope {
    pub version: String,
    pub device_id: String,
}

impl UriScope {
    pub fn new(version: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            device_id: device_id.into(),
        }
    }

    pub fn content_data(&self, source_id: &str, content_id: &str) -> String {
        self.format(
            "content_data",
            &[("applicationId", source_id), ("contentId", content_id)],
        )
    }

    pub fn content_metadata(&self, source_id: &str, content_id: &str) -> String {
        self.format(
            "content_metadata",
            &[("applicationId", source_id), ("contentId", content_id)],
        )
    }

    pub fn application_icon(&self, icon_ref: &str) -> String {
        self.format("application_icon", &[("iconName", icon_ref)])
    }

    pub fn resource(&self, uri: &str) -> String {
        self.format("resource", &[("uri", uri)])
    }

    pub fn license(&self, name: &str) -> String {
        self.format("license", &[("name", name)])
    }

    /// Thumbnails are stored as content references; map one to a data URI.
    pub fn thumbnail(&self, source_id: &str, thumbnail_ref: &str) -> String {
        self.content_data(source_id, content_id_from_ref(thumbnail_ref))
    }

    fn format(&self, route: &str, params: &[(&str, &str)]) -> String {
        format_query_uri(&format!("/{}/{}", self.version, route), &self.device_id, params)
    }
}

/// `path?deviceUUID=...&k=v...` with form encoding.
pub fn format_query_uri(path: &str, device_id: &str, params: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    serializer.append_pair("deviceUUID", device_id);
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    format!("{}?{}", path, serializer.finish())
}

/// Last path segment of an `ekn://` style reference, which is the content id.
pub fn content_id_from_ref(reference: &str) -> &str {
    reference
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(reference)
}
