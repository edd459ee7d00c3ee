use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use url::Url;

use crate::uris::UriScope;

static EKN_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""ekn://[a-z0-9_./\\-]*/(?P<id>[a-z0-9]+)""#).expect("ekn uri pattern")
});

static RESOURCE_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?P<uri>(?:resource|file)://[A-Za-z0-9/._-]+)""#).expect("resource uri pattern")
});

static LICENSE_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""license://(?P<license>[A-Za-z0-9%/._-]+)""#).expect("license uri pattern")
});

static RELATIVE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?P<relative>\.\.[./A-Za-z0-9-]+)""#).expect("relative ref pattern"));

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"url\(["']?(?P<path>[./A-Za-z0-9-]+)["']?\)"#).expect("css url pattern")
});

/// Quoted `ekn://.../<id>` references become content data URIs of `source_id`.
pub fn rewrite_content_refs<'a>(html: &'a str, scope: &UriScope, source_id: &str) -> Cow<'a, str> {
    EKN_URI.replace_all(html, |caps: &Captures| {
        format!("\"{}\"", scope.content_data(source_id, &caps["id"]))
    })
}

/// Quoted `resource://` and `file://` references become resource route URIs.
pub fn rewrite_resource_refs<'a>(html: &'a str, scope: &UriScope) -> Cow<'a, str> {
    RESOURCE_URI.replace_all(html, |caps: &Captures| {
        format!("\"{}\"", scope.resource(&caps["uri"]))
    })
}

/// Quoted `license://<name>` references become license route URIs.
pub fn rewrite_license_refs<'a>(html: &'a str, scope: &UriScope) -> Cow<'a, str> {
    LICENSE_URI.replace_all(html, |caps: &Captures| {
        format!("\"{}\"", scope.license(&caps["license"]))
    })
}

/// Quoted `../` references are resolved against `base_dir` and served back
/// through the resource route with the license adjuster attached.
pub fn rewrite_relative_refs<'a>(html: &'a str, base_dir: &Path, scope: &UriScope) -> Cow<'a, str> {
    RELATIVE_REF.replace_all(html, |caps: &Captures| {
        match adjusted_resource_uri(base_dir, &caps["relative"], scope) {
            Some(uri) => format!("\"{uri}\""),
            None => caps[0].to_string(),
        }
    })
}

/// Relative `url(...)` references in a stylesheet, resolved like
/// [`rewrite_relative_refs`]. Absolute URLs are left alone.
pub fn rewrite_css_urls<'a>(css: &'a str, base_dir: &Path, scope: &UriScope) -> Cow<'a, str> {
    CSS_URL.replace_all(css, |caps: &Captures| {
        let path = &caps["path"];
        if path.starts_with('/') {
            return caps[0].to_string();
        }
        match adjusted_resource_uri(base_dir, path, scope) {
            Some(uri) => format!("url({uri})"),
            None => caps[0].to_string(),
        }
    })
}

fn adjusted_resource_uri(base_dir: &Path, relative: &str, scope: &UriScope) -> Option<String> {
    let resolved = normalize(&base_dir.join(relative));
    let file_uri = Url::from_file_path(&resolved).ok()?;
    Some(crate::uris::format_query_uri(
        &format!("/{}/resource", scope.version),
        &scope.device_id,
        &[("uri", file_uri.as_str()), ("adjuster", "license")],
    ))
}

/// Lexically fold `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
