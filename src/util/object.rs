use crate::model::error::Error;

pub const URL_SCHEME: &str = "tardigrade://";

/// Bucket and folder named by a `tardigrade://bucket/folder` backend URL.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UrlTarget {
    pub bucket: Option<String>,
    pub folder: Option<String>,
}

pub fn parse_backend_url(url: &str) -> Result<UrlTarget, Error> {
    let rest = url
        .strip_prefix(URL_SCHEME)
        .ok_or_else(|| Error::Configuration(format!("failed to parse backend url: {}", url)))?;

    let rest = rest.trim_matches('/');
    let (bucket, folder) = match rest.split_once('/') {
        Some((bucket, folder)) => (bucket, folder),
        None => (rest, ""),
    };

    Ok(UrlTarget {
        bucket: non_empty(bucket),
        folder: non_empty(folder),
    })
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
