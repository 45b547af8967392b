use url::Url;

use crate::ReadaheadResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

/// Resolves `new` against `current`.
///
/// The query of `current` (the manifest URL, the URL it redirected to, or an
/// enclosing `BaseURL`) is carried over unless `new` brings its own:
///
/// - `https://example.com/manifest.mpd?auth=secret` + `/video42.mp4` =>
///   `https://example.com/video42.mp4?auth=secret`
/// - `https://example.com/manifest.mpd?auth=old` + `/video42.mp4?auth=new` =>
///   `https://example.com/video42.mp4?auth=new`
pub(crate) fn merge_baseurls(current: &Url, new: &str) -> ReadaheadResult<Url> {
    if is_absolute_url(new) {
        return Ok(Url::parse(new)?);
    }

    let mut merged = current.join(new)?;
    if merged.query().is_none() {
        merged.set_query(current.query());
    }
    Ok(merged)
}

/// Applies the first `BaseURL` of an element, if any.
pub(crate) fn nested_base_url(current: &Url, base_urls: &[dash_mpd::BaseURL]) -> ReadaheadResult<Url> {
    match base_urls.first() {
        Some(base_url) => merge_baseurls(current, &base_url.base),
        None => Ok(current.clone()),
    }
}
