//! Expansion of `mapbox://` urls into API urls.

use url::Url;

const SCHEME: &str = "mapbox";

/// Converts a `mapbox://` url into an url of the API at `base`, authorized with the `token`.
///
/// Returns a description of the problem if the url cannot be converted.
pub(crate) fn normalize(url: &str, base: &str, token: Option<&str>) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|err| format!("invalid url {url}: {err}"))?;
    if parsed.scheme() != SCHEME {
        return Err(format!("not a mapbox url: {url}"));
    }

    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return Err(format!("access token is required to load {url}"));
    };

    let path = format!("{}{}", parsed.host_str().unwrap_or_default(), parsed.path());
    let path = path.as_str();
    let query = parsed.query();

    let base = base.trim_end_matches('/');
    let invalid = || format!("invalid mapbox url: {url}");

    let mut normalized = if let Some(style) = path.strip_prefix("styles/") {
        let (user, style) = split_user(style).ok_or_else(invalid)?;
        format!("{base}/styles/v1/{user}/{style}")
    } else if let Some(tile) = path.strip_prefix("tiles/") {
        if tile.is_empty() {
            return Err(invalid());
        }
        format!("{base}/v4/{tile}")
    } else if let Some(font) = path.strip_prefix("fonts/") {
        let (user, rest) = split_user(font).ok_or_else(invalid)?;
        format!("{base}/fonts/v1/{user}/{rest}")
    } else if let Some(sprite) = path.strip_prefix("sprites/") {
        let (user, rest) = split_user(sprite).ok_or_else(invalid)?;
        let suffix_start = rest.find(['@', '.']).unwrap_or(rest.len());
        let (style, suffix) = rest.split_at(suffix_start);
        if style.is_empty() {
            return Err(invalid());
        }
        format!("{base}/styles/v1/{user}/{style}/sprite{suffix}")
    } else {
        if path.is_empty() || path.contains('/') {
            return Err(invalid());
        }
        format!("{base}/v4/{path}.json?secure")
    };

    if let Some(query) = query.filter(|query| !query.is_empty()) {
        push_param(&mut normalized, query);
    }
    push_param(&mut normalized, &format!("access_token={token}"));

    Ok(normalized)
}

fn split_user(path: &str) -> Option<(&str, &str)> {
    let (user, rest) = path.split_once('/')?;
    if user.is_empty() || rest.is_empty() {
        None
    } else {
        Some((user, rest))
    }
}

fn push_param(url: &mut String, param: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(param);
}
