use hyper::http::uri::{PathAndQuery, Uri};

/// Joins a relative reference to the directory of `base_path`, dropping `.` and `..` segments
fn merge_path(base_path: &str, reference: &str) -> String {
    let (path, query) = match reference.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (reference, None),
    };
    let dir = base_path.rfind('/').map_or("/", |end| &base_path[..=end]);
    let merged = format!("{dir}{path}");
    let mut segments: Vec<&str> = Vec::new();
    for segment in merged.split('/').skip(1) {
        match segment {
            "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    let mut path_and_query = format!("/{}", segments.join("/"));
    if let Some(query) = query {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }
    path_and_query
}

/// Resolves a `Location` header value against the URI that produced it
pub fn resolve_location(base: &Uri, location: &[u8]) -> Option<Uri> {
    let location = std::str::from_utf8(location).ok()?.trim();
    if location.is_empty() {
        return None;
    }
    if let Ok(uri) = Uri::try_from(location) {
        if uri.scheme().is_some() {
            return Some(uri);
        }
    }
    if location.starts_with("//") {
        return Uri::try_from(format!("{}:{location}", base.scheme_str()?)).ok();
    }
    let path_and_query = if location.starts_with('/') {
        location.to_owned()
    } else {
        merge_path(base.path(), location)
    };
    let mut parts = base.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}
