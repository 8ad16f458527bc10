use hyper::HeaderMap;
use std::net::IpAddr;

fn header_ip(headers: &HeaderMap, name: &str, recursive: bool) -> Option<IpAddr> {
    let values = headers.get_all(name);
    let mut it_values = values.iter();
    let value = if recursive {
        it_values.next()
    } else {
        it_values.next_back()
    }?;
    let mut split = value.to_str().ok()?.split(',');
    let entry = if recursive {
        split.next()
    } else {
        split.next_back()
    }?;
    entry.trim().parse().ok()
}

/// Client address announced by a reverse proxy. Headers are tried in order and the first one
/// holding a parsable address wins. `recursive` picks the original client of a proxy chain
/// (first entry) instead of the closest hop (last entry).
pub fn client_ip(headers: &HeaderMap, header_names: &[String], recursive: bool) -> Option<IpAddr> {
    header_names
        .iter()
        .find_map(|name| header_ip(headers, name, recursive))
}
