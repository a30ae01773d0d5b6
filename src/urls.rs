//! URL canonicalization and lookup pattern generation.
//!
//! A URL is reduced to `host/path` patterns which are then hashed and looked
//! up. Canonicalization works on bytes since percent-decoding can produce
//! arbitrary octets.

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;

use crate::{Error, Result};

/// Hosts are looked up with at most this many trailing labels, plus the exact host.
const MAX_HOST_COMPONENTS: usize = 7;

/// Directory prefixes tried below the root, besides the exact path.
const MAX_PATH_PREFIXES: usize = 3;

const MAX_UNESCAPE_DEPTH: usize = 1024;

static PORT_RE: Lazy<regex::bytes::Regex> =
    Lazy::new(|| regex::bytes::Regex::new(r":\d+$").expect("valid port regex"));

static POSSIBLE_IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)((?:0x[0-9a-f]+|[0-9\.])+)$").expect("valid ip regex"));

static TRAILING_SPACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}) ").expect("valid trailing space regex")
});

/// A URL split into the parts pattern generation needs. All parts are unescaped.
#[derive(Debug)]
struct ParsedUrl {
    scheme: String,
    host: Vec<u8>,
    /// Always starts with `/`.
    path: Vec<u8>,
    query: Vec<u8>,
}

fn unhex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn unescape(s: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        if s[i] == b'%' && i + 2 < s.len() {
            if let (Some(hi), Some(lo)) = (unhex(s[i + 1]), unhex(s[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(s[i]);
        i += 1;
    }
    out
}

fn recursive_unescape(s: &[u8]) -> Result<Vec<u8>> {
    let mut current = s.to_vec();
    for _ in 0..MAX_UNESCAPE_DEPTH {
        let next = unescape(&current);
        if next == current {
            return Ok(current);
        }
        current = next;
    }
    Err(Error::InvalidUrl("unescaping is too recursive".to_string()))
}

/// Percent-encode control bytes, non-ASCII bytes, space, `#` and `%`.
fn escape(s: &[u8]) -> String {
    let mut out = String::with_capacity(s.len());
    for &c in s {
        if c <= 0x20 || c >= 0x7f || c == b'#' || c == b'%' {
            out.push_str(&format!("%{:02x}", c));
        } else {
            out.push(c as char);
        }
    }
    out
}

fn split_once(s: &[u8], c: u8) -> (&[u8], &[u8]) {
    match s.iter().position(|&b| b == c) {
        Some(i) => (&s[..i], &s[i + 1..]),
        None => (s, &[]),
    }
}

/// Split off a leading `scheme:` if the input starts with one.
fn split_scheme(s: &[u8]) -> Result<(Option<String>, &[u8])> {
    for (i, &c) in s.iter().enumerate() {
        match c {
            b'a'..=b'z' | b'A'..=b'Z' => {}
            b'0'..=b'9' | b'+' | b'-' | b'.' if i > 0 => {}
            b':' if i == 0 => return Err(Error::InvalidUrl("missing scheme".to_string())),
            b':' => {
                let scheme = String::from_utf8_lossy(&s[..i]).to_ascii_lowercase();
                return Ok((Some(scheme), &s[i + 1..]));
            }
            _ => return Ok((None, s)),
        }
    }
    Ok((None, s))
}

fn parse_url(raw: &str) -> Result<ParsedUrl> {
    let cleaned: Vec<u8> = raw
        .trim()
        .bytes()
        .filter(|&b| b != b'\t' && b != b'\r' && b != b'\n')
        .collect();
    let (without_fragment, _) = split_once(&cleaned, b'#');
    if without_fragment.is_empty() {
        return Err(Error::InvalidUrl(raw.to_string()));
    }
    let unescaped = recursive_unescape(without_fragment)?;

    let (scheme, rest) = split_scheme(&unescaped)?;
    let (rest, query) = split_once(rest, b'?');
    let hostish = match &scheme {
        Some(_) => rest
            .strip_prefix(b"//")
            .ok_or_else(|| Error::InvalidUrl(format!("no authority in {:?}", raw)))?,
        None => rest,
    };
    let (host, path) = split_once(hostish, b'/');
    if host.is_empty() {
        return Err(Error::InvalidUrl(format!("missing hostname in {:?}", raw)));
    }

    let mut full_path = Vec::with_capacity(path.len() + 1);
    full_path.push(b'/');
    full_path.extend_from_slice(path);

    Ok(ParsedUrl {
        scheme: scheme.unwrap_or_else(|| "http".to_string()),
        host: host.to_vec(),
        path: full_path,
        query: query.to_vec(),
    })
}

/// Canonical dotted form of `s` read as an unsigned integer spread over `n` bytes.
///
/// Accepts `0x` hex, leading-zero octal and decimal.
fn canonical_num(s: &str, n: usize) -> Option<String> {
    if n == 0 || n > 4 {
        return None;
    }
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8)
    } else {
        s.parse::<u32>()
    };
    let mut v = parsed.ok()?;
    let mut parts = vec![String::new(); n];
    for part in parts.iter_mut().rev() {
        *part = (v & 0xff).to_string();
        v >>= 8;
    }
    Some(parts.join("."))
}

/// Parse the loose IPv4 forms browsers accept and return dotted-quad text.
///
/// Returns `None` when `host` is not an IPv4 literal.
pub fn parse_ip_address(host: &str) -> Option<String> {
    let mut host = host;
    // Resolvers accept "a.b.c.d junk" when the whole thing fits in 15 chars.
    if host.len() <= 15 {
        if let Some(m) = TRAILING_SPACE_RE.find(host) {
            host = m.as_str().trim();
        }
    }
    if !POSSIBLE_IP_RE.is_match(host) {
        return None;
    }
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() > 4 {
        return None;
    }
    let last = parts.len() - 1;
    let canonical: Option<Vec<String>> = parts
        .iter()
        .enumerate()
        .map(|(i, p)| canonical_num(p, if i == last { 5 - parts.len() } else { 1 }))
        .collect();
    canonical.map(|c| c.join("."))
}

fn host_from_parsed(parsed: &ParsedUrl) -> Result<String> {
    let host = PORT_RE.replace(&parsed.host, &b""[..]);
    let mut host = host.to_ascii_lowercase();

    // Trim leading and trailing dots and collapse runs.
    let mut collapsed = Vec::with_capacity(host.len());
    for &c in &host {
        if c == b'.' && (collapsed.is_empty() || collapsed.last() == Some(&b'.')) {
            continue;
        }
        collapsed.push(c);
    }
    if collapsed.last() == Some(&b'.') {
        collapsed.pop();
    }
    host = collapsed;
    if host.is_empty() {
        return Err(Error::InvalidUrl("empty hostname".to_string()));
    }

    if !host.is_ascii() {
        if let Ok(text) = std::str::from_utf8(&host) {
            if let Ok(url::Host::Domain(ascii)) = url::Host::parse(text) {
                host = ascii.into_bytes();
            }
        }
    }

    if let Ok(text) = std::str::from_utf8(&host) {
        if let Some(ip) = parse_ip_address(text) {
            return Ok(ip);
        }
    }
    Ok(escape(&host))
}

/// Resolve `.` and `..` segments and collapse repeated slashes.
fn clean_path(path: &[u8]) -> Vec<u8> {
    let mut segments: Vec<&[u8]> = Vec::new();
    for segment in path.split(|&c| c == b'/') {
        match segment {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    let mut out = Vec::with_capacity(path.len());
    for segment in &segments {
        out.push(b'/');
        out.extend_from_slice(segment);
    }
    let is_dir = path.ends_with(b"/");
    if out.is_empty() || is_dir {
        out.push(b'/');
    }
    out
}

fn path_from_parsed(parsed: &ParsedUrl) -> String {
    escape(&clean_path(&parsed.path))
}

/// Canonical `scheme://host/path` form. Query and fragment are dropped.
pub fn canonical_url(raw: &str) -> Result<String> {
    let parsed = parse_url(raw)?;
    let host = host_from_parsed(&parsed)?;
    Ok(format!("{}://{}{}", parsed.scheme, host, path_from_parsed(&parsed)))
}

/// Canonical host: no port, lowercase, dots normalized, IDNA, IPv4 literals dotted.
pub fn canonical_host(raw: &str) -> Result<String> {
    host_from_parsed(&parse_url(raw)?)
}

/// Canonical path with `.`/`..` resolved and duplicate slashes collapsed.
pub fn canonical_path(raw: &str) -> Result<String> {
    Ok(path_from_parsed(&parse_url(raw)?))
}

/// Exact host followed by up to six of its suffixes (at least two labels each).
/// IP literals yield only themselves.
pub fn generate_lookup_hosts(raw: &str) -> Result<Vec<String>> {
    let host = canonical_host(raw)?;
    if host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
    {
        return Ok(vec![host]);
    }

    let labels: Vec<&str> = host.split('.').collect();
    let start = labels.len().saturating_sub(MAX_HOST_COMPONENTS).max(1);
    let mut hosts = vec![host.clone()];
    for i in start..labels.len().saturating_sub(1) {
        hosts.push(labels[i..].join("."));
    }
    Ok(hosts)
}

/// Root, up to three directory prefixes, the exact path, and the exact path
/// with its query when one is present.
pub fn generate_lookup_paths(raw: &str) -> Result<Vec<String>> {
    let parsed = parse_url(raw)?;
    let path = path_from_parsed(&parsed);

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let prefixes = components.len().saturating_sub(1).min(MAX_PATH_PREFIXES);

    let mut paths = vec!["/".to_string()];
    for i in 1..=prefixes {
        paths.push(format!("/{}/", components[..i].join("/")));
    }
    if path != "/" {
        paths.push(path.clone());
    }
    if !parsed.query.is_empty() {
        paths.push(format!("{}?{}", path, escape(&parsed.query)));
    }
    Ok(paths)
}

/// Every `host + path` combination to hash for `raw`.
pub fn generate_patterns(raw: &str) -> Result<Vec<String>> {
    let hosts = generate_lookup_hosts(raw)?;
    let paths = generate_lookup_paths(raw)?;
    let mut patterns = Vec::with_capacity(hosts.len() * paths.len());
    for host in &hosts {
        for path in &paths {
            patterns.push(format!("{}{}", host, path));
        }
    }
    Ok(patterns)
}
