//! URL normal form.
//!
//! Every URL stored in or matched against a [`crate::UrlList`] goes
//! through this first. The normal form is `host/path[?query]` with:
//!
//! * the scheme stripped (`http://` and `https://` only),
//! * the host lowercased and its default port dropped,
//! * a bare host gaining a trailing `/` and a non-root path losing one,
//! * query parameters sorted and re-joined with `&`,
//! * the fragment dropped.

pub const MAX_URL_LENGTH: usize = 4096;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NormalizeOutcome {
    Ok,
    /// Input exceeded [`MAX_URL_LENGTH`] and was cut at the limit.
    Truncated,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NormalizeFailed;

/// Normalize a URL, appending the normal form to `out`.
pub fn normalize(url: &[u8], out: &mut Vec<u8>) -> Result<NormalizeOutcome, NormalizeFailed> {
    let mut rest = url;
    let mut https = false;

    if let Some(stripped) = strip_scheme(rest, b"http://") {
        rest = stripped;
    } else if let Some(stripped) = strip_scheme(rest, b"https://") {
        rest = stripped;
        https = true;
    } else if rest.windows(3).any(|w| w == b"://") {
        return Err(NormalizeFailed);
    }

    let host_end = rest
        .iter()
        .position(|&b| b == b'/' || b == b'?' || b == b'#')
        .unwrap_or(rest.len());
    let (host, mut tail) = rest.split_at(host_end);

    if host.is_empty() {
        return Err(NormalizeFailed);
    }

    let mut host: Vec<u8> = host.iter().map(u8::to_ascii_lowercase).collect();

    let default_port: &[u8] = if https { b":443" } else { b":80" };
    if host.ends_with(default_port) {
        host.truncate(host.len() - default_port.len());
    }

    // Path runs to the query or fragment; the fragment is dropped.
    let path_end = tail
        .iter()
        .position(|&b| b == b'?' || b == b'#')
        .unwrap_or(tail.len());
    let mut path = &tail[..path_end];
    tail = &tail[path_end..];

    while path.len() > 1 && path.ends_with(b"/") {
        path = &path[..path.len() - 1];
    }

    let query = match tail.first() {
        Some(b'?') => {
            let q = &tail[1..];
            &q[..q.iter().position(|&b| b == b'#').unwrap_or(q.len())]
        }
        _ => &[][..],
    };

    let start = out.len();
    out.extend_from_slice(&host);

    if path.is_empty() {
        out.push(b'/');
    } else {
        out.extend_from_slice(path);
    }

    if !query.is_empty() {
        let mut params: Vec<&[u8]> = query.split(|&b| b == b'&').filter(|p| !p.is_empty()).collect();
        params.sort_unstable();

        if !params.is_empty() {
            out.push(b'?');

            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    out.push(b'&');
                }
                out.extend_from_slice(p);
            }
        }
    }

    if out.len() - start > MAX_URL_LENGTH {
        out.truncate(start + MAX_URL_LENGTH);
        return Ok(NormalizeOutcome::Truncated);
    }

    Ok(NormalizeOutcome::Ok)
}

fn strip_scheme<'a>(url: &'a [u8], scheme: &[u8]) -> Option<&'a [u8]> {
    if url.len() >= scheme.len() && url[..scheme.len()].eq_ignore_ascii_case(scheme) {
        Some(&url[scheme.len()..])
    } else {
        None
    }
}

/// Normalize into a fresh string; tests and one-off callers.
pub fn normalize_to_string(url: &str) -> Result<String, NormalizeFailed> {
    let mut out = Vec::new();
    normalize(url.as_bytes(), &mut out)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}
