use eater_domainmatcher::DomainPattern;
use tracing::{debug, warn};

pub const WILDCARD_HOSTNAME: &str = "*";

/// Returns whether `candidate` is covered by `pattern`.
///
/// `pattern` is a left-wildcard mask: `*.sample.com` covers `sub.sample.com` and
/// `a.b.sample.com` (and the wildcard `*.sub.sample.com`) but not `sample.com`.
/// An empty hostname on either side is no constraint and always matches.
pub fn hostnames_match(pattern: &str, candidate: &str) -> bool {
    if pattern.is_empty() || candidate.is_empty() || pattern == WILDCARD_HOSTNAME {
        return true;
    }

    if pattern.eq_ignore_ascii_case(candidate) {
        return true;
    }

    let mask = match pattern.strip_prefix("*.") {
        Some(suffix) => format!("**+.{suffix}"),
        None => pattern.to_owned(),
    };

    match DomainPattern::<'_, '.'>::try_from(mask.as_str()) {
        Ok(domain_pattern) => {
            let matched = domain_pattern.matches(candidate);
            debug!("Comparing hostnames {pattern} {candidate} {matched}");
            matched
        }
        Err(_) => {
            warn!("Hostname is not a valid domain pattern {pattern}");
            false
        }
    }
}

/// Symmetric variant of [`hostnames_match`]: true when either hostname covers the other.
pub fn hostnames_intersect(a: &str, b: &str) -> bool {
    hostnames_match(a, b) || hostnames_match(b, a)
}

/// Returns the first route hostname intersecting the listener hostname.
///
/// A listener without hostname and a route without hostnames accept everything.
pub fn first_intersecting<'a>(listener_hostname: Option<&'a str>, route_hostnames: &'a [String]) -> Option<&'a str> {
    let listener_hostname = listener_hostname.unwrap_or_default();
    if route_hostnames.is_empty() {
        return Some(listener_hostname);
    }
    route_hostnames.iter().map(String::as_str).find(|hostname| hostnames_intersect(listener_hostname, hostname))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_masks() {
        assert!(hostnames_match("*.sample.com", "sub.sample.com"));
        assert!(hostnames_match("*.sample.com", "even.more.sample.com"));
        assert!(!hostnames_match("*.sample.com", "sample.com"));
        assert!(!hostnames_match("a.sample.com", "b.sample.com"));
        assert!(hostnames_match("a.sample.com", "a.sample.com"));
        assert!(!hostnames_match("sub.sample.com", "*.sample.com"));
    }

    #[test]
    fn empty_is_no_constraint() {
        assert!(hostnames_match("", "anything.example.com"));
        assert!(hostnames_match("", "*.example.com"));
        assert!(hostnames_match("a.example.com", ""));
        assert!(hostnames_intersect("", ""));
    }

    #[test]
    fn intersection_is_symmetric() {
        let hostnames = ["", "*.sample.com", "sub.sample.com", "sample.com", "a.b.sample.com", "*.b.sample.com", "other.org", "*.org"];
        for a in hostnames {
            for b in hostnames {
                assert_eq!(hostnames_intersect(a, b), hostnames_intersect(b, a), "{a} {b}");
            }
        }
        assert!(hostnames_intersect("sub.sample.com", "*.sample.com"));
        assert!(!hostnames_intersect("sample.com", "*.sample.com"));
        assert!(!hostnames_intersect("other.org", "sample.com"));
    }

    #[test]
    fn listener_and_route_hostnames() {
        let route_hostnames = vec!["a.example.com".to_owned(), "b.other.org".to_owned()];
        assert_eq!(first_intersecting(None, &route_hostnames), Some("a.example.com"));
        assert_eq!(first_intersecting(Some("*.other.org"), &route_hostnames), Some("b.other.org"));
        assert_eq!(first_intersecting(Some("*.nowhere.io"), &route_hostnames), None);
        assert_eq!(first_intersecting(Some("foo.example.com"), &[]), Some("foo.example.com"));
    }
}
