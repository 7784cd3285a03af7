use sacco_core::config::TenancyConfig;
use sacco_core::types::slug_is_valid;

/// Outcome of mapping a request host to a tenancy scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResolution {
    /// The apex domain itself: platform-level operations.
    System,
    /// A tenant subdomain; carries the candidate slug.
    Tenant(String),
    /// Anything else. Callers must treat this as not found, never as
    /// an implicit system scope.
    Unresolved,
}

/// Pure host-header resolver. `<slug>.<main domain>` names a tenant,
/// the bare apex names the system scope, and every other shape fails
/// closed to [`HostResolution::Unresolved`].
#[derive(Debug, Clone)]
pub struct TenantResolver {
    main_domain: String,
    dot_suffix: String,
    dev_prefix: String,
}

impl TenantResolver {
    pub fn new(main_domain: impl Into<String>, dev_prefix: impl Into<String>) -> Self {
        let main_domain = main_domain.into().trim().to_lowercase();
        Self {
            dot_suffix: format!(".{main_domain}"),
            main_domain,
            dev_prefix: dev_prefix.into().trim().to_lowercase(),
        }
    }

    pub fn from_config(config: &TenancyConfig) -> Self {
        Self::new(&config.main_domain, &config.dev_host_prefix)
    }

    pub fn main_domain(&self) -> &str {
        &self.main_domain
    }

    /// Classify a raw `Host` header value. Ports are ignored and the
    /// comparison is case-insensitive.
    pub fn resolve(&self, host: &str) -> HostResolution {
        let host = match strip_port(host) {
            Some(h) if !h.is_empty() => h.to_lowercase(),
            _ => return HostResolution::Unresolved,
        };

        if host == self.main_domain {
            return HostResolution::System;
        }

        // Development convention: a bare prefixed hostname such as
        // `tenant-umoja` maps straight to a slug.
        if !self.dev_prefix.is_empty() && !host.contains('.') {
            if let Some(slug) = host.strip_prefix(self.dev_prefix.as_str()) {
                if slug_is_valid(slug) {
                    return HostResolution::Tenant(slug.to_string());
                }
            }
            return HostResolution::Unresolved;
        }

        match host.strip_suffix(self.dot_suffix.as_str()) {
            Some(label) => self.label_to_resolution(label),
            None => HostResolution::Unresolved,
        }
    }

    fn label_to_resolution(&self, label: &str) -> HostResolution {
        // Deeper subdomains never resolve; a nested label is not a slug.
        if label.contains('.') {
            return HostResolution::Unresolved;
        }
        let slug = if self.dev_prefix.is_empty() {
            label
        } else {
            label.strip_prefix(self.dev_prefix.as_str()).unwrap_or(label)
        };
        if slug_is_valid(slug) {
            HostResolution::Tenant(slug.to_string())
        } else {
            HostResolution::Unresolved
        }
    }
}

/// Drop a trailing `:port` if present. Bracketed IPv6 literals are
/// unwrapped so they fall through to the usual (non-)matching.
fn strip_port(host: &str) -> Option<&str> {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        let end = rest.find(']')?;
        return Some(&rest[..end]);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            Some(name)
        }
        // A colon without a numeric port is a malformed host.
        Some(_) => None,
        None => Some(host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TenantResolver {
        TenantResolver::new("example.com", "tenant-")
    }

    #[test]
    fn subdomain_resolves_to_slug() {
        assert_eq!(
            resolver().resolve("acme.example.com"),
            HostResolution::Tenant("acme".to_string())
        );
    }

    #[test]
    fn apex_resolves_to_system() {
        assert_eq!(resolver().resolve("example.com"), HostResolution::System);
        assert_eq!(resolver().resolve("EXAMPLE.COM:8443"), HostResolution::System);
    }

    #[test]
    fn port_and_case_are_ignored() {
        assert_eq!(
            resolver().resolve("ACME.Example.COM:8080"),
            HostResolution::Tenant("acme".to_string())
        );
    }

    #[test]
    fn deeper_subdomains_fail_closed() {
        assert_eq!(
            resolver().resolve("a.b.example.com"),
            HostResolution::Unresolved
        );
    }

    #[test]
    fn unrelated_domains_fail_closed() {
        assert_eq!(resolver().resolve("other.org"), HostResolution::Unresolved);
        // Suffix spoofing does not resolve either.
        assert_eq!(
            resolver().resolve("acme.example.com.evil.org"),
            HostResolution::Unresolved
        );
    }

    #[test]
    fn invalid_slugs_fail_closed() {
        assert_eq!(
            resolver().resolve("acme_x.example.com"),
            HostResolution::Unresolved
        );
        assert_eq!(
            resolver().resolve("-acme.example.com"),
            HostResolution::Unresolved
        );
        assert_eq!(resolver().resolve(".example.com"), HostResolution::Unresolved);
    }

    #[test]
    fn dev_prefix_maps_to_slug() {
        let r = TenantResolver::new("localhost", "tenant-");
        assert_eq!(
            r.resolve("tenant-umoja.localhost"),
            HostResolution::Tenant("umoja".to_string())
        );
        assert_eq!(
            r.resolve("tenant-umoja:3000"),
            HostResolution::Tenant("umoja".to_string())
        );
        // The prefix alone carries no slug.
        assert_eq!(r.resolve("tenant-"), HostResolution::Unresolved);
    }

    #[test]
    fn garbage_hosts_fail_closed() {
        assert_eq!(resolver().resolve(""), HostResolution::Unresolved);
        assert_eq!(resolver().resolve("[::1]:8080"), HostResolution::Unresolved);
        assert_eq!(resolver().resolve("example.com:"), HostResolution::Unresolved);
    }
}
