use super::*;

/// Security level used for SSH algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Strict modern algorithms (default).
    Secure,
    /// Good security with broader compatibility.
    Balanced,
    /// Maximum compatibility with legacy devices.
    LegacyCompatible,
}

impl std::str::FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "secure" => Ok(Self::Secure),
            "balanced" => Ok(Self::Balanced),
            "legacy" | "legacy_compatible" => Ok(Self::LegacyCompatible),
            other => Err(format!(
                "unknown security level '{other}' (expected secure, balanced or legacy)"
            )),
        }
    }
}

/// How server host keys are verified.
///
/// Switches discovered hop by hop are rarely present in `known_hosts`, so the
/// default accepts any key; the strict policies fail on an unknown switch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept whatever key the switch presents.
    #[default]
    AcceptAny,
    /// Require a matching entry in `~/.ssh/known_hosts`.
    KnownHosts,
    /// Require a matching entry in the given known-hosts file.
    KnownHostsFile(String),
}

impl HostKeyPolicy {
    pub fn server_check(&self) -> ServerCheckMethod {
        match self {
            HostKeyPolicy::AcceptAny => ServerCheckMethod::NoCheck,
            HostKeyPolicy::KnownHosts => ServerCheckMethod::DefaultKnownHostsFile,
            HostKeyPolicy::KnownHostsFile(path) => ServerCheckMethod::KnownHostsFile(path.clone()),
        }
    }
}

/// Connection security options for SSH establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    /// SSH algorithm policy.
    pub level: SecurityLevel,
    /// Server host key verification method.
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::secure_default()
    }
}

impl ConnectionSecurityOptions {
    /// Secure-by-default profile (recommended).
    pub fn secure_default() -> Self {
        Self {
            level: SecurityLevel::Secure,
            server_check: HostKeyPolicy::default().server_check(),
        }
    }

    /// Balanced profile for mixed environments.
    pub fn balanced() -> Self {
        Self {
            level: SecurityLevel::Balanced,
            server_check: HostKeyPolicy::default().server_check(),
        }
    }

    /// Legacy compatibility profile for older devices.
    pub fn legacy_compatible() -> Self {
        Self {
            level: SecurityLevel::LegacyCompatible,
            server_check: HostKeyPolicy::default().server_check(),
        }
    }

    pub fn with_host_key_policy(mut self, policy: &HostKeyPolicy) -> Self {
        self.server_check = policy.server_check();
        self
    }

    pub fn for_level(level: SecurityLevel) -> Self {
        match level {
            SecurityLevel::Secure => Self::secure_default(),
            SecurityLevel::Balanced => Self::balanced(),
            SecurityLevel::LegacyCompatible => Self::legacy_compatible(),
        }
    }

    pub(super) fn preferred(&self) -> Preferred {
        match self.level {
            SecurityLevel::Secure => Preferred {
                kex: Cow::Borrowed(config::SECURE_KEX_ORDER),
                key: Cow::Borrowed(config::SECURE_KEY_TYPES),
                cipher: Cow::Borrowed(config::SECURE_CIPHERS),
                mac: Cow::Borrowed(config::SECURE_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::Balanced => Preferred {
                kex: Cow::Borrowed(config::BALANCED_KEX_ORDER),
                key: Cow::Borrowed(config::BALANCED_KEY_TYPES),
                cipher: Cow::Borrowed(config::BALANCED_CIPHERS),
                mac: Cow::Borrowed(config::BALANCED_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
            SecurityLevel::LegacyCompatible => Preferred {
                kex: Cow::Borrowed(config::LEGACY_KEX_ORDER),
                key: Cow::Borrowed(config::LEGACY_KEY_TYPES),
                cipher: Cow::Borrowed(config::LEGACY_CIPHERS),
                mac: Cow::Borrowed(config::LEGACY_MAC_ALGORITHMS),
                compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionSecurityOptions, HostKeyPolicy, SecurityLevel};
    use async_ssh2_tokio::ServerCheckMethod;
    use russh::{cipher, kex, mac};

    #[test]
    fn default_security_options_are_secure_and_accept_unknown_switches() {
        let options = ConnectionSecurityOptions::default();
        assert_eq!(options.level, SecurityLevel::Secure);
        assert!(matches!(options.server_check, ServerCheckMethod::NoCheck));
        assert!(matches!(
            ConnectionSecurityOptions::balanced().server_check,
            ServerCheckMethod::NoCheck
        ));
    }

    #[test]
    fn strict_host_key_policies_map_to_known_hosts_checks() {
        let options = ConnectionSecurityOptions::secure_default()
            .with_host_key_policy(&HostKeyPolicy::KnownHosts);
        assert_eq!(options.level, SecurityLevel::Secure);
        assert!(matches!(
            options.server_check,
            ServerCheckMethod::DefaultKnownHostsFile
        ));

        let options = ConnectionSecurityOptions::balanced()
            .with_host_key_policy(&HostKeyPolicy::KnownHostsFile("/tmp/switches".into()));
        assert!(matches!(
            options.server_check,
            ServerCheckMethod::KnownHostsFile(ref path) if path == "/tmp/switches"
        ));
    }

    #[test]
    fn legacy_profile_uses_no_host_check() {
        let options = ConnectionSecurityOptions::legacy_compatible();
        assert_eq!(options.level, SecurityLevel::LegacyCompatible);
        assert!(matches!(options.server_check, ServerCheckMethod::NoCheck));
    }

    #[test]
    fn secure_profile_excludes_weak_algorithms() {
        let preferred = ConnectionSecurityOptions::secure_default().preferred();

        assert!(preferred.kex.iter().all(|alg| *alg != kex::NONE));
        assert!(preferred.kex.iter().all(|alg| *alg != kex::DH_G1_SHA1));
        assert!(preferred.cipher.iter().all(|alg| *alg != cipher::NONE));
        assert!(preferred.cipher.iter().all(|alg| *alg != cipher::CLEAR));
        assert!(preferred.mac.iter().all(|alg| *alg != mac::NONE));
    }

    #[test]
    fn legacy_profile_keeps_broad_compatibility_algorithms() {
        let preferred = ConnectionSecurityOptions::legacy_compatible().preferred();

        assert!(preferred.kex.contains(&kex::DH_G1_SHA1));
        assert!(preferred.cipher.contains(&cipher::AES_128_CBC));
        assert!(preferred.mac.contains(&mac::HMAC_SHA1));
    }

    #[test]
    fn security_level_parses_cli_spellings() {
        assert_eq!("secure".parse(), Ok(SecurityLevel::Secure));
        assert_eq!("Balanced".parse(), Ok(SecurityLevel::Balanced));
        assert_eq!("legacy".parse(), Ok(SecurityLevel::LegacyCompatible));
        assert_eq!(
            "legacy-compatible".parse(),
            Ok(SecurityLevel::LegacyCompatible)
        );
        assert!("weak".parse::<SecurityLevel>().is_err());
        assert_eq!(
            ConnectionSecurityOptions::for_level(SecurityLevel::Balanced),
            ConnectionSecurityOptions::balanced()
        );
    }
}
