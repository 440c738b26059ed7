use std::{fmt, fs, path::Path, sync::Arc};

#[cfg(test)]
use mockall::automock;
use russh::keys::{PrivateKey, decode_secret_key};
use tracing::debug;

use crate::{
    config::{DEFAULT_SSH_PORT, IdentityTable},
    error::{ConfigError, CredentialError, ResolveError},
};

// One way of authenticating to a hop. All of a hop's methods are offered in
// order until the server accepts one.
#[derive(Clone)]
pub enum AuthMethod {
    PublicKey(Arc<PrivateKey>),
    Password(String),
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMethod::PublicKey(_) => "publickey",
            AuthMethod::Password(_) => "password",
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::PublicKey(key) => f
                .debug_tuple("PublicKey")
                .field(&key.algorithm().as_str())
                .finish(),
            AuthMethod::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}

/// A fully specified connection target for one hop.
#[derive(Debug, Clone)]
pub struct HopSpec {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: Vec<AuthMethod>,
}

impl HopSpec {
    /// The `host:port` address of this hop, with IPv6 literals bracketed.
    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    pub fn offered_methods(&self) -> String {
        if self.auth.is_empty() {
            return "none".into();
        }
        itertools::join(self.auth.iter().map(AuthMethod::name), ", ")
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Where forwarded connections go, as dialed from the last hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub host: String,
    pub port: u16,
}

impl ForwardTarget {
    /// Parses `host:port` (or `[v6]:port`). Unlike hops, the port is required.
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            option: "--run_local_fwd".into(),
            value: target.to_string(),
            reason: reason.to_string(),
        };
        let (host, port) = split_host_port(target, target).map_err(|_| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let Some(port) = port else {
            return Err(invalid("missing port"));
        };
        match port.parse::<u16>() {
            Ok(port) if port > 0 => Ok(ForwardTarget {
                host: host.to_string(),
                port,
            }),
            _ => Err(invalid("invalid port")),
        }
    }

    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

// Source of private keys.
#[cfg_attr(test, automock)]
pub trait KeyLoader {
    fn load(&self, path: &Path) -> Result<PrivateKey, CredentialError>;
}

// Reads OpenSSH/PEM private keys from disk. Encrypted keys are not supported.
pub struct FileKeyLoader;

impl KeyLoader for FileKeyLoader {
    fn load(&self, path: &Path) -> Result<PrivateKey, CredentialError> {
        let contents =
            fs::read_to_string(path).map_err(|source| CredentialError::Unreadable {
                path: path.to_path_buf(),
                source,
            })?;
        decode_secret_key(&contents, None).map_err(|source| CredentialError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }
}

// The pieces of a `[user[:password]@]host[:port]` descriptor.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Descriptor<'a> {
    pub(crate) user: Option<&'a str>,
    pub(crate) password: Option<&'a str>,
    pub(crate) host: &'a str,
    pub(crate) port: u16,
}

impl<'a> Descriptor<'a> {
    pub(crate) fn parse(descriptor: &'a str) -> Result<Self, ConfigError> {
        let (user_info, host_info) = match descriptor.split_once('@') {
            Some((user_info, host_info)) => (Some(user_info), host_info),
            None => (None, descriptor),
        };
        let (user, password) = match user_info.map(|info| info.split_once(':')) {
            Some(Some((user, password))) => (Some(user), Some(password)),
            Some(None) => (user_info, None),
            None => (None, None),
        };
        let (host, port) = split_host_port(descriptor, host_info)?;
        if host.is_empty() {
            return Err(ConfigError::MissingHost(descriptor.to_string()));
        }
        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => parsed,
                _ => {
                    return Err(ConfigError::InvalidPort {
                        descriptor: descriptor.to_string(),
                        port: port.to_string(),
                    });
                }
            },
            None => DEFAULT_SSH_PORT,
        };
        Ok(Descriptor {
            user: user.filter(|user| !user.is_empty()),
            password,
            host,
            port,
        })
    }
}

// Split on the first colon, or after the closing bracket of an IPv6 literal.
fn split_host_port<'a>(
    descriptor: &str,
    host_info: &'a str,
) -> Result<(&'a str, Option<&'a str>), ConfigError> {
    if let Some(bracketed) = host_info.strip_prefix('[') {
        let Some((host, rest)) = bracketed.split_once(']') else {
            return Err(ConfigError::MissingHost(descriptor.to_string()));
        };
        return match rest.strip_prefix(':') {
            Some(port) => Ok((host, Some(port))),
            None if rest.is_empty() => Ok((host, None)),
            None => Err(ConfigError::InvalidPort {
                descriptor: descriptor.to_string(),
                port: rest.to_string(),
            }),
        };
    }
    Ok(match host_info.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (host_info, None),
    })
}

/// Turns the descriptor of hop `index` into a [`HopSpec`], loading its key.
pub fn resolve(
    descriptor: &str,
    index: usize,
    identities: &IdentityTable,
    default_user: &str,
    loader: &impl KeyLoader,
) -> Result<HopSpec, ResolveError> {
    let parsed = Descriptor::parse(descriptor)?;
    let mut auth = Vec::new();
    if let Some(path) = identities.path_for(index) {
        #[cfg(not(coverage_nightly))]
        debug!(hop = index, path = %path.display(), "Loading private key.");
        auth.push(AuthMethod::PublicKey(Arc::new(loader.load(path)?)));
    }
    if let Some(password) = parsed.password {
        auth.push(AuthMethod::Password(password.to_string()));
    }
    Ok(HopSpec {
        host: parsed.host.to_string(),
        port: parsed.port,
        username: parsed.user.unwrap_or(default_user).to_string(),
        auth,
    })
}

/// Resolves every hop before anything touches the network.
pub fn resolve_all(
    descriptors: &[String],
    identities: &IdentityTable,
    default_user: &str,
    loader: &impl KeyLoader,
) -> Result<Vec<HopSpec>, ResolveError> {
    if descriptors.is_empty() {
        return Err(ConfigError::NoHops.into());
    }
    descriptors
        .iter()
        .enumerate()
        .map(|(index, descriptor)| resolve(descriptor, index, identities, default_user, loader))
        .collect()
}
