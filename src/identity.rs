//! Service identity derived from managed container names
//!
//! Managed containers are named `<prefix>_<project_id>_<service_name>`, where
//! `service_name` may itself contain underscores or hyphens. The default
//! resolver hashes the full name into a stable non-negative id; the registry
//! resolver asks an authoritative lookup first and only hashes on a miss.

use crate::error::IdentityError;
use sha2::{Digest, Sha256};

/// Stable identifier of a service, independent of its current container
pub type ServiceId = i64;

/// Default prefix carried by every container this system deploys
pub const DEFAULT_PREFIX: &str = "glinr";

/// Segments of a managed container name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerName<'a> {
    pub prefix: &'a str,
    pub project: &'a str,
    pub service: &'a str,
}

impl ContainerName<'_> {
    /// Project segment as a number, if it is one
    pub fn project_id(&self) -> Option<i64> {
        self.project.parse().ok()
    }
}

/// Split a container name and check it against the naming convention.
///
/// Only the shape is checked: the prefix must match and the name must have
/// at least three `_`-separated segments. The project segment is normally
/// numeric but is not required to be; [`ContainerName::project_id`] reports
/// whether it is.
pub fn parse_container_name<'a>(
    name: &'a str,
    prefix: &str,
) -> Result<ContainerName<'a>, IdentityError> {
    let mut parts = name.splitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(p), Some(project), Some(service)) if p == prefix => Ok(ContainerName {
            prefix: p,
            project,
            service,
        }),
        _ => Err(IdentityError::InvalidContainerName(name.to_string())),
    }
}

/// Hash a full container name into a non-negative id.
///
/// Uses the first eight bytes of the SHA-256 digest so the value is the same
/// across processes and releases.
pub fn stable_hash(name: &str) -> ServiceId {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) & i64::MAX as u64) as i64
}

/// Resolves a container name to the service it backs
pub trait IdentityResolver: Send + Sync {
    /// Prefix identifying managed containers
    fn prefix(&self) -> &str;

    /// Resolve a container name, failing on names outside the convention
    fn resolve(&self, container_name: &str) -> Result<ServiceId, IdentityError>;

    /// Cheap check used to drop foreign containers before resolving
    fn is_managed(&self, container_name: &str) -> bool {
        container_name
            .strip_prefix(self.prefix())
            .is_some_and(|rest| rest.starts_with('_'))
    }
}

/// Hash-based resolver
#[derive(Debug, Clone)]
pub struct HashIdentityResolver {
    prefix: String,
}

impl HashIdentityResolver {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for HashIdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityResolver for HashIdentityResolver {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn resolve(&self, container_name: &str) -> Result<ServiceId, IdentityError> {
        parse_container_name(container_name, &self.prefix)?;
        Ok(stable_hash(container_name))
    }
}

/// Resolver backed by the authoritative service registry.
///
/// `lookup` receives the numeric project id and the service name. When the
/// project segment is not numeric or the lookup has no record, the id falls
/// back to [`stable_hash`] of the full name.
pub struct RegistryIdentityResolver<F> {
    prefix: String,
    lookup: F,
}

impl<F> RegistryIdentityResolver<F>
where
    F: Fn(i64, &str) -> Option<ServiceId> + Send + Sync,
{
    pub fn new(prefix: impl Into<String>, lookup: F) -> Self {
        Self {
            prefix: prefix.into(),
            lookup,
        }
    }
}

impl<F> IdentityResolver for RegistryIdentityResolver<F>
where
    F: Fn(i64, &str) -> Option<ServiceId> + Send + Sync,
{
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn resolve(&self, container_name: &str) -> Result<ServiceId, IdentityError> {
        let parsed = parse_container_name(container_name, &self.prefix)?;
        let found = parsed
            .project_id()
            .and_then(|project_id| (self.lookup)(project_id, parsed.service));
        Ok(found.unwrap_or_else(|| stable_hash(container_name)))
    }
}
