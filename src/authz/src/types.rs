//! Core identifier and role change types
//!
//! Every principal and resource is addressed by an identifier of the form
//! `{type}:{tenantAlias}:{name}`. Identifiers are parsed once at the API
//! boundary and carried as typed values from then on.

use crate::error::{AuthzError, Result};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Role token (e.g. "viewer", "manager", "member")
pub type Role = String;

/// Identifier type code for users
pub const USER_TYPE: &str = "u";

/// Identifier type code for groups (as principals and as resources)
pub const GROUP_TYPE: &str = "g";

/// Errors raised while parsing an identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Empty identifier string
    #[error("Identifier cannot be empty")]
    Empty,

    /// Fewer than three `:`-separated segments
    #[error("Identifier '{0}' must have the form type:tenantAlias:name")]
    MissingSegments(String),

    /// One of the segments is empty
    #[error("Identifier '{id}' has an empty {segment} segment")]
    EmptySegment {
        /// Offending identifier
        id: String,
        /// Segment name (type, tenantAlias, name)
        segment: &'static str,
    },

    /// Type or tenant segment contains whitespace
    #[error("Identifier '{0}' contains whitespace in its type or tenant segment")]
    Whitespace(String),

    /// Identifier is well formed but does not address a user or group
    #[error("Identifier '{0}' is not a principal (expected type 'u' or 'g')")]
    NotAPrincipal(String),
}

/// Split a raw identifier into its type, tenant and name segments.
///
/// Only the first two colons separate segments; the name may contain colons.
fn split_identifier(raw: &str) -> std::result::Result<(&str, &str, &str), IdentifierError> {
    if raw.is_empty() {
        return Err(IdentifierError::Empty);
    }

    let mut parts = raw.splitn(3, ':');
    let (Some(kind), Some(tenant), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(IdentifierError::MissingSegments(raw.to_string()));
    };

    for (segment, value) in [("type", kind), ("tenantAlias", tenant), ("name", name)] {
        if value.is_empty() {
            return Err(IdentifierError::EmptySegment {
                id: raw.to_string(),
                segment,
            });
        }
    }

    if kind.chars().any(char::is_whitespace) || tenant.chars().any(char::is_whitespace) {
        return Err(IdentifierError::Whitespace(raw.to_string()));
    }

    Ok((kind, tenant, name))
}

/// Kind of principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrincipalKind {
    /// A user (`u`)
    User,
    /// A group (`g`)
    Group,
}

impl PrincipalKind {
    /// Identifier type code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::User => USER_TYPE,
            Self::Group => GROUP_TYPE,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            USER_TYPE => Some(Self::User),
            GROUP_TYPE => Some(Self::Group),
            _ => None,
        }
    }
}

/// A user or group that can hold roles and be a member of groups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalId {
    raw: String,
    kind: PrincipalKind,
    tenant_alias: String,
    name: String,
}

impl PrincipalId {
    /// Parse a principal identifier (`u:tenant:name` or `g:tenant:name`)
    pub fn parse(raw: &str) -> std::result::Result<Self, IdentifierError> {
        let (kind, tenant, name) = split_identifier(raw)?;
        let kind =
            PrincipalKind::from_code(kind).ok_or_else(|| IdentifierError::NotAPrincipal(raw.to_string()))?;

        Ok(Self {
            raw: raw.to_string(),
            kind,
            tenant_alias: tenant.to_string(),
            name: name.to_string(),
        })
    }

    /// Build a principal identifier from its parts
    pub fn new(
        kind: PrincipalKind,
        tenant_alias: &str,
        name: &str,
    ) -> std::result::Result<Self, IdentifierError> {
        Self::parse(&format!("{}:{}:{}", kind.code(), tenant_alias, name))
    }

    /// Build a user identifier
    pub fn user(tenant_alias: &str, name: &str) -> std::result::Result<Self, IdentifierError> {
        Self::new(PrincipalKind::User, tenant_alias, name)
    }

    /// Build a group identifier
    pub fn group(tenant_alias: &str, name: &str) -> std::result::Result<Self, IdentifierError> {
        Self::new(PrincipalKind::Group, tenant_alias, name)
    }

    /// Principal kind
    pub fn kind(&self) -> PrincipalKind {
        self.kind
    }

    /// Whether this principal is a group
    pub fn is_group(&self) -> bool {
        self.kind == PrincipalKind::Group
    }

    /// Tenant alias segment
    pub fn tenant_alias(&self) -> &str {
        &self.tenant_alias
    }

    /// Name segment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw identifier string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// View this principal as a resource (groups are resources of type `g`,
    /// users of type `u`)
    pub fn to_resource(&self) -> ResourceId {
        ResourceId {
            raw: self.raw.clone(),
            resource_type: self.kind.code().to_string(),
            tenant_alias: self.tenant_alias.clone(),
            name: self.name.clone(),
        }
    }
}

/// Any identifiable entity on which roles are granted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    raw: String,
    resource_type: String,
    tenant_alias: String,
    name: String,
}

impl ResourceId {
    /// Parse a resource identifier (`{type}:{tenant}:{name}`)
    pub fn parse(raw: &str) -> std::result::Result<Self, IdentifierError> {
        let (resource_type, tenant, name) = split_identifier(raw)?;

        Ok(Self {
            raw: raw.to_string(),
            resource_type: resource_type.to_string(),
            tenant_alias: tenant.to_string(),
            name: name.to_string(),
        })
    }

    /// Build a resource identifier from its parts
    pub fn new(
        resource_type: &str,
        tenant_alias: &str,
        name: &str,
    ) -> std::result::Result<Self, IdentifierError> {
        Self::parse(&format!("{}:{}:{}", resource_type, tenant_alias, name))
    }

    /// Resource type segment (e.g. `c` for content, `g` for groups)
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Tenant alias segment
    pub fn tenant_alias(&self) -> &str {
        &self.tenant_alias
    }

    /// Name segment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw identifier string
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The principal this resource denotes, if it is a user or group
    pub fn to_principal(&self) -> Option<PrincipalId> {
        PrincipalKind::from_code(&self.resource_type).map(|kind| PrincipalId {
            raw: self.raw.clone(),
            kind,
            tenant_alias: self.tenant_alias.clone(),
            name: self.name.clone(),
        })
    }
}

/// Tagged identifier: either a principal or a plain resource.
///
/// Used as the node type of membership graphs, where groups and content
/// items can both be the target of membership edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// User or group
    Principal(PrincipalId),
    /// Any other resource
    Resource(ResourceId),
}

impl Identifier {
    /// Parse an identifier; `u` and `g` types become principals
    pub fn parse(raw: &str) -> std::result::Result<Self, IdentifierError> {
        let resource = ResourceId::parse(raw)?;
        Ok(match resource.to_principal() {
            Some(principal) => Self::Principal(principal),
            None => Self::Resource(resource),
        })
    }

    /// Raw identifier string
    pub fn as_str(&self) -> &str {
        match self {
            Self::Principal(p) => p.as_str(),
            Self::Resource(r) => r.as_str(),
        }
    }

    /// The principal, if this identifier is one
    pub fn as_principal(&self) -> Option<&PrincipalId> {
        match self {
            Self::Principal(p) => Some(p),
            Self::Resource(_) => None,
        }
    }

    /// Whether this identifier denotes a group
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Principal(p) if p.is_group())
    }

    /// View as a resource
    pub fn to_resource(&self) -> ResourceId {
        match self {
            Self::Principal(p) => p.to_resource(),
            Self::Resource(r) => r.clone(),
        }
    }
}

impl From<PrincipalId> for Identifier {
    fn from(principal: PrincipalId) -> Self {
        Self::Principal(principal)
    }
}

impl From<ResourceId> for Identifier {
    fn from(resource: ResourceId) -> Self {
        match resource.to_principal() {
            Some(principal) => Self::Principal(principal),
            None => Self::Resource(resource),
        }
    }
}

macro_rules! impl_identifier_traits {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = IdentifierError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl PartialOrd for $ty {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $ty {
            fn cmp(&self, other: &Self) -> Ordering {
                self.as_str().cmp(other.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }
    )*};
}

impl_identifier_traits!(PrincipalId, ResourceId, Identifier);

/// One entry of a role change batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleChange {
    /// Upsert the direct role
    Grant(Role),
    /// Remove the direct role (`false` in the JSON form)
    Revoke,
}

impl RoleChange {
    /// The role to store, `None` for a revocation
    pub fn role(&self) -> Option<&str> {
        match self {
            Self::Grant(role) => Some(role),
            Self::Revoke => None,
        }
    }
}

impl Serialize for RoleChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Grant(role) => serializer.serialize_str(role),
            Self::Revoke => serializer.serialize_bool(false),
        }
    }
}

impl TryFrom<&Value> for RoleChange {
    type Error = AuthzError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::String(role) if !role.is_empty() => Ok(Self::Grant(role.clone())),
            Value::Bool(false) => Ok(Self::Revoke),
            other => Err(AuthzError::InvalidArgument(format!(
                "Role change must be a non-empty role name or false, got {}",
                other
            ))),
        }
    }
}

/// A batch of role changes for one resource, keyed by principal
///
/// Entries are kept in identifier order so batches are applied and
/// reported deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RoleChanges {
    entries: BTreeMap<PrincipalId, RoleChange>,
}

impl RoleChanges {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a grant to the batch
    pub fn grant(mut self, principal: PrincipalId, role: impl Into<Role>) -> Self {
        self.entries.insert(principal, RoleChange::Grant(role.into()));
        self
    }

    /// Add a revocation to the batch
    pub fn revoke(mut self, principal: PrincipalId) -> Self {
        self.entries.insert(principal, RoleChange::Revoke);
        self
    }

    /// Insert or replace a single entry
    pub fn insert(&mut self, principal: PrincipalId, change: RoleChange) {
        self.entries.insert(principal, change);
    }

    /// Build a batch from raw principal identifiers
    pub fn parse<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, RoleChange)>,
    {
        let mut changes = Self::new();
        for (raw, change) in entries {
            changes.insert(PrincipalId::parse(raw)?, change);
        }
        Ok(changes)
    }

    /// Parse the JSON object form `{"u:t:alice": "viewer", "g:t:team": false}`
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(AuthzError::InvalidArgument(
                "Role changes must be a JSON object".to_string(),
            ));
        };

        let mut changes = Self::new();
        for (raw, change) in map {
            changes.insert(PrincipalId::parse(raw)?, RoleChange::try_from(change)?);
        }
        Ok(changes)
    }

    /// Check the batch is non-empty and that every granted role is non-empty
    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(AuthzError::InvalidArgument(
                "Role changes cannot be empty".to_string(),
            ));
        }

        for (principal, change) in &self.entries {
            if let RoleChange::Grant(role) = change {
                if role.is_empty() {
                    return Err(AuthzError::InvalidArgument(format!(
                        "Empty role granted to '{}'",
                        principal
                    )));
                }
            }
        }

        Ok(())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of grants and revocations in the batch
    pub fn counts(&self) -> (usize, usize) {
        let grants = self
            .entries
            .values()
            .filter(|c| matches!(c, RoleChange::Grant(_)))
            .count();
        (grants, self.entries.len() - grants)
    }

    /// Iterate entries in identifier order
    pub fn iter(&self) -> impl Iterator<Item = (&PrincipalId, &RoleChange)> {
        self.entries.iter()
    }

    /// Principals addressed by the batch, in identifier order
    pub fn principals(&self) -> impl Iterator<Item = &PrincipalId> {
        self.entries.keys()
    }
}
