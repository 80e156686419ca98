//! Tenant directory boundary.
//!
//! The orchestration core never owns tenant master data. It asks a
//! `TenantDirectory` whether a customer code resolves to a known, enabled
//! tenant before any work is scheduled for it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::TenantId;

/// What the directory knows about one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInfo {
    pub id: TenantId,
    pub name: String,
    pub enabled: bool,
}

impl TenantInfo {
    pub fn enabled(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
        }
    }

    pub fn disabled(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: false,
        }
    }
}

/// Lookup of tenants by customer code.
pub trait TenantDirectory: Send + Sync {
    /// Resolve a customer code to its tenant record, enabled or not.
    fn lookup(&self, code: &str) -> Option<TenantInfo>;

    /// Returns the tenant when `code` is a recognised, enabled tenant.
    fn known_tenant(&self, code: &str) -> Option<TenantInfo> {
        self.lookup(code).filter(|t| t.enabled)
    }

    fn is_known_tenant(&self, code: &str) -> bool {
        self.known_tenant(code).is_some()
    }
}

impl<S> TenantDirectory for Arc<S>
where
    S: TenantDirectory + ?Sized,
{
    fn lookup(&self, code: &str) -> Option<TenantInfo> {
        (**self).lookup(code)
    }
}

/// Fixed, in-process tenant directory (configuration-driven deployments and tests).
#[derive(Debug, Clone, Default)]
pub struct StaticTenantDirectory {
    tenants: BTreeMap<String, TenantInfo>,
}

impl StaticTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory where every given code is an enabled tenant named after its code.
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dir = Self::new();
        for code in codes {
            if let Ok(id) = TenantId::new(code.as_ref()) {
                let name = id.to_string();
                dir.insert(TenantInfo::enabled(id, name));
            }
        }
        dir
    }

    pub fn with_tenant(mut self, info: TenantInfo) -> Self {
        self.insert(info);
        self
    }

    pub fn insert(&mut self, info: TenantInfo) {
        self.tenants.insert(info.id.as_str().to_string(), info);
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn tenants(&self) -> impl Iterator<Item = &TenantInfo> {
        self.tenants.values()
    }
}

impl TenantDirectory for StaticTenantDirectory {
    fn lookup(&self, code: &str) -> Option<TenantInfo> {
        self.tenants.get(code.trim()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(s: &str) -> TenantId {
        TenantId::new(s).unwrap()
    }

    #[test]
    fn disabled_tenants_are_not_known() {
        let dir = StaticTenantDirectory::from_codes(["A", "B"])
            .with_tenant(TenantInfo::disabled(tid("C"), "Charlie"));

        assert!(dir.is_known_tenant("A"));
        assert!(dir.is_known_tenant(" B "));
        assert!(dir.lookup("C").is_some());
        assert!(!dir.is_known_tenant("C"));
        assert!(!dir.is_known_tenant("bogus"));
    }

    #[test]
    fn arc_directory_delegates() {
        let dir: Arc<dyn TenantDirectory> = Arc::new(StaticTenantDirectory::from_codes(["A"]));
        assert!(dir.is_known_tenant("A"));
        assert!(!dir.is_known_tenant("Z"));
    }
}
