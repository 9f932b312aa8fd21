//! Access-key to backing-store resolution

use crate::api::S3Error;
use crate::storage::BlobStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Credentials and store bound to one access key.
#[derive(Clone)]
pub struct Tenant {
    pub secret_access_key: String,
    pub store: Arc<dyn BlobStore>,
}

/// What an access key (or its absence) resolves to.
#[derive(Clone)]
pub enum Resolved {
    Authenticated {
        secret_access_key: String,
        store: Arc<dyn BlobStore>,
    },
    Anonymous {
        store: Arc<dyn BlobStore>,
    },
}

/// Maps presented access keys to backing stores.
///
/// Built once at startup and read-only afterwards; lookups take no locks.
pub struct IdentityResolver {
    tenants: HashMap<String, Tenant>,
    /// Store served to requests without credentials, when permitted
    anonymous: Option<Arc<dyn BlobStore>>,
}

impl IdentityResolver {
    /// No credentials configured: every request is served anonymously.
    pub fn open(store: Arc<dyn BlobStore>) -> Self {
        Self {
            tenants: HashMap::new(),
            anonymous: Some(store),
        }
    }

    /// One access key sharing one store.
    pub fn single(access_key_id: &str, secret_access_key: &str, store: Arc<dyn BlobStore>) -> Self {
        let mut tenants = HashMap::new();
        tenants.insert(
            access_key_id.to_string(),
            Tenant {
                secret_access_key: secret_access_key.to_string(),
                store,
            },
        );
        Self {
            tenants,
            anonymous: None,
        }
    }

    /// One store per access key.
    pub fn multi(tenants: HashMap<String, Tenant>) -> Self {
        Self {
            tenants,
            anonymous: None,
        }
    }

    /// Also serve unsigned requests from `store`.
    pub fn allow_anonymous(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.anonymous = Some(store);
        self
    }

    /// Whether unsigned requests are refused.
    pub fn requires_auth(&self) -> bool {
        self.anonymous.is_none()
    }

    /// Whether signatures are checked at all. An open resolver skips
    /// verification even for signed requests.
    pub fn verifies_signatures(&self) -> bool {
        !self.tenants.is_empty()
    }

    pub fn resolve(&self, access_key_id: Option<&str>) -> Result<Resolved, S3Error> {
        match access_key_id {
            Some(key) => self
                .tenants
                .get(key)
                .map(|t| Resolved::Authenticated {
                    secret_access_key: t.secret_access_key.clone(),
                    store: Arc::clone(&t.store),
                })
                .ok_or(S3Error::InvalidAccessKeyId),
            None => self
                .anonymous
                .as_ref()
                .map(|store| Resolved::Anonymous {
                    store: Arc::clone(store),
                })
                .ok_or(S3Error::AccessDenied),
        }
    }

    /// Store for an unverified request when no tenants are configured.
    pub fn open_store(&self) -> Option<Arc<dyn BlobStore>> {
        if self.verifies_signatures() {
            None
        } else {
            self.anonymous.clone()
        }
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }
}
