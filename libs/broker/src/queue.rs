//! Queue identity derivation.

use std::fmt;

/// Name of a per-tenant broker queue.
///
/// Derived deterministically from the tenant id. The naming scheme must match
/// what the upstream backend uses when it declares the queue (including its
/// dead-letter pairing); the gateway itself never declares queues or touches
/// their durability settings, since queue topology is owned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    /// Derive the queue name for a tenant.
    pub fn for_tenant(tenant_id: &str) -> Self {
        Self(format!("tenant.{tenant_id}"))
    }

    /// The queue name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(QueueName::for_tenant("t1"), QueueName::for_tenant("t1"));
        assert_eq!(QueueName::for_tenant("t1").as_str(), "tenant.t1");
    }

    #[test]
    fn distinct_tenants_get_distinct_queues() {
        assert_ne!(QueueName::for_tenant("t1"), QueueName::for_tenant("t2"));
        assert_ne!(
            QueueName::for_tenant("acme"),
            QueueName::for_tenant("acme2")
        );
    }
}
