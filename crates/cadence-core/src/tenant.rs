//! Per-job tenant context.
//!
//! The storage partition is selected once, at the job boundary, and the
//! resulting context value is passed explicitly down the call graph. There
//! is no process-wide "current tenant".

use std::sync::Arc;

use crate::store::TenantStore;
use crate::types::Tenant;

/// A tenant plus an open handle to its storage partition.
#[derive(Clone)]
pub struct TenantContext {
    pub tenant: Tenant,
    pub store: Arc<TenantStore>,
}

impl TenantContext {
    pub fn new(tenant: Tenant, store: Arc<TenantStore>) -> Self {
        Self { tenant, store }
    }

    pub fn schema_name(&self) -> &str {
        &self.tenant.schema_name
    }

    /// The tenant's telemetry channel (`telemetry_{slug}`).
    pub fn telemetry_channel(&self) -> String {
        self.tenant.telemetry_channel()
    }

    /// The data-layer change-signal channel (`tenant_{schema_name}`).
    pub fn data_channel(&self) -> String {
        self.tenant.data_channel()
    }
}

impl std::fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant", &self.tenant.schema_name)
            .finish()
    }
}
