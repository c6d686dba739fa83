//! Request and query context passed to triggers.
//!
//! [`RequestContext`] describes who is calling: the decoded token payload, a
//! fallback tenant supplied by the transport, and free-form request metadata.
//! [`QueryContext`] describes what is being done and is rebuilt for every
//! operation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tenant used when neither the token nor the request names one.
pub const DEFAULT_TENANT: &str = "000";

/// Caller information for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Decoded, already authenticated token payload.
    #[serde(default)]
    pub token_payload: Option<Map<String, Value>>,
    /// Tenant named by the transport (header, subdomain) when the token has none.
    #[serde(default)]
    pub fallback_tenant: Option<String>,
    /// Request metadata such as a correlation id or client name.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    /// Creates a context from a decoded token payload.
    pub fn with_token(payload: Map<String, Value>) -> Self {
        Self {
            token_payload: Some(payload),
            ..Default::default()
        }
    }

    /// Sets the transport-level fallback tenant.
    pub fn with_fallback_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.fallback_tenant = Some(tenant.into());
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Resolves the tenant: token payload, then fallback, then [`DEFAULT_TENANT`].
    pub fn tenant_id(&self, tenant_key: &str) -> String {
        self.token_payload
            .as_ref()
            .and_then(|payload| payload.get(tenant_key))
            .and_then(non_empty_string)
            .or_else(|| {
                self.fallback_tenant
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_TENANT.to_string())
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Per-operation context handed to triggers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryContext {
    /// Result data, set for after-hooks.
    pub data: Option<Value>,
    /// Mutation input, set for before-create and before-update hooks.
    pub input: Option<Value>,
    /// Filter document, set for before-find and before-delete hooks.
    pub filters: Option<Value>,
    /// Parent record when the operation is nested under another.
    pub parent: Option<Value>,
    /// Free-form request parameters.
    pub params: Map<String, Value>,
    /// Access role selecting per-model hooks.
    pub access_role: Option<String>,
    /// Route selecting per-model hooks.
    pub route: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tenant_from_token() {
        let payload = json!({"tenantId": "acme"}).as_object().cloned().unwrap();
        let ctx = RequestContext::with_token(payload).with_fallback_tenant("other");
        assert_eq!(ctx.tenant_id("tenantId"), "acme");
    }

    #[test]
    fn test_tenant_fallbacks() {
        let payload = json!({"tenantId": ""}).as_object().cloned().unwrap();
        let ctx = RequestContext::with_token(payload).with_fallback_tenant("branch-7");
        assert_eq!(ctx.tenant_id("tenantId"), "branch-7");

        let ctx = RequestContext::default().with_fallback_tenant("  ");
        assert_eq!(ctx.tenant_id("tenantId"), DEFAULT_TENANT);
    }

    #[test]
    fn test_metadata() {
        let ctx = RequestContext::default().with_metadata("requestId", "r-1");
        assert_eq!(ctx.metadata["requestId"], "r-1");
    }
}
