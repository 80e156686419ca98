//! Inbound distribution requests (the queue message body).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use fanout_core::{TenantDirectory, TenantId};

use crate::execution::{NewExecution, Priority};

/// Why a request was rejected. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("unknown tenants: {}", .0.join(", "))]
    UnknownTenants(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionRequest {
    pub change_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub customer_codes: Vec<String>,
    pub template_id: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default = "empty_object")]
    pub template_data: JsonValue,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl DistributionRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self, RequestError> {
        serde_json::from_slice(body).map_err(|e| RequestError::Malformed(e.to_string()))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, RequestError> {
        serde_json::to_vec(self).map_err(|e| RequestError::Malformed(e.to_string()))
    }

    /// Whether the request asks to be held until a later time.
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_some_and(|at| at > now)
    }

    /// Check required fields and resolve every customer code against the
    /// tenant directory. Returns the distinct tenants in request order.
    pub fn validate(&self, directory: &dyn TenantDirectory) -> Result<Vec<TenantId>, RequestError> {
        if self.change_id.trim().is_empty() {
            return Err(RequestError::Invalid("changeId is required".into()));
        }
        if self.title.trim().is_empty() {
            return Err(RequestError::Invalid("title is required".into()));
        }
        if self.template_id.trim().is_empty() {
            return Err(RequestError::Invalid("templateId is required".into()));
        }
        if self.customer_codes.is_empty() {
            return Err(RequestError::Invalid("customerCodes must not be empty".into()));
        }

        let mut tenants: Vec<TenantId> = Vec::with_capacity(self.customer_codes.len());
        let mut unknown = Vec::new();
        for code in &self.customer_codes {
            match directory.known_tenant(code) {
                Some(info) if !tenants.contains(&info.id) => tenants.push(info.id),
                Some(_) => {}
                None => unknown.push(code.clone()),
            }
        }

        if !unknown.is_empty() {
            return Err(RequestError::UnknownTenants(unknown));
        }
        Ok(tenants)
    }

    /// Registry input for a validated request.
    pub fn to_new_execution(&self, initiated_by: &str, tenants: Vec<TenantId>) -> NewExecution {
        NewExecution::new(
            self.change_id.clone(),
            self.title.clone(),
            self.description.clone().unwrap_or_default(),
            initiated_by,
            tenants,
        )
        .with_priority(self.priority.unwrap_or_default())
        .with_tag("templateId", self.template_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::{StaticTenantDirectory, TenantInfo};

    fn directory() -> StaticTenantDirectory {
        StaticTenantDirectory::from_codes(["A", "B", "C"])
            .with_tenant(TenantInfo::disabled(TenantId::new("OFF").unwrap(), "Off"))
    }

    fn request(codes: &[&str]) -> DistributionRequest {
        DistributionRequest {
            change_id: "CHG-1".into(),
            title: "Release notes".into(),
            description: None,
            customer_codes: codes.iter().map(|c| c.to_string()).collect(),
            template_id: "tpl-1".into(),
            priority: None,
            template_data: empty_object(),
            scheduled_at: None,
        }
    }

    #[test]
    fn parses_minimal_message() {
        let body = br#"{"changeId":"CHG-1","title":"t","customerCodes":["A"],"templateId":"x"}"#;
        let req = DistributionRequest::from_slice(body).unwrap();
        assert_eq!(req.customer_codes, vec!["A"]);
        assert!(req.template_data.is_object());
        assert!(req.priority.is_none());
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = DistributionRequest::from_slice(b"{not json").unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));
    }

    #[test]
    fn unknown_and_disabled_codes_are_listed() {
        let err = request(&["A", "bogus", "OFF"]).validate(&directory()).unwrap_err();
        assert_eq!(
            err,
            RequestError::UnknownTenants(vec!["bogus".to_string(), "OFF".to_string()])
        );
    }

    #[test]
    fn duplicate_codes_collapse() {
        let tenants = request(&["A", "B", "A"]).validate(&directory()).unwrap();
        assert_eq!(
            tenants.iter().map(TenantId::as_str).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
    }

    #[test]
    fn required_fields() {
        let mut req = request(&["A"]);
        req.template_id = " ".into();
        assert!(matches!(req.validate(&directory()), Err(RequestError::Invalid(_))));

        let empty = request(&[]);
        assert!(matches!(empty.validate(&directory()), Err(RequestError::Invalid(_))));
    }

    #[test]
    fn deferred_when_scheduled_in_the_future() {
        let now = Utc::now();
        let mut req = request(&["A"]);
        assert!(!req.is_deferred(now));
        req.scheduled_at = Some(now + chrono::Duration::minutes(5));
        assert!(req.is_deferred(now));
    }
}
