//! Debug session records and identity keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Identity of a debug session: one session at most per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub component: String,
    pub application: String,
    pub namespace: String,
}

impl SessionKey {
    pub fn new(
        component: impl Into<String>,
        application: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let key = Self {
            component: component.into(),
            application: application.into(),
            namespace: namespace.into(),
        };
        key.validate()?;
        Ok(key)
    }

    /// Validate identity components before they form a filename
    fn validate(&self) -> Result<(), StoreError> {
        if self.component.is_empty() || self.namespace.is_empty() {
            return Err(StoreError::InvalidKey(
                "component and namespace must not be empty".to_string(),
            ));
        }
        for part in [&self.component, &self.application, &self.namespace] {
            if !part
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
            {
                return Err(StoreError::InvalidKey(format!(
                    "'{}' must contain only alphanumeric characters, hyphens, and underscores",
                    part
                )));
            }
        }
        Ok(())
    }

    /// Filename stem for this key, unique because the parts are validated
    pub(crate) fn file_stem(&self) -> String {
        format!(
            "{}.{}.{}",
            self.namespace, self.application, self.component
        )
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.application, self.component
        )
    }
}

/// Persisted record of one debug session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugSession {
    pub component_name: String,
    pub application_name: String,
    pub namespace: String,

    /// Host-side TCP port bound for this session
    pub local_port: u16,

    /// Debug port inside the target container
    pub remote_port: u16,

    /// Pod resolved at session start; may go stale if the pod is replaced
    pub pod_name: String,

    /// Pid of the process holding the tunnel, for crash detection
    pub process_id: u32,

    /// RFC3339 start timestamp, for display
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(SessionKey::new("web", "app", "ns").is_ok());
        assert!(SessionKey::new("web-1", "", "ns").is_ok());
        assert!(SessionKey::new("", "app", "ns").is_err());
        assert!(SessionKey::new("web", "app", "").is_err());
        assert!(SessionKey::new("../web", "app", "ns").is_err());
        assert!(SessionKey::new("web", "a/b", "ns").is_err());
    }

    #[test]
    fn test_file_stem_distinct_per_key() {
        let a = SessionKey::new("web", "app", "ns").unwrap();
        let b = SessionKey::new("web", "", "ns").unwrap();
        assert_ne!(a.file_stem(), b.file_stem());
    }

    #[test]
    fn test_record_uses_camel_case_fields() {
        let session = DebugSession {
            component_name: "web".to_string(),
            application_name: "app".to_string(),
            namespace: "ns".to_string(),
            local_port: 50000,
            remote_port: 5858,
            pod_name: "web-7f9c".to_string(),
            process_id: 4242,
            started_at: Utc::now(),
        };

        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("componentName").is_some());
        assert!(json.get("localPort").is_some());
        assert!(json.get("startedAt").is_some());
    }
}
