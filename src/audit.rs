// src/audit.rs - audit trail helpers

use sqlx::SqlitePool;
use uuid::Uuid;
use chrono::Utc;
use actix_web::HttpRequest;
use serde::Serialize;

/// One field-level change recorded with an audit entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldChange {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ChangeSet {
    changes: Vec<FieldChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `old -> new` only when the value actually changed.
    pub fn add(&mut self, field: &str, old: &str, new: &str) {
        if old != new {
            self.changes.push(FieldChange {
                field: field.to_string(),
                old: Some(old.to_string()),
                new: Some(new.to_string()),
            });
        }
    }

    pub fn add_opt(&mut self, field: &str, old: &Option<String>, new: &Option<String>) {
        if old != new {
            self.changes.push(FieldChange {
                field: field.to_string(),
                old: old.clone(),
                new: new.clone(),
            });
        }
    }

    pub fn add_num(&mut self, field: &str, old: f64, new: f64) {
        if (old - new).abs() > f64::EPSILON {
            self.add(field, &old.to_string(), &new.to_string());
        }
    }

    pub fn created(&mut self, field: &str, value: &str) {
        self.changes.push(FieldChange {
            field: field.to_string(),
            old: None,
            new: Some(value.to_string()),
        });
    }

    pub fn deleted(&mut self, field: &str, value: &str) {
        self.changes.push(FieldChange {
            field: field.to_string(),
            old: Some(value.to_string()),
            new: None,
        });
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn to_description(&self) -> String {
        self.changes
            .iter()
            .map(|c| match (&c.old, &c.new) {
                (Some(o), Some(n)) => format!("{}: {} → {}", c.field, o, n),
                (None, Some(n)) => format!("{}={}", c.field, n),
                (Some(o), None) => format!("{}={}", c.field, o),
                (None, None) => c.field.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn to_json(&self) -> Option<String> {
        if self.changes.is_empty() {
            return None;
        }
        serde_json::to_string(&self.changes).ok()
    }
}

/// Write one entry to audit_logs.
pub async fn log_activity(
    pool: &SqlitePool,
    user_id: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: Option<&str>,
    description: Option<&str>,
    changes: Option<&str>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    let ip_address = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO audit_logs
           (id, user_id, action, entity_type, entity_id, description, changes, ip_address, user_agent, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
    .bind(&id)
    .bind(user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(description)
    .bind(changes)
    .bind(&ip_address)
    .bind(&user_agent)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Audit failures are logged, never surfaced to the caller.
pub async fn audit(
    pool: &SqlitePool,
    user_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    request: &HttpRequest,
) {
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        Some(entity_id),
        Some(description),
        None,
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

pub async fn audit_with_changes(
    pool: &SqlitePool,
    user_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    description: &str,
    changes: &ChangeSet,
    request: &HttpRequest,
) {
    let json = changes.to_json();
    let entity_id = if entity_id.is_empty() { None } else { Some(entity_id) };
    if let Err(e) = log_activity(
        pool,
        Some(user_id),
        action,
        entity_type,
        entity_id,
        Some(description),
        json.as_deref(),
        Some(request),
    ).await {
        log::error!("Failed to write audit log: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::memory_pool;

    #[test]
    fn test_changeset_skips_unchanged_fields() {
        let mut cs = ChangeSet::new();
        cs.add("name", "Acme", "Acme");
        cs.add_num("credit_limit", 1000.0, 1000.0);
        assert!(!cs.has_changes());
        assert!(cs.to_json().is_none());

        cs.add("name", "Acme", "Acme Corp");
        cs.add_opt("phone", &None, &Some("555".to_string()));
        assert_eq!(cs.to_description(), "name: Acme → Acme Corp, phone=555");
    }

    #[test]
    fn test_changeset_json() {
        let mut cs = ChangeSet::new();
        cs.created("so_number", "SO-000001");
        cs.deleted("status", "PENDING");
        let json = cs.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["field"], "so_number");
        assert_eq!(parsed[0]["new"], "SO-000001");
        assert!(parsed[0].get("old").is_none());
        assert_eq!(parsed[1]["old"], "PENDING");
    }

    #[actix_rt::test]
    async fn test_log_activity_without_request() {
        let pool = memory_pool().await;
        log_activity(&pool, Some("u1"), "create", "customer", Some("c1"), Some("Created"), None, None)
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs WHERE entity_type = 'customer'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
