use crate::ids::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-visible public key record. At most one live row per `user_id`;
/// republishing overwrites the row in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPublicKey {
    pub user_id: UserId,
    /// Base64-encoded public key material.
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserPublicKey {
    pub fn new(user_id: UserId, public_key: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            public_key,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_public_key_includes_all_columns() {
        let record = UserPublicKey::new(UserId::new(), "cHVi".into());
        let json = serde_json::to_value(&record).unwrap();
        for column in ["user_id", "public_key", "created_at", "updated_at"] {
            assert!(json.get(column).is_some(), "missing column {column}");
        }
    }

    #[test]
    fn new_record_has_equal_timestamps() {
        let record = UserPublicKey::new(UserId::new(), "cHVi".into());
        assert_eq!(record.created_at, record.updated_at);
    }
}
