use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A PSA staff member. `identifier` is the short login handle that appears in
/// a ticket's resources list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Member {
    pub id: i32,
    pub identifier: String,
    pub first_name: String,
    pub last_name: String,
    pub primary_email: String,
    pub updated_on: DateTime<Utc>,
}

impl Member {
    pub fn full_name(&self) -> String {
        super::company::full_name(&self.first_name, Some(&self.last_name))
    }
}
