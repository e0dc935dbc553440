use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-visible error raised outside the composer, e.g. a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
