use super::*;

/// Monero-style `login` params: a single object instead of a positional
/// array. Combined subscribe + authorize + getjob.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct Login {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Login response payload: session id, the current job, and a status tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResult {
    pub id: String,
    pub job: JobParams,
    pub status: String,
}

impl LoginResult {
    pub fn new(session_id: &str, job: JobParams) -> Self {
        Self {
            id: session_id.into(),
            job,
            status: "OK".into(),
        }
    }
}
