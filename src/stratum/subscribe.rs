use super::*;

/// `mining.subscribe` request params. Everything is optional; stock miners
/// send `[]` or `["agent/version"]`.
#[derive(Debug, PartialEq, Default)]
pub struct Subscribe {
    pub user_agent: Option<String>,
}

impl<'de> Deserialize<'de> for Subscribe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let params = Vec::<Value>::deserialize(deserializer)?;
        let user_agent = params
            .first()
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Subscribe { user_agent })
    }
}

impl Serialize for Subscribe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.user_agent {
            Some(agent) => vec![agent.clone()].serialize(serializer),
            None => Vec::<String>::new().serialize(serializer),
        }
    }
}

/// `mining.subscribe` response payload:
/// `[[["mining.notify", <session>]], <extranonce1>, <extranonce2_size>]`.
#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeResult {
    pub subscriptions: Vec<(String, String)>,
    pub extranonce1: String,
    pub extranonce2_size: u32,
}

impl SubscribeResult {
    /// The standard shape for a fresh session: the session id doubles as the
    /// notify subscription tag, its first 8 hex chars as extranonce1.
    pub fn for_session(session_id: &str) -> Self {
        Self {
            subscriptions: vec![("mining.notify".into(), session_id.into())],
            extranonce1: session_id.chars().take(8).collect(),
            extranonce2_size: 4,
        }
    }
}

impl Serialize for SubscribeResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (
            &self.subscriptions,
            &self.extranonce1,
            self.extranonce2_size,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SubscribeResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (subscriptions, extranonce1, extranonce2_size) =
            <(Vec<(String, String)>, String, u32)>::deserialize(deserializer)?;

        Ok(SubscribeResult {
            subscriptions,
            extranonce1,
            extranonce2_size,
        })
    }
}
