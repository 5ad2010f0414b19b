use super::*;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
#[serde(untagged)]
pub enum Id {
    Null,
    Number(u64),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => write!(f, "null"),
            Id::Number(n) => write!(f, "{n}"),
            Id::String(s) => write!(f, "{s}"),
        }
    }
}

/// One line-delimited JSON-RPC frame. Responses carry the `jsonrpc` tag only
/// in the Monero dialect, so it stays optional and unserialized when absent.
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Message {
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    Response {
        id: Id,
        #[serde(skip_serializing_if = "Option::is_none")]
        jsonrpc: Option<String>,
        result: Option<Value>,
        error: Option<ErrorReply>,
    },
    Notification {
        #[serde(skip_serializing_if = "Option::is_none")]
        jsonrpc: Option<String>,
        method: String,
        params: Value,
    },
}

impl Message {
    pub fn response(id: Id, result: Value) -> Self {
        Message::Response {
            id,
            jsonrpc: None,
            result: Some(result),
            error: None,
        }
    }

    /// Response carrying the `"jsonrpc":"2.0"` tag (login dialect).
    pub fn response_v2(id: Id, result: Value) -> Self {
        Message::Response {
            id,
            jsonrpc: Some("2.0".into()),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Id, error: StratumError) -> Self {
        Message::Response {
            id,
            jsonrpc: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Message::Notification {
            jsonrpc: Some("2.0".into()),
            method: method.into(),
            params,
        }
    }
}

/// Miners disagree on whether notifications carry `"id":null` or no id at
/// all; both parse as notifications. Anything with a `result` or `error` key
/// is a response.
impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        let is_request = value.get("method").is_some() && value.get("id").is_some();

        let is_notification = value.get("method").is_some()
            && (value.get("id") == Some(&Value::Null) || value.get("id").is_none());

        let is_response = value.get("result").is_some() || value.get("error").is_some();

        if is_response {
            #[derive(Deserialize)]
            struct Resp {
                id: Id,
                jsonrpc: Option<String>,
                result: Option<Value>,
                error: Option<ErrorReply>,
            }

            let r: Resp = serde_json::from_value(value).map_err(de::Error::custom)?;

            Ok(Message::Response {
                id: r.id,
                jsonrpc: r.jsonrpc,
                result: r.result,
                error: r.error,
            })
        } else if is_notification {
            let method = value
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| de::Error::missing_field("method"))?
                .to_string();

            let params = value.get("params").cloned().unwrap_or(Value::Null);

            Ok(Message::Notification {
                jsonrpc: value.get("jsonrpc").and_then(Value::as_str).map(str::to_string),
                method,
                params,
            })
        } else if is_request {
            #[derive(Deserialize)]
            struct Req {
                id: Id,
                method: String,
                #[serde(default)]
                params: Value,
            }

            let r: Req = serde_json::from_value(value).map_err(de::Error::custom)?;

            Ok(Message::Request {
                id: r.id,
                method: r.method,
                params: r.params,
            })
        } else {
            Err(de::Error::custom("unknown message format"))
        }
    }
}
