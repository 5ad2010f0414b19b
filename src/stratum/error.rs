use {super::*, snafu::Snafu};

/// Error codes echoed to miners as a JSON-RPC error tuple
/// `[code, message, null]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StratumError {
    UnknownMethod = -1,
    MalformedSubmit = 20,
    UnknownJob = 21,
    LowDifficulty = 23,
}

impl fmt::Display for StratumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::UnknownMethod => "Unknown method",
            Self::MalformedSubmit => "Malformed submit",
            Self::UnknownJob => "Unknown job",
            Self::LowDifficulty => "Low difficulty share",
        };
        write!(f, "{message}")
    }
}

/// Wire form of a [`StratumError`].
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReply {
    pub error: StratumError,
}

impl From<StratumError> for ErrorReply {
    fn from(error: StratumError) -> Self {
        Self { error }
    }
}

impl Serialize for ErrorReply {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.error as i32, self.error.to_string(), Option::<Value>::None).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ErrorReply {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (code, _message, _traceback) = <(i32, String, Option<Value>)>::deserialize(deserializer)?;

        let error = match code {
            -1 => StratumError::UnknownMethod,
            20 => StratumError::MalformedSubmit,
            21 => StratumError::UnknownJob,
            23 => StratumError::LowDifficulty,
            _ => return Err(de::Error::custom(format!("unknown stratum error code: {code}"))),
        };

        Ok(Self { error })
    }
}

/// Parse failures on typed wire values.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProtocolError {
    #[snafu(display("Parse error: {message}"))]
    Parse { message: String },

    #[snafu(display("Invalid length: expected {expected}, got {actual}"))]
    InvalidLength { expected: usize, actual: usize },

    #[snafu(display("Invalid hex: {source}"))]
    Hex { source: hex::FromHexError },
}
