use super::*;

/// `mining.authorize` request params: `["wallet.worker", "password"]`, the
/// password being optional and ignored.
#[derive(Debug, PartialEq, Clone)]
pub struct Authorize {
    pub username: Username,
    pub password: Option<String>,
}

impl Serialize for Authorize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.password {
            Some(password) => (&self.username, password).serialize(serializer),
            None => (&self.username,).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Authorize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One((Username,)),
            Two((Username, Option<String>)),
        }

        match Raw::deserialize(deserializer)? {
            Raw::One((username,)) => Ok(Authorize {
                username,
                password: None,
            }),
            Raw::Two((username, password)) => Ok(Authorize { username, password }),
        }
    }
}
