use super::*;

/// A share submission, accepted in both dialects:
///
/// - standard positional params
///   `["wallet.worker", "<job_id>", "<extranonce2>", "<ntime>", "<nonce>"]`
/// - Monero-style object params
///   `{"id": "...", "job_id": "...", "nonce": "...", "result": "..."}`
///
/// Only the job id and the nonce matter for validation; the optional result
/// hash is what the miner thinks it computed and is recomputed server-side
/// anyway.
#[derive(Debug, Clone, PartialEq)]
pub struct Submit {
    pub worker: Option<Username>,
    pub job_id: String,
    pub nonce: Nonce,
    pub result_hash: Option<String>,
}

impl Serialize for Submit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut object = serde_json::Map::new();
        object.insert("job_id".into(), json!(self.job_id));
        object.insert("nonce".into(), json!(self.nonce.to_string()));
        if let Some(result) = &self.result_hash {
            object.insert("result".into(), json!(result));
        }
        Value::Object(object).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Submit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Standard((Username, String, String, String, Nonce)),
            Monero {
                #[serde(default)]
                id: Option<String>,
                job_id: String,
                nonce: Nonce,
                #[serde(default)]
                result: Option<String>,
            },
        }

        match Raw::deserialize(deserializer)? {
            Raw::Standard((worker, job_id, _extranonce2, _ntime, nonce)) => Ok(Submit {
                worker: Some(worker),
                job_id,
                nonce,
                result_hash: None,
            }),
            Raw::Monero {
                id: _,
                job_id,
                nonce,
                result,
            } => Ok(Submit {
                worker: None,
                job_id,
                nonce,
                result_hash: result,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_positional_params() {
        let submit: Submit = serde_json::from_str(
            r#"["JWALLET123.w1","66aa012300000007","00000001","504e86ed","01000000"]"#,
        )
        .unwrap();

        assert_eq!(submit.worker, Some("JWALLET123.w1".into()));
        assert_eq!(submit.job_id, "66aa012300000007");
        assert_eq!(u32::from(submit.nonce), 1);
        assert_eq!(submit.result_hash, None);
    }

    #[test]
    fn monero_object_params() {
        let submit: Submit = serde_json::from_str(
            r#"{"id":"sess","job_id":"66aa012300000007","nonce":"efbeadde","result":"00ff"}"#,
        )
        .unwrap();

        assert_eq!(submit.worker, None);
        assert_eq!(submit.job_id, "66aa012300000007");
        assert_eq!(u32::from(submit.nonce), 0xdead_beef);
        assert_eq!(submit.result_hash.as_deref(), Some("00ff"));
    }

    #[test]
    fn object_form_roundtrips() {
        let submit: Submit =
            serde_json::from_str(r#"{"job_id":"aa","nonce":"01000000"}"#).unwrap();
        let json = serde_json::to_string(&submit).unwrap();
        let back: Submit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, submit);
    }

    #[test]
    fn rejects_malformed_submits() {
        // too few positional params
        assert!(serde_json::from_str::<Submit>(r#"["w","j","e2","t"]"#).is_err());
        // missing nonce
        assert!(serde_json::from_str::<Submit>(r#"{"job_id":"aa"}"#).is_err());
        // nonce of the wrong width
        assert!(serde_json::from_str::<Submit>(r#"{"job_id":"aa","nonce":"0100"}"#).is_err());
    }
}
