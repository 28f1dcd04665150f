//! Request and result blobs exchanged with a remote runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use xp_types::{validation_error, AggregateResult, Configuration, Dataset, XpResult};

/// Everything a remote runner needs to execute one sweep.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SweepRequest {
    pub id: Uuid,
    pub configurations: Vec<Configuration>,
    pub datasets: Vec<Dataset>,
    pub pool_size: usize,
    pub seed: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Borrowed twin of [`SweepRequest`] so encoding never clones the datasets.
#[derive(Serialize)]
struct RequestBody<'a> {
    id: Uuid,
    configurations: &'a [Configuration],
    datasets: &'a [Dataset],
    pool_size: usize,
    seed: Option<u64>,
    created_at: DateTime<Utc>,
}

impl SweepRequest {
    /// Transfer name of the request blob.
    pub fn name(&self) -> String {
        request_name(self.id)
    }

    pub fn to_bytes(&self) -> XpResult<Vec<u8>> {
        encode_request(
            self.id,
            self.created_at,
            &self.configurations,
            &self.datasets,
            self.pool_size,
            self.seed,
        )
    }

    pub fn from_bytes(bytes: &[u8]) -> XpResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub(crate) fn encode_request(
    id: Uuid,
    created_at: DateTime<Utc>,
    configurations: &[Configuration],
    datasets: &[Dataset],
    pool_size: usize,
    seed: Option<u64>,
) -> XpResult<Vec<u8>> {
    let body = RequestBody {
        id,
        configurations,
        datasets,
        pool_size,
        seed,
        created_at,
    };
    Ok(serde_json::to_vec(&body)?)
}

pub fn request_name(id: Uuid) -> String {
    id.simple().to_string()
}

/// Name the runner writes the results of request `name` under.
pub fn result_name(name: &str) -> String {
    format!("result_{name}")
}

/// Transfer names must be plain file names.
pub(crate) fn check_transfer_name(name: &str) -> XpResult<()> {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        Ok(())
    } else {
        Err(validation_error!("invalid transfer name {:?}", name))
    }
}

pub fn encode_results(results: &[AggregateResult]) -> XpResult<Vec<u8>> {
    Ok(serde_json::to_vec(results)?)
}

pub fn decode_results(bytes: &[u8]) -> XpResult<Vec<AggregateResult>> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xp_types::{Buffer, XpError};

    fn sample_dataset() -> Dataset {
        let inputs = Buffer::new(vec![3, 2], vec![0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();
        let labels = Buffer::vector(vec![1i64, 0, 1]);
        Dataset::new(inputs.clone(), labels.clone(), inputs, labels)
    }

    #[test]
    fn request_survives_encoding() {
        let configurations = vec![Configuration::new(4, 1, 100, 0.01, 0.9)];
        let datasets = vec![sample_dataset()];
        let id = Uuid::new_v4();

        let bytes = encode_request(id, Utc::now(), &configurations, &datasets, 3, Some(42)).unwrap();
        let request = SweepRequest::from_bytes(&bytes).unwrap();

        assert_eq!(request.id, id);
        assert_eq!(request.configurations, configurations);
        assert_eq!(request.datasets, datasets);
        assert_eq!(request.pool_size, 3);
        assert_eq!(request.seed, Some(42));

        let again = SweepRequest::from_bytes(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(again, request);
    }

    #[test]
    fn result_names_follow_convention() {
        let id = Uuid::new_v4();
        let name = request_name(id);
        assert_eq!(name.len(), 32);
        assert_eq!(result_name(&name), format!("result_{name}"));
        assert!(check_transfer_name(&result_name(&name)).is_ok());
    }

    #[test]
    fn transfer_names_reject_paths() {
        assert!(matches!(
            check_transfer_name("../secrets"),
            Err(XpError::Validation(_))
        ));
        assert!(check_transfer_name("").is_err());
    }

    #[test]
    fn request_with_inconsistent_buffer_is_rejected() {
        let bytes = encode_request(
            Uuid::new_v4(),
            Utc::now(),
            &[Configuration::new(4, 1, 100, 0.01, 0.9)],
            &[sample_dataset()],
            1,
            None,
        )
        .unwrap();
        let blob = String::from_utf8(bytes).unwrap();
        // claim one more input row than the data holds
        let tampered = blob.replacen("\"shape\":[3,2]", "\"shape\":[4,2]", 1);
        assert_ne!(tampered, blob);

        let err = SweepRequest::from_bytes(tampered.as_bytes()).unwrap_err();
        match err {
            XpError::Serialization(e) => assert!(e.to_string().contains("needs 8 elements")),
            other => panic!("Expected Serialization, got {other:?}"),
        }
    }

    #[test]
    fn garbage_blob_is_a_serialization_error() {
        let err = decode_results(b"not json").unwrap_err();
        assert!(matches!(err, XpError::Serialization(_)));
    }
}
