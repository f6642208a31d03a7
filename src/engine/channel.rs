use rand::Rng;
use sha2::{Digest, Sha256};

use super::model::{ApiKeyRequestStatus, InputType, IngestionChannelState, Project};
use crate::error::EngineError;

const API_KEY_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn generate_api_key() -> String {
    let mut rng = rand::rng();
    (0..64).map(|_| API_KEY_CHARSET[rng.random_range(0..API_KEY_CHARSET.len())] as char).collect()
}

fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate that an ingestion write on `channel` matches the project's
/// active `inputType` (§4.8, last paragraph).
pub fn assert_channel_matches(project: &Project, channel: InputType) -> Result<(), EngineError> {
    if project.channel.input_type != channel {
        return Err(EngineError::ChannelMismatch {
            expected: project.channel.input_type.as_str().to_string(),
            got: channel.as_str().to_string(),
        });
    }
    match channel {
        InputType::Api if !project.channel.api_status => {
            Err(EngineError::ChannelMismatch { expected: "connected".into(), got: "disconnected".into() })
        }
        InputType::Iot if !project.channel.iot_status => {
            Err(EngineError::ChannelMismatch { expected: "connected".into(), got: "disconnected".into() })
        }
        _ => Ok(()),
    }
}

/// `switchInputType`: clears the opposite channel's credentials, records
/// `originalInputType`, leaves any pending key request intact.
pub fn switch_input_type(state: &mut IngestionChannelState, new_type: InputType) {
    state.original_input_type = Some(state.input_type.as_str().to_string());
    match new_type {
        InputType::Api => {
            state.iot_device_id = None;
            state.iot_status = false;
        }
        InputType::Iot => {
            state.api_endpoint = None;
            state.api_status = false;
        }
        InputType::Manual => {
            state.api_endpoint = None;
            state.api_status = false;
            state.iot_device_id = None;
            state.iot_status = false;
        }
    }
    state.input_type = new_type;
}

pub fn disconnect(state: &mut IngestionChannelState) -> Result<(), EngineError> {
    match state.input_type {
        InputType::Api => state.api_status = false,
        InputType::Iot => state.iot_status = false,
        InputType::Manual => {
            return Err(EngineError::ValidationError("manual channel has no connection lifecycle".into()));
        }
    }
    Ok(())
}

pub fn reconnect(state: &mut IngestionChannelState, updated_endpoint: Option<String>) -> Result<(), EngineError> {
    match state.input_type {
        InputType::Api => {
            if state.api_endpoint.is_none() && updated_endpoint.is_none() {
                return Err(EngineError::ValidationError("no API endpoint configured".into()));
            }
            if let Some(ep) = updated_endpoint {
                state.api_endpoint = Some(ep);
            }
            state.api_status = true;
        }
        InputType::Iot => {
            if state.iot_device_id.is_none() {
                return Err(EngineError::ValidationError("no IoT device configured".into()));
            }
            state.iot_status = true;
        }
        InputType::Manual => {
            return Err(EngineError::ValidationError("manual channel has no connection lifecycle".into()));
        }
    }
    Ok(())
}

/// `none -> pending -> (approved | rejected)`. On `approved`, binds the
/// endpoint to a key-scoped URL that later auto-synthesis must not
/// overwrite (§4.8).
pub fn request_api_key(state: &mut IngestionChannelState) -> Result<(), EngineError> {
    if state.api_key_request_status != ApiKeyRequestStatus::None {
        return Err(EngineError::Conflict("an API key request is already in flight".into()));
    }
    state.api_key_request_status = ApiKeyRequestStatus::Pending;
    Ok(())
}

/// On approval, mints a new API key, stores only its hash, and hands the
/// plaintext back to the caller once (it cannot be recovered afterwards).
pub fn resolve_api_key_request(
    state: &mut IngestionChannelState,
    approved: bool,
    bound_endpoint: Option<String>,
) -> Result<Option<String>, EngineError> {
    if state.api_key_request_status != ApiKeyRequestStatus::Pending {
        return Err(EngineError::ValidationError("no pending API key request".into()));
    }
    if approved {
        state.api_key_request_status = ApiKeyRequestStatus::Approved;
        if let Some(ep) = bound_endpoint {
            state.api_endpoint = Some(ep);
        }
        state.api_status = true;
        let key = generate_api_key();
        state.api_key_hash = Some(hash_api_key(&key));
        Ok(Some(key))
    } else {
        state.api_key_request_status = ApiKeyRequestStatus::Rejected;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::{Methodology, ProjectMetadata};

    fn project_with_channel(input_type: InputType) -> Project {
        Project {
            client_id: "C1".into(),
            project_id: "C1-RED-C1-0001".into(),
            methodology: Methodology::M1,
            metadata: ProjectMetadata {
                project_name: "Test".into(),
                category: None,
                scope: None,
                location_place: None,
                location_address: None,
                location_lat_lon: None,
            },
            m1: Default::default(),
            m2: Default::default(),
            m3: Default::default(),
            channel: IngestionChannelState { input_type, ..Default::default() },
            is_deleted: false,
        }
    }

    #[test]
    fn channel_mismatch_rejects_wrong_type() {
        let project = project_with_channel(InputType::Manual);
        let err = assert_channel_matches(&project, InputType::Api).unwrap_err();
        matches!(err, EngineError::ChannelMismatch { .. });
    }

    #[test]
    fn switch_clears_opposite_credentials() {
        let mut state = IngestionChannelState {
            input_type: InputType::Api,
            api_endpoint: Some("https://x".into()),
            api_status: true,
            ..Default::default()
        };
        switch_input_type(&mut state, InputType::Iot);
        assert!(state.api_endpoint.is_none());
        assert!(!state.api_status);
        assert_eq!(state.original_input_type.as_deref(), Some("API"));
    }

    #[test]
    fn reconnect_without_credentials_fails() {
        let mut state = IngestionChannelState { input_type: InputType::Iot, ..Default::default() };
        assert!(reconnect(&mut state, None).is_err());
    }

    #[test]
    fn duplicate_key_request_conflicts() {
        let mut state = IngestionChannelState::default();
        request_api_key(&mut state).unwrap();
        assert!(request_api_key(&mut state).is_err());
    }

    #[test]
    fn approved_request_mints_key_and_stores_only_its_hash() {
        let mut state = IngestionChannelState::default();
        request_api_key(&mut state).unwrap();
        let key = resolve_api_key_request(&mut state, true, Some("https://x".into())).unwrap();
        let key = key.expect("approval must return the plaintext key");
        assert_eq!(key.len(), 64);
        assert_eq!(state.api_key_hash.as_deref(), Some(hash_api_key(&key).as_str()));
        assert_ne!(state.api_key_hash.as_deref(), Some(key.as_str()));
        assert_eq!(state.api_key_request_status, ApiKeyRequestStatus::Approved);
    }

    #[test]
    fn rejected_request_mints_no_key() {
        let mut state = IngestionChannelState::default();
        request_api_key(&mut state).unwrap();
        let key = resolve_api_key_request(&mut state, false, None).unwrap();
        assert!(key.is_none());
        assert!(state.api_key_hash.is_none());
    }
}
