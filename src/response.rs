//! Structured results handed back to the transport layer.

use facetrack_vision::{BoundingBox, Landmarks};
use serde::Serialize;

use crate::error::Result;
use crate::store::{Identity, IdentityId};
use crate::tracker::Outcome;

/// One face of a continuously recognized frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceResult {
    pub identity_id: Option<IdentityId>,
    pub display_name: String,
    pub bbox: BoundingBox,
    pub probability: f32,
    pub landmarks: Landmarks,
    pub outcome: Outcome,
    /// Taken from the previous frame without re-encoding.
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollResponse {
    pub success: bool,
    pub message: String,
    pub identity_id: Option<IdentityId>,
}

impl From<Result<Identity>> for EnrollResponse {
    fn from(result: Result<Identity>) -> Self {
        match result {
            Ok(identity) => Self {
                success: true,
                message: format!("registered {} as identity {}", identity.name, identity.id),
                identity_id: Some(identity.id),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
                identity_id: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub identity_name: Option<String>,
}

impl From<Result<Identity>> for AuthResponse {
    fn from(result: Result<Identity>) -> Self {
        match result {
            Ok(identity) => Self {
                success: true,
                message: format!("authenticated, welcome {}", identity.name),
                identity_name: Some(identity.name),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
                identity_name: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_failed_enrollment_has_no_id() {
        let response = EnrollResponse::from(Err(Error::NoFaceDetected));
        assert!(!response.success);
        assert_eq!(response.message, "no face detected");
        assert!(response.identity_id.is_none());
    }

    #[test]
    fn test_auth_response_serializes() {
        let response = AuthResponse::from(Err(Error::UnknownFace));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["identity_name"].is_null());
    }
}
