//! Payloads of the REST surface.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::dto::validation::validate_file_name;

/// Path parameter naming a stored file.
#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct FileNamePath {
    /// Stored file key as returned by the upload route.
    #[validate(custom(function = "validate_file_name"))]
    pub name: String,
}

/// Path parameter naming a request sub-type.
#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct RequestKindPath {
    /// Snake case request type, e.g. `get_qualifier_scores`.
    #[validate(length(min = 1, max = 64))]
    pub kind: String,
}

/// Result of a successful upload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Key under which the file can be downloaded.
    pub file_id: String,
}

/// Exchanged REST token.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// Bearer token accepted by the REST routes.
    pub token: String,
}
