use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::registry::ActorRef;
use crate::template::Template;

/// Body for direct generation and preview of ungated letters.
#[derive(Debug, Deserialize, ToSchema)]
pub struct GenerateRequest {
    /// Registration number to use verbatim; minted when absent.
    pub nomor_surat: Option<String>,
    /// Template merge fields, free-form per letter type.
    #[schema(value_type = Object)]
    pub data: Value,
    pub actor: Option<ActorRef>,
}

/// Body for registering a draft in the approval workflow.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DraftRequest {
    pub nomor_surat: Option<String>,
    #[schema(value_type = Object)]
    pub data: Value,
    pub actor: ActorRef,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitRequest {
    pub actor: ActorRef,
}

/// Body for an approve or reject decision.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DecisionRequest {
    pub actor: ActorRef,
    pub comments: Option<String>,
    /// Data-URL or storage key of the approver's signature image.
    pub signature: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FormatQuery {
    /// `docx` (default) or `pdf`.
    pub format: Option<String>,
    /// Previews are watermarked and never registered or stored.
    pub preview: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NextNumberResponse {
    pub nomor_surat: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TemplateListResponse {
    pub templates: Vec<Template>,
}
