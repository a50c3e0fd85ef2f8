use actix_web::http::header;
use actix_web::web::{self, Path, Query};
use actix_web::{HttpResponse, Responder};

use crate::api::models::{
    DecisionRequest, DraftRequest, FormatQuery, GenerateRequest, NextNumberResponse,
    SubmitRequest, TemplateListResponse,
};
use crate::letters::LetterType;
use crate::pipeline::{OutputFormat, PipelineError, RenderedLetter};
use crate::registry::RegistryError;
use crate::sequence;
use crate::workflow::{WorkflowEngine, WorkflowError};
use crate::{storage, AppState, ErrorResponse};

fn letter_type(tag: &str) -> Result<LetterType, HttpResponse> {
    LetterType::from_tag(tag).ok_or_else(|| {
        HttpResponse::BadRequest().json(ErrorResponse::bad_request(&format!(
            "unknown letter type: {tag}"
        )))
    })
}

fn output_format(query: &FormatQuery) -> Result<OutputFormat, HttpResponse> {
    match query.format.as_deref() {
        None => Ok(OutputFormat::Docx),
        Some(raw) => OutputFormat::from_str(raw).ok_or_else(|| {
            HttpResponse::BadRequest().json(ErrorResponse::bad_request(&format!(
                "unsupported format: {raw}"
            )))
        }),
    }
}

fn attachment(letter: RenderedLetter) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(letter.mime)
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", letter.filename),
        ))
        .body(letter.bytes)
}

fn pipeline_error(e: PipelineError) -> HttpResponse {
    use crate::convert::ConvertError;
    use crate::template::TemplateError;
    match e {
        PipelineError::Template(TemplateError::NotFound(name)) => HttpResponse::NotFound()
            .json(ErrorResponse::not_found(&format!("template {name} not found"))),
        PipelineError::Template(TemplateError::InvalidName(name)) => HttpResponse::BadRequest()
            .json(ErrorResponse::bad_request(&format!(
                "invalid template name: {name}"
            ))),
        PipelineError::Template(e) => {
            log::error!("template error: {e}");
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("failed to load template"))
        }
        PipelineError::Render(e) => HttpResponse::UnprocessableEntity().json(
            ErrorResponse::new("UnprocessableEntity", &format!("template render failed: {e}")),
        ),
        PipelineError::Convert(ConvertError::TimedOut { .. }) => HttpResponse::GatewayTimeout()
            .json(ErrorResponse::new(
                "GatewayTimeout",
                "pdf conversion timed out",
            )),
        PipelineError::Convert(e) => {
            log::error!("pdf conversion failed: {e}");
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("pdf conversion failed"))
        }
        PipelineError::Registry(e) => registry_error(e),
    }
}

fn registry_error(e: RegistryError) -> HttpResponse {
    match e {
        RegistryError::DuplicateNumber(n) => HttpResponse::Conflict().json(ErrorResponse::new(
            "Conflict",
            &format!("registration number {n} already exists"),
        )),
        RegistryError::NotFound(id) => HttpResponse::NotFound()
            .json(ErrorResponse::not_found(&format!("document {id} not found"))),
        RegistryError::Conflict(_) => HttpResponse::Conflict().json(ErrorResponse::new(
            "Conflict",
            "document was modified concurrently, retry",
        )),
        RegistryError::Backend(e) => {
            log::error!("registry backend error: {e}");
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("registry unavailable"))
        }
    }
}

fn workflow_error(e: WorkflowError) -> HttpResponse {
    match e {
        WorkflowError::NotFound(id) => HttpResponse::NotFound()
            .json(ErrorResponse::not_found(&format!("document {id} not found"))),
        WorkflowError::Forbidden => HttpResponse::Forbidden().json(ErrorResponse::new(
            "Forbidden",
            "actor has no pending approval on this document",
        )),
        WorkflowError::InvalidTransition { action, status } => HttpResponse::BadRequest().json(
            ErrorResponse::bad_request(&format!("cannot {action} a {status} document")),
        ),
        WorkflowError::Registry(e) => registry_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Letter Service",
    post,
    path = "/surat/{tipe}/generate",
    request_body = GenerateRequest,
    params(
        ("tipe" = String, Path, description = "Letter type tag, e.g. surat_tugas"),
        FormatQuery
    ),
    responses(
        (status = 200, description = "Generated letter binary", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 400, description = "Unknown letter type or format, or non-object payload", body = ErrorResponse),
        (status = 409, description = "Registration number already taken", body = ErrorResponse),
        (status = 422, description = "Template could not be rendered", body = ErrorResponse)
    )
)]
pub async fn generate_letter(
    tipe: Path<String>,
    query: Query<FormatQuery>,
    req: web::Json<GenerateRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    let ty = match letter_type(&tipe) {
        Ok(ty) => ty,
        Err(resp) => return resp,
    };
    let format = match output_format(&query) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let preview = query.preview.unwrap_or(false);

    let req = req.into_inner();
    let mut payload = req.data;
    if !payload.is_object() {
        return HttpResponse::BadRequest()
            .json(ErrorResponse::bad_request("data must be a JSON object"));
    }
    if let Some(number) = req.nomor_surat {
        if let Some(map) = payload.as_object_mut() {
            map.insert("nomor_surat".to_string(), number.into());
        }
    }
    let created_by = req.actor.as_ref().map_or(0, |a| a.id);

    match data.pipeline.issue(ty, &payload, format, preview, created_by).await {
        Ok(letter) => attachment(letter),
        Err(e) => pipeline_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Letter Service",
    get,
    path = "/surat/{tipe}/next-number",
    params(
        ("tipe" = String, Path, description = "Letter type tag"),
        ("jenis_surat" = Option<String>, Query, description = "Sub-kind used by prefixed numbering")
    ),
    responses(
        (status = 200, description = "Next registration number", body = NextNumberResponse),
        (status = 400, description = "Unknown letter type", body = ErrorResponse)
    )
)]
pub async fn next_number(
    tipe: Path<String>,
    query: Query<std::collections::HashMap<String, String>>,
    data: web::Data<AppState>,
) -> impl Responder {
    let ty = match letter_type(&tipe) {
        Ok(ty) => ty,
        Err(resp) => return resp,
    };
    let jenis = query.get("jenis_surat").map(String::as_str);
    match sequence::next_number(data.registry.as_ref(), ty, jenis, chrono::Utc::now()).await {
        Ok(number) => HttpResponse::Ok().json(NextNumberResponse { nomor_surat: number }),
        Err(e) => registry_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Letter Service",
    get,
    path = "/templates",
    responses(
        (status = 200, description = "Available template files", body = TemplateListResponse)
    )
)]
pub async fn list_templates(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(TemplateListResponse {
        templates: data.pipeline.templates().list(),
    })
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    post,
    path = "/surat/{tipe}/draft",
    request_body = DraftRequest,
    params(("tipe" = String, Path, description = "Letter type tag")),
    responses(
        (status = 201, description = "Draft registered", body = crate::registry::Document),
        (status = 400, description = "Unknown letter type", body = ErrorResponse),
        (status = 409, description = "Registration number already taken", body = ErrorResponse)
    )
)]
pub async fn create_draft(
    tipe: Path<String>,
    req: web::Json<DraftRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    let ty = match letter_type(&tipe) {
        Ok(ty) => ty,
        Err(resp) => return resp,
    };
    let req = req.into_inner();
    match data
        .workflow
        .create_draft(ty, req.nomor_surat, req.data, &req.actor)
        .await
    {
        Ok(doc) => HttpResponse::Created().json(doc),
        Err(e) => workflow_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    post,
    path = "/documents/{id}/submit",
    request_body = SubmitRequest,
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Draft submitted for review", body = crate::registry::Document),
        (status = 400, description = "Document is not a draft", body = ErrorResponse),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
pub async fn submit_document(
    id: Path<i64>,
    req: web::Json<SubmitRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    match data.workflow.submit(id.into_inner(), &req.actor).await {
        Ok(doc) => HttpResponse::Ok().json(doc),
        Err(e) => workflow_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    post,
    path = "/documents/{id}/approve",
    request_body = DecisionRequest,
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Approval recorded", body = crate::registry::Document),
        (status = 400, description = "Document is not under review", body = ErrorResponse),
        (status = 403, description = "No pending step for this actor", body = ErrorResponse),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
pub async fn approve_document(
    id: Path<i64>,
    req: web::Json<DecisionRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    let req = req.into_inner();
    match data
        .workflow
        .approve(id.into_inner(), &req.actor, req.comments, req.signature)
        .await
    {
        Ok(doc) => HttpResponse::Ok().json(doc),
        Err(e) => workflow_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    post,
    path = "/documents/{id}/reject",
    request_body = DecisionRequest,
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Rejection recorded", body = crate::registry::Document),
        (status = 400, description = "Document is not under review", body = ErrorResponse),
        (status = 403, description = "No pending step for this actor", body = ErrorResponse),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
pub async fn reject_document(
    id: Path<i64>,
    req: web::Json<DecisionRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    let req = req.into_inner();
    match data
        .workflow
        .reject(id.into_inner(), &req.actor, req.comments)
        .await
    {
        Ok(doc) => HttpResponse::Ok().json(doc),
        Err(e) => workflow_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    post,
    path = "/documents/{id}/generate",
    request_body = SubmitRequest,
    params(
        ("id" = i64, Path, description = "Document id"),
        FormatQuery
    ),
    responses(
        (status = 200, description = "Final letter binary", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 400, description = "Document is not approved", body = ErrorResponse),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
pub async fn generate_document(
    id: Path<i64>,
    query: Query<FormatQuery>,
    req: web::Json<SubmitRequest>,
    data: web::Data<AppState>,
) -> impl Responder {
    let format = match output_format(&query) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let id = id.into_inner();

    let doc = match data.registry.find_by_id(id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => return workflow_error(WorkflowError::NotFound(id)),
        Err(e) => return registry_error(e),
    };

    // Refuse before rendering so an invalid transition leaves nothing on
    // disk. `mark_generated` re-checks under the document lock.
    if let Err(e) = WorkflowEngine::generation_allowed(&doc) {
        return workflow_error(e);
    }

    let letter = match data.pipeline.regenerate(&doc, format).await {
        Ok(letter) => letter,
        Err(e) => return pipeline_error(e),
    };

    let path = match storage::save_generated(&data.output_dir, &letter.filename, &letter.bytes)
        .await
    {
        Ok(path) => path,
        Err(e) => {
            log::error!("failed to store generated letter {id}: {e}");
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("failed to store letter"));
        }
    };

    match data.workflow.mark_generated(id, &req.actor, path.clone()).await {
        Ok(_) => attachment(letter),
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                log::warn!("could not remove orphaned letter file {path}: {rm}");
            }
            workflow_error(e)
        }
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    get,
    path = "/documents/{id}",
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document record", body = crate::registry::Document),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
pub async fn get_document(id: Path<i64>, data: web::Data<AppState>) -> impl Responder {
    let id = id.into_inner();
    match data.registry.find_by_id(id).await {
        Ok(Some(doc)) => HttpResponse::Ok().json(doc),
        Ok(None) => workflow_error(WorkflowError::NotFound(id)),
        Err(e) => registry_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    get,
    path = "/documents/{id}/history",
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Audit trail, newest first", body = [crate::registry::HistoryEntry]),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
pub async fn get_history(id: Path<i64>, data: web::Data<AppState>) -> impl Responder {
    let id = id.into_inner();
    match data.registry.find_by_id(id).await {
        Ok(Some(doc)) => {
            let mut history = doc.history;
            history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            HttpResponse::Ok().json(history)
        }
        Ok(None) => workflow_error(WorkflowError::NotFound(id)),
        Err(e) => registry_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    get,
    path = "/documents/{id}/approvals",
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Approval steps in level order", body = [crate::registry::ApprovalStep]),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
pub async fn get_approvals(id: Path<i64>, data: web::Data<AppState>) -> impl Responder {
    let id = id.into_inner();
    match data.registry.find_by_id(id).await {
        Ok(Some(doc)) => {
            let mut steps = doc.steps;
            steps.sort_by_key(|s| s.level);
            HttpResponse::Ok().json(steps)
        }
        Ok(None) => workflow_error(WorkflowError::NotFound(id)),
        Err(e) => registry_error(e),
    }
}

#[utoipa::path(
    context_path = "/api",
    tag = "Workflow Service",
    get,
    path = "/documents/{id}/download",
    params(
        ("id" = i64, Path, description = "Document id"),
        FormatQuery
    ),
    responses(
        (status = 200, description = "Stored or regenerated letter binary", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
pub async fn download_document(
    id: Path<i64>,
    query: Query<FormatQuery>,
    data: web::Data<AppState>,
) -> impl Responder {
    let format = match output_format(&query) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let id = id.into_inner();

    let doc = match data.registry.find_by_id(id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => return workflow_error(WorkflowError::NotFound(id)),
        Err(e) => return registry_error(e),
    };

    // Serve the stored binary when it is still on disk and the requested
    // format matches; otherwise rebuild from the stored payload.
    if query.format.is_none() || doc_matches_format(&doc.file_path, format) {
        if let Some(path) = &doc.file_path {
            if let Ok(bytes) = storage::read_generated(path).await {
                let filename = std::path::Path::new(path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("surat_{id}.{}", format.extension()));
                let mime = if filename.ends_with(".pdf") {
                    crate::pipeline::PDF_MIME
                } else {
                    crate::pipeline::DOCX_MIME
                };
                return HttpResponse::Ok()
                    .content_type(mime)
                    .insert_header((
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ))
                    .body(bytes);
            }
            log::warn!("stored file for document {id} is missing, regenerating");
        }
    }

    match data.pipeline.regenerate(&doc, format).await {
        Ok(letter) => attachment(letter),
        Err(e) => pipeline_error(e),
    }
}

fn doc_matches_format(file_path: &Option<String>, format: OutputFormat) -> bool {
    file_path
        .as_deref()
        .is_some_and(|p| p.ends_with(&format!(".{}", format.extension())))
}
