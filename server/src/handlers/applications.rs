/// Application and document endpoints.
use crate::auth::RequestContext;
use crate::db::models::{ApplicationPatch, ApplicationSubmission, DocumentDescriptor};
use crate::error::{AppError, Result};
use crate::services::documents::{check_content_type, check_size, content_type_for_key, IncomingFile};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use bytes::BytesMut;
use futures::StreamExt;

const MAX_TEXT_FIELD_BYTES: usize = 1024;

/// List applications visible to the caller
/// GET /applications
pub async fn list_applications(
    state: web::Data<AppState>,
    ctx: RequestContext,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    Ok(HttpResponse::Ok().json(state.applications.list_applications(actor).await?))
}

/// Submit the completed admission form
/// POST /applications
pub async fn create_application(
    state: web::Data<AppState>,
    ctx: RequestContext,
    req: web::Json<ApplicationSubmission>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    let view = state
        .applications
        .create_application(req.into_inner(), actor)
        .await?;
    Ok(HttpResponse::Created().json(view))
}

/// GET /applications/{id}
pub async fn get_application(
    state: web::Data<AppState>,
    ctx: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    Ok(HttpResponse::Ok().json(state.applications.get_application(&id, actor).await?))
}

/// PATCH /applications/{id}
pub async fn update_application(
    state: web::Data<AppState>,
    ctx: RequestContext,
    id: web::Path<String>,
    req: web::Json<ApplicationPatch>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    let view = state
        .applications
        .update_application(&id, req.into_inner(), actor)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Replace one document slot on an application
/// PUT /applications/{id}/documents/{slot}
pub async fn attach_document(
    state: web::Data<AppState>,
    ctx: RequestContext,
    path: web::Path<(String, String)>,
    req: web::Json<DocumentDescriptor>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    let (id, slot) = path.into_inner();
    let view = state
        .applications
        .attach_document(&id, &slot, req.into_inner(), actor)
        .await?;
    Ok(HttpResponse::Ok().json(view))
}

fn multipart_error(e: actix_multipart::MultipartError) -> AppError {
    AppError::Validation(format!("Invalid upload: {}", e))
}

/// Read a file part, giving up as soon as it exceeds the upload limit.
async fn read_file_field(field: &mut Field) -> Result<BytesMut> {
    let mut data = BytesMut::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(multipart_error)?;
        check_size(data.len() + chunk.len())?;
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_text_field(field: &mut Field) -> Result<String> {
    let mut data = BytesMut::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(multipart_error)?;
        if data.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(AppError::Validation("Form field too long".to_string()));
        }
        data.extend_from_slice(&chunk);
    }
    String::from_utf8(data.to_vec())
        .map_err(|_| AppError::Validation("Form field is not valid UTF-8".to_string()))
}

/// Multipart upload with a `file` part and an optional `fieldName` slot
/// POST /upload-document
pub async fn upload_document(
    state: web::Data<AppState>,
    ctx: RequestContext,
    mut payload: Multipart,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;

    let mut file: Option<IncomingFile> = None;
    let mut slot: Option<String> = None;

    while let Some(field) = payload.next().await {
        let mut field = field.map_err(multipart_error)?;
        let (name, file_name) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(str::to_string),
            ),
            None => (String::new(), None),
        };

        match name.as_str() {
            "file" => {
                let content_type = field
                    .content_type()
                    .map(|mime| mime.essence_str().to_string())
                    .unwrap_or_default();
                check_content_type(&content_type)?;

                let data = read_file_field(&mut field).await?;
                file = Some(IncomingFile {
                    file_name: file_name.unwrap_or_else(|| "upload".to_string()),
                    content_type,
                    data: data.freeze(),
                });
            }
            "fieldName" => slot = Some(read_text_field(&mut field).await?),
            other => {
                log::debug!("Ignoring multipart field {:?}", other);
                while let Some(chunk) = field.next().await {
                    chunk.map_err(multipart_error)?;
                }
            }
        }
    }

    let file = file.ok_or_else(|| AppError::Validation("No file provided".to_string()))?;
    log::debug!("Upload of {} bytes from {}", file.data.len(), actor.id);
    let response = state
        .documents
        .upload_document(file, slot.as_deref(), &actor.id)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Serve a stored document
/// GET /uploads/{key}
pub async fn serve_upload(
    state: web::Data<AppState>,
    key: web::Path<String>,
) -> Result<HttpResponse> {
    let content_type =
        content_type_for_key(&key).ok_or_else(|| AppError::NotFound("Document".to_string()))?;
    let data = state
        .documents
        .store()
        .get(&key)
        .await?
        .ok_or_else(|| AppError::NotFound("Document".to_string()))?;
    Ok(HttpResponse::Ok().content_type(content_type).body(data))
}
