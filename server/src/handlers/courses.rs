/// Course catalog endpoints.
use crate::auth::RequestContext;
use crate::db::models::{CourseInput, CoursePatch};
use crate::error::Result;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /courses
pub async fn list_courses(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.courses.list().await?))
}

/// GET /courses/{id}
pub async fn get_course(state: web::Data<AppState>, id: web::Path<String>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.courses.get(&id).await?))
}

/// POST /courses (admin)
pub async fn create_course(
    state: web::Data<AppState>,
    ctx: RequestContext,
    req: web::Json<CourseInput>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    let course = state.courses.create(req.into_inner(), actor).await?;
    Ok(HttpResponse::Created().json(course))
}

/// PATCH /courses/{id} (admin)
pub async fn update_course(
    state: web::Data<AppState>,
    ctx: RequestContext,
    id: web::Path<String>,
    req: web::Json<CoursePatch>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    let course = state.courses.update(&id, req.into_inner(), actor).await?;
    Ok(HttpResponse::Ok().json(course))
}

/// DELETE /courses/{id} (admin)
pub async fn delete_course(
    state: web::Data<AppState>,
    ctx: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse> {
    let actor = ctx.require_user()?;
    state.courses.delete(&id, actor).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}
