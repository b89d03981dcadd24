use actix_web::{delete, get, patch, post, web, HttpResponse, Result as WebResult};
use bytes::Bytes;

use crate::api::middleware::AuthenticatedUser;
use crate::api::models::{ChatIdQuery, ChatRequest, ChatWithMessages, UpdateTitleRequest};
use crate::chat::{ChatError, Orchestrator};

// --- Chat turns ---

/// Runs one chat turn. Validation failures are answered with a status code;
/// once the user message is stored the response switches to the event
/// stream and always returns 200.
#[post("")]
pub async fn submit_turn(
    user: web::ReqData<AuthenticatedUser>,
    orchestrator: web::Data<Orchestrator>,
    req: web::Json<ChatRequest>,
) -> Result<HttpResponse, ChatError> {
    let turn = orchestrator.prepare(&user.id, req.into_inner()).await?;
    let mut rx = orchestrator.into_inner().spawn_turn(turn);

    let stream = async_stream::stream! {
        while let Some(part) = rx.recv().await {
            yield Ok::<Bytes, actix_web::Error>(Bytes::from(part.encode()));
        }
    };

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .streaming(stream))
}

#[delete("")]
pub async fn delete_chat(
    user: web::ReqData<AuthenticatedUser>,
    orchestrator: web::Data<Orchestrator>,
    query: web::Query<ChatIdQuery>,
) -> Result<HttpResponse, ChatError> {
    let id = match query.into_inner().id {
        Some(id) if !id.is_empty() => id,
        _ => return Ok(HttpResponse::NotFound().body("Not Found")),
    };

    orchestrator.delete_chat(&user.id, &id)?;
    Ok(HttpResponse::Ok().body("Chat deleted"))
}

// --- Chat metadata ---

#[get("/{id}")]
pub async fn get_chat(
    user: web::ReqData<AuthenticatedUser>,
    orchestrator: web::Data<Orchestrator>,
    id: web::Path<String>,
) -> Result<HttpResponse, ChatError> {
    let (chat, messages) = orchestrator.load_chat(&user.id, &id)?;
    Ok(HttpResponse::Ok().json(ChatWithMessages { chat, messages }))
}

#[patch("/{id}")]
pub async fn update_title(
    user: web::ReqData<AuthenticatedUser>,
    orchestrator: web::Data<Orchestrator>,
    id: web::Path<String>,
    req: web::Json<UpdateTitleRequest>,
) -> Result<HttpResponse, ChatError> {
    let title = match req.into_inner().title.map(|t| t.trim().to_string()) {
        Some(title) if !title.is_empty() => title,
        _ => return Err(ChatError::InvalidInput("Title is required".to_string())),
    };

    orchestrator.rename_chat(&user.id, &id, &title)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Chat title updated successfully" })))
}

#[get("/models")]
pub async fn list_models(orchestrator: web::Data<Orchestrator>) -> WebResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(orchestrator.models().all()))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_models).service(
        web::scope("/chat")
            .service(submit_turn)
            .service(delete_chat)
            .service(get_chat)
            .service(update_title),
    );
}
