use actix_web::{get, web, HttpResponse};

use crate::api::middleware::AuthenticatedUser;
use crate::api::models::{DocumentQuery, SuggestionsQuery};
use crate::chat::ChatError;
use crate::db::{self, service::DbService, DbPool};

/// Every snapshot of a document, oldest first.
#[get("/document")]
pub async fn document_history(
    user: web::ReqData<AuthenticatedUser>,
    pool: web::Data<DbPool>,
    query: web::Query<DocumentQuery>,
) -> Result<HttpResponse, ChatError> {
    let conn = db::lock(&pool)?;
    let history = DbService::get_document_history(&conn, &query.id)?;

    match history.last() {
        None => Err(ChatError::NotFound(format!("Document '{}'", query.id))),
        Some(latest) if latest.user_id != user.id => Err(ChatError::OwnershipViolation),
        Some(_) => Ok(HttpResponse::Ok().json(history)),
    }
}

#[get("/suggestions")]
pub async fn document_suggestions(
    user: web::ReqData<AuthenticatedUser>,
    pool: web::Data<DbPool>,
    query: web::Query<SuggestionsQuery>,
) -> Result<HttpResponse, ChatError> {
    let conn = db::lock(&pool)?;
    match DbService::get_document(&conn, &query.document_id)? {
        None => return Err(ChatError::NotFound(format!("Document '{}'", query.document_id))),
        Some(doc) if doc.user_id != user.id => return Err(ChatError::OwnershipViolation),
        Some(_) => {}
    }

    let suggestions = DbService::get_suggestions(&conn, &query.document_id)?;
    Ok(HttpResponse::Ok().json(suggestions))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(document_history).service(document_suggestions);
}
