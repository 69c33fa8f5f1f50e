//! HTTP handlers for account, application and member routes

use crate::auth::Authenticated;
use crate::server::error::ApiError;
use crate::server::hub::PublishReport;
use crate::server::protocol::Envelope;
use crate::server::AppState;
use crate::storage::{ApplicationRecord, StorageError, UserRecord};
use crate::topics::DPY_MOD_LOG;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

/// Applications a single user may own, invalidated ones included
pub const MAX_APPLICATIONS: usize = 25;

const NAME_LEN: std::ops::RangeInclusive<usize> = 3..=32;
const MAX_DESCRIPTION_LEN: usize = 512;

pub async fn health() -> &'static str {
    "ok"
}

fn user_of(auth: &Authenticated) -> Result<&UserRecord, ApiError> {
    auth.principal.as_user().ok_or(ApiError::Forbidden)
}

fn application_of(auth: &Authenticated) -> Result<&ApplicationRecord, ApiError> {
    auth.principal.as_application().ok_or(ApiError::Forbidden)
}

pub async fn at_me(Extension(auth): Extension<Authenticated>) -> Result<Json<UserRecord>, ApiError> {
    Ok(Json(user_of(&auth)?.clone()))
}

pub async fn at_me_application(
    Extension(auth): Extension<Authenticated>,
) -> Result<Json<ApplicationRecord>, ApiError> {
    Ok(Json(application_of(&auth)?.clone()))
}

#[derive(Debug, Deserialize)]
pub struct CreateApplication {
    pub name: String,
    pub description: String,
}

impl CreateApplication {
    fn validate(&self) -> Result<(), ApiError> {
        if !NAME_LEN.contains(&self.name.chars().count()) {
            return Err(ApiError::BadRequest(
                "name field must be between 3 and 32 characters long.".to_string(),
            ));
        }

        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ApiError::BadRequest(
                "description field must not be over 512 characters long.".to_string(),
            ));
        }

        Ok(())
    }
}

pub async fn create_application(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    body: Result<Json<CreateApplication>, JsonRejection>,
) -> Result<(StatusCode, Json<ApplicationRecord>), ApiError> {
    let user = user_of(&auth)?;

    let Json(request) = body.inspect_err(|e| {
        debug!(error = %e, "Bad JSON body for application create");
    })?;
    request.validate()?;

    let existing = state.accounts.fetch_applications(user.uid).await?;
    if existing.len() >= MAX_APPLICATIONS {
        return Err(ApiError::BadRequest(
            "You have too many applications.".to_string(),
        ));
    }

    let app = state
        .accounts
        .create_application(user.uid, &request.name, &request.description)
        .await
        .map_err(|e| match e {
            StorageError::Conflict(_) => ApiError::Conflict(
                "You already have an application with that name.".to_string(),
            ),
            other => other.into(),
        })?;

    info!(uid = user.uid, tid = app.tid, name = %app.name, "Application created");
    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn delete_application(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
) -> Result<StatusCode, ApiError> {
    let app = application_of(&auth)?;

    state.accounts.invalidate_application(&app.token).await?;

    info!(uid = app.owner.uid, tid = app.tid, "Application invalidated");
    Ok(StatusCode::OK)
}

pub async fn regenerate_application(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
) -> Result<Json<ApplicationRecord>, ApiError> {
    let app = application_of(&auth)?;

    let updated = state
        .accounts
        .regenerate_application_token(app.owner.uid, &app.token)
        .await?;

    info!(uid = app.owner.uid, tid = updated.tid, "Application token regenerated");
    Ok(Json(updated))
}

pub async fn post_dpy_modlog(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<PublishReport>, ApiError> {
    let app = application_of(&auth)?;

    let Json(payload) = body.inspect_err(|e| {
        debug!(error = %e, "Bad JSON body for modlog publish");
    })?;

    let envelope = Envelope {
        application: app.owner.uid,
        application_name: app.name.clone(),
        payload,
    };

    let report = state.hub.publish(DPY_MOD_LOG, &envelope)?;
    Ok(Json(report))
}
