//! Interaction endpoint for the emoji request modal.

use axum::{
    Form, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
};
use emojibot_common::AppError;
use tracing::{info, warn};

use crate::form::{DESCRIPTION, EMOJI_REQUEST_CALLBACK, EmojiRequestForm, FormErrors};
use crate::middleware::AppState;
use crate::payload::{InteractionForm, InteractionPayload, RequestMetadata, SubmittedValues};
use crate::response::{ViewResponse, ok};

/// Handle a modal submission.
async fn interactive(State(state): State<AppState>, Form(form): Form<InteractionForm>) -> Response {
    let payload: InteractionPayload = match serde_json::from_str(&form.payload) {
        Ok(payload) => payload,
        Err(e) => return AppError::BadRequest(format!("Invalid interaction payload: {e}")).into_response(),
    };

    let InteractionPayload::ViewSubmission { user, view } = payload else {
        return ok().into_response();
    };
    if view.callback_id != EMOJI_REQUEST_CALLBACK {
        return ok().into_response();
    }

    let metadata: RequestMetadata = match serde_json::from_str(&view.private_metadata) {
        Ok(metadata) => metadata,
        Err(e) => return AppError::BadRequest(format!("Invalid modal metadata: {e}")).into_response(),
    };

    let values = SubmittedValues::from_state(&view.state);
    let request = match EmojiRequestForm::from_values(&values)
        .and_then(|form| form.into_request(&user.id, metadata))
    {
        Ok(request) => request,
        Err(errors) => return form_errors(&values, errors).into_response(),
    };

    match state.ingress.submit(request).await {
        Ok(job) => {
            info!(job_id = %job.job_id(), trace_id = %job.trace_id(), "Emoji request accepted");
            ViewResponse::Clear.into_response()
        }
        Err(AppError::Validation(message)) => {
            block_error(&values, DESCRIPTION, message).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Emoji request could not be queued");
            block_error(
                &values,
                DESCRIPTION,
                "Your request could not be queued. Please try again.",
            )
            .into_response()
        }
    }
}

fn form_errors(values: &SubmittedValues, errors: FormErrors) -> ViewResponse {
    let errors = errors
        .0
        .into_iter()
        .map(|(action_id, message)| {
            let block = values.block_of(&action_id).unwrap_or(action_id.as_str()).to_string();
            (block, message)
        })
        .collect();
    ViewResponse::Errors { errors }
}

fn block_error(values: &SubmittedValues, action_id: &str, message: impl Into<String>) -> ViewResponse {
    ViewResponse::error(values.block_of(action_id).unwrap_or(action_id), message)
}

/// Modal submission route.
pub fn router() -> Router<AppState> {
    Router::new().route("/interactive", post(interactive))
}
