use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use courier_types::api::{FocusRequest, StatusResponse, SuccessResponse};

use crate::boundary::Boundary;

pub async fn get_status(State(boundary): State<Boundary>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: boundary.status(),
    })
}

pub async fn simulate_drop(State(boundary): State<Boundary>) -> Json<SuccessResponse> {
    Json(SuccessResponse {
        success: boundary.simulate_drop(),
    })
}

pub async fn set_focus(
    State(boundary): State<Boundary>,
    Json(req): Json<FocusRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if matches!(req.conversation_id, Some(id) if id <= 0) {
        return Err(StatusCode::BAD_REQUEST);
    }
    boundary.set_focus(req.conversation_id);
    Ok(StatusCode::NO_CONTENT)
}
