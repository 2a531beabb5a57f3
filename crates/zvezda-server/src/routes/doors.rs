use axum::extract::{Path, State};
use axum::{Extension, Json};
use zvezda_core::{DoorStatus, Identity};

use crate::error::AppError;
use crate::state::AppState;

/// POST /open/{door}: actuate a door and wait for the hold to finish.
pub async fn open_door(
    State(app): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(door): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let controller = app.registry.resolve(&door)?;
    let actuation = controller.trigger(&identity).await?;

    Ok(Json(serde_json::json!({
        "door": actuation.door,
        "opened_by": actuation.username,
        "hold_ms": actuation.hold.as_millis() as u64,
    })))
}

/// GET /api/doors: configured doors with their current state.
pub async fn list_doors(State(app): State<AppState>) -> Json<Vec<DoorStatus>> {
    Json(app.registry.statuses())
}
