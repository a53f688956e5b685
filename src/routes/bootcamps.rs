//! Bootcamp routes: the shared collection routes plus photo upload.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    routing::put,
    Json, Router,
};
use serde_json::{json, Value};

use super::collection::{self, Collection, Record};
use crate::error::{Error, Result};
use crate::pipeline::stages::Uploads;

/// Largest accepted photo, in bytes.
pub const MAX_PHOTO_BYTES: usize = 1_000_000;

pub fn router(bootcamps: Arc<Collection>) -> Router {
    collection::routes()
        .route("/:id/photo", put(upload_photo))
        .with_state(bootcamps)
}

async fn upload_photo(
    State(bootcamps): State<Arc<Collection>>,
    Path(id): Path<String>,
    uploads: Option<Extension<Uploads>>,
) -> Result<Json<Value>> {
    bootcamps.get(&id)?;

    let Some(Extension(uploads)) = uploads else {
        return Err(Error::BadRequest("Please upload a file".into()));
    };
    let file = uploads
        .get("file")
        .ok_or_else(|| Error::BadRequest("Please upload a file".into()))?;

    let is_image = file
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image"));
    if !is_image {
        return Err(Error::BadRequest("Please upload an image file".into()));
    }
    if file.size() > MAX_PHOTO_BYTES {
        return Err(Error::BadRequest(format!(
            "Please upload an image less than {MAX_PHOTO_BYTES} bytes"
        )));
    }

    let photo = format!("photo_{}{}", id, file.extension().unwrap_or_default());
    let mut patch = Record::new();
    patch.insert("photo".into(), json!(photo));
    bootcamps.update(&id, patch)?;

    tracing::debug!(bootcamp = %id, bytes = file.size(), "photo stored as {}", photo);
    Ok(Json(json!({ "success": true, "data": photo })))
}
