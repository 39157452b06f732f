//! HTTP endpoints.
//!
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Multipart, Query},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    Extension, Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio::task;

use crate::{
    draw,
    pages,
    store::{LabeledDetection, PredictionRecord},
    utils, AppContext,
};

/// Stored name for browser webcam snapshots.
const WEBCAM_FILENAME: &str = "webcam_capture.jpg";

/// Errors escaping a handler. Uploads that overrun the body cap answer
/// 413, everything else becomes a logged 500.
pub enum ServerError {
    PayloadTooLarge,
    Internal(anyhow::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            Self::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Upload exceeds the size limit".to_string(),
            )
                .into_response(),
            Self::Internal(err) => {
                log::error!("Request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {err}"),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ServerError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        // The body-limit layer surfaces as a LengthLimitError somewhere in
        // the multipart error chain.
        if err
            .chain()
            .any(|cause| cause.is::<http_body::LengthLimitError>())
        {
            Self::PayloadTooLarge
        } else {
            Self::Internal(err)
        }
    }
}

pub async fn healthcheck() -> &'static str {
    "Healthy"
}

pub async fn welcome() -> Html<String> {
    Html(pages::welcome_page())
}

pub async fn input_page() -> Html<String> {
    Html(pages::input_page())
}

#[derive(Debug, Deserialize)]
pub struct OutputParams {
    #[serde(default)]
    id: Option<u64>,
}

/// Results view. With an id it shows that prediction, without one it falls
/// back to the most recent record.
pub async fn output_page(
    Extension(ctx): Extension<Arc<AppContext>>,
    Query(params): Query<OutputParams>,
) -> Html<String> {
    let record = match params.id {
        Some(id) => ctx.store.get(id),
        None => ctx.store.latest(),
    };

    Html(pages::output_page(record.as_ref()))
}

/// File-upload prediction. A missing or empty `file` field redirects back
/// to the input form; a successful run redirects to its results view.
pub async fn predict(
    Extension(ctx): Extension<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().map(utils::sanitize_filename);
        let data = field.bytes().await?;
        if let Some(filename) = filename {
            if !filename.is_empty() && !data.is_empty() {
                upload = Some((filename, data));
            }
        }
        break;
    }

    let Some((filename, data)) = upload else {
        return Ok(Redirect::to("/input").into_response());
    };

    let id = run_prediction(&ctx, filename, data).await?;
    Ok(Redirect::to(&format!("/output?id={id}")).into_response())
}

/// Webcam-frame prediction. Answers with a JSON success flag instead of a
/// redirect; the capture script navigates to the results view itself.
pub async fn predict_webcam(
    Extension(ctx): Extension<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ServerError> {
    let mut image_data: Option<Bytes> = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }

        let data = field.bytes().await?;
        if !data.is_empty() {
            image_data = Some(data);
        }
        break;
    }

    match image_data {
        Some(data) => {
            run_prediction(&ctx, WEBCAM_FILENAME.to_string(), data).await?;
            Ok(Json(json!({ "success": true })))
        }
        None => Ok(Json(json!({ "success": false }))),
    }
}

/// Persist the upload, run the detector, persist the annotated image and
/// store the result record. Returns the record id.
async fn run_prediction(ctx: &Arc<AppContext>, filename: String, data: Bytes) -> Result<u64> {
    let image = image::load_from_memory(&data)
        .context("failed to decode uploaded image")?
        .to_rgb8();

    let upload_path = ctx.upload_dir.join(&filename);
    tokio::fs::write(&upload_path, &data)
        .await
        .with_context(|| format!("failed to write upload to {}", upload_path.display()))?;

    let output_name = utils::output_filename(&filename);
    let output_path = ctx.output_dir.join(&output_name);

    // tract inference is CPU-bound, keep it off the reactor threads
    let ctx_ = Arc::clone(ctx);
    let record = task::spawn_blocking(move || -> Result<PredictionRecord> {
        let detections = ctx_.detector.detect(&image)?;
        log::info!("Detected {} objects in {}", detections.len(), filename);

        let labeled = detections
            .iter()
            .map(|detection| LabeledDetection {
                class: ctx_.detector.class_name(detection.class_id).to_owned(),
                confidence: utils::format_confidence(detection.confidence),
            })
            .collect();

        let annotated =
            draw::draw_detections(image, &detections, ctx_.detector.as_ref(), ctx_.font.as_ref());
        annotated
            .save(&output_path)
            .with_context(|| format!("failed to write {}", output_path.display()))?;

        Ok(PredictionRecord {
            original_image: format!("/static/uploads/{filename}"),
            output_image: format!("/static/outputs/{output_name}"),
            detections: labeled,
        })
    })
    .await??;

    Ok(ctx.store.insert(record))
}
