pub mod draw;
pub mod endpoints;
pub mod nn;
pub mod pages;
pub mod store;
pub mod utils;

use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use rusttype::Font;
use tower_http::services::ServeDir;

use crate::{nn::DetectModel, store::ResultStore};

/// Upload size cap.
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// How many prediction records are kept before the oldest are evicted.
pub const RESULT_CAPACITY: u64 = 32;

/// Shared state behind every handler.
pub struct AppContext {
    pub detector: Box<dyn DetectModel + Send + Sync>,
    pub store: ResultStore,
    pub font: Option<Font<'static>>,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Build the complete application router, including static serving of the
/// upload and output directories.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(endpoints::welcome))
        .route("/input", get(endpoints::input_page))
        .route("/predict", post(endpoints::predict))
        .route("/predict_webcam", post(endpoints::predict_webcam))
        .route("/output", get(endpoints::output_page))
        .route("/healthcheck", get(endpoints::healthcheck))
        .nest_service("/static/uploads", ServeDir::new(&ctx.upload_dir))
        .nest_service("/static/outputs", ServeDir::new(&ctx.output_dir))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(Extension(ctx))
}
