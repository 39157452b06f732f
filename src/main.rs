//! Detection web server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use detect_server::{
    build_router, draw,
    nn::{self, YoloModel},
    store::ResultStore,
    utils, AppContext, RESULT_CAPACITY,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Web front-end for ONNX object detection")]
struct Args {
    /// Address to serve on
    #[clap(long, default_value = "127.0.0.1:3000")]
    address: String,

    /// Path to the ONNX detection model
    #[clap(long, default_value = "yolov8n.onnx")]
    model: PathBuf,

    /// URL to download the model from if the file is missing
    #[clap(long)]
    model_url: Option<String>,

    /// Labels file with one class name per line, overriding the built-in
    /// COCO labels
    #[clap(long)]
    labels: Option<PathBuf>,

    /// TrueType font for box labels; without it boxes are drawn unlabeled
    #[clap(long)]
    font: Option<PathBuf>,

    /// Directory for uploaded images
    #[clap(long, default_value = "static/uploads")]
    upload_dir: PathBuf,

    /// Directory for annotated output images
    #[clap(long, default_value = "static/outputs")]
    output_dir: PathBuf,

    /// Minimum confidence for reported detections
    #[clap(long, default_value_t = 0.25)]
    min_confidence: f32,

    /// Maximum IoU between reported bounding boxes of the same class
    #[clap(long, default_value_t = 0.45)]
    max_iou: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let args = Args::parse();

    std::fs::create_dir_all(&args.upload_dir)?;
    std::fs::create_dir_all(&args.output_dir)?;

    let names = match &args.labels {
        Some(path) => utils::read_labels(path)?,
        None => nn::COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
    };

    let model = YoloModel::new(
        &args.model,
        args.model_url.as_deref(),
        names,
        args.min_confidence,
        args.max_iou,
    )
    .await?;

    let font = match &args.font {
        Some(path) => Some(draw::load_font(path)?),
        None => {
            log::warn!("No label font configured, boxes will be drawn without text");
            None
        }
    };

    let ctx = Arc::new(AppContext {
        detector: Box::new(model),
        store: ResultStore::new(RESULT_CAPACITY),
        font,
        upload_dir: args.upload_dir,
        output_dir: args.output_dir,
    });

    // Build HTTP server with endpoints
    let app = build_router(ctx);

    // Serve HTTP server
    let addr: SocketAddr = args.address.parse()?;
    log::info!("Serving on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
