//! ONNX object detection with tract.
//!
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::ArrayViewD;
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = TVec<TValue>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Square input edge length expected by the detection model.
pub const MODEL_INPUT_SIZE: u32 = 640;

/// One detected object in original-image pixel coordinates.
///
/// `bbox` holds `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub class_id: usize,
    pub confidence: f32,
}

/// Seam between the HTTP layer and the concrete model, so handlers can be
/// exercised without a model file on disk.
pub trait DetectModel {
    fn detect(&self, input: &RgbImage) -> Result<Vec<Detection>>;

    /// Human-readable label for a class index.
    fn class_name(&self, class_id: usize) -> &str;
}

pub struct YoloModel {
    model: NnModel,
    input_size: u32,
    max_iou: f32,
    min_confidence: f32,
    names: Vec<String>,
}

impl YoloModel {
    /// Load a YOLO-family detection model from `model_path`, downloading it
    /// from `model_url` first if the file does not exist.
    pub async fn new(
        model_path: &Path,
        model_url: Option<&str>,
        names: Vec<String>,
        min_confidence: f32,
        max_iou: f32,
    ) -> Result<Self> {
        if !model_path.exists() {
            match model_url {
                Some(url) => {
                    log::info!("Model file missing, downloading from {}", url);
                    let client = reqwest::Client::new();
                    crate::utils::download_file(&client, url, model_path).await?;
                }
                None => bail!("model file {} not found", model_path.display()),
            }
        }

        let model = load_detection_plan(model_path, MODEL_INPUT_SIZE)?;
        log::info!(
            "Loaded detection model from {} ({} classes)",
            model_path.display(),
            names.len()
        );

        Ok(Self {
            model,
            input_size: MODEL_INPUT_SIZE,
            max_iou,
            min_confidence,
            names,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let size = self.input_size;
        let resized: RgbImage =
            image::imageops::resize(input, size, size, image::imageops::FilterType::Triangle);

        let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into();

        tensor
    }

    fn postproc(
        &self,
        raw_nn_out: NnOut,
        orig_width: u32,
        orig_height: u32,
    ) -> Result<Vec<Detection>> {
        let preds = raw_nn_out[0]
            .to_array_view::<f32>()
            .context("prediction tensor is not f32")?;

        // Map model-space coordinates back onto the original image.
        let scale_x = orig_width as f32 / self.input_size as f32;
        let scale_y = orig_height as f32 / self.input_size as f32;

        let candidates = decode_predictions(&preds, self.min_confidence, scale_x, scale_y)?;
        let mut selected = non_maximum_suppression(candidates, self.max_iou);
        selected.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        Ok(selected)
    }
}

impl DetectModel for YoloModel {
    fn detect(&self, input: &RgbImage) -> Result<Vec<Detection>> {
        let valid_input = tvec!(self.preproc(input).into_tvalue());
        let raw_nn_out = self.model.run(valid_input)?;
        self.postproc(raw_nn_out, input.width(), input.height())
    }

    fn class_name(&self, class_id: usize) -> &str {
        self.names
            .get(class_id)
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

fn load_detection_plan(path: &Path, input_size: u32) -> Result<NnModel> {
    let size = input_size as usize;
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size));
    let model = tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Decode a raw `1 x (4 + num_classes) x num_boxes` YOLO prediction tensor.
///
/// Per box the tensor carries center-x, center-y, width, height and one
/// score per class. Boxes whose best class score does not clear
/// `min_confidence` are dropped; the rest are converted to corner
/// coordinates in original-image pixels.
fn decode_predictions(
    preds: &ArrayViewD<f32>,
    min_confidence: f32,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<Detection>> {
    let shape = preds.shape();
    if shape.len() != 3 || shape[0] != 1 {
        bail!("expected predictions of shape 1xAxN, got {:?}", shape);
    }
    let num_attrs = shape[1];
    if num_attrs < 5 {
        bail!("prediction rows too short for any class: {:?}", shape);
    }
    let num_classes = num_attrs - 4;
    let num_boxes = shape[2];

    let mut detections = Vec::new();
    for i in 0..num_boxes {
        let mut best_class = 0;
        let mut best_score = 0.0_f32;
        for c in 0..num_classes {
            let score = preds[[0, 4 + c, i]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score <= min_confidence {
            continue;
        }

        let x_center = preds[[0, 0, i]];
        let y_center = preds[[0, 1, i]];
        let width = preds[[0, 2, i]];
        let height = preds[[0, 3, i]];

        detections.push(Detection {
            bbox: [
                (x_center - width / 2.0) * scale_x,
                (y_center - height / 2.0) * scale_y,
                (x_center + width / 2.0) * scale_x,
                (y_center + height / 2.0) * scale_y,
            ],
            class_id: best_class,
            confidence: best_score,
        });
    }

    Ok(detections)
}

/// Run class-aware non-maximum-suppression on candidate detections.
///
/// Start with the most confident detection and iterate over the others in
/// the order of sinking confidence. Grow the vector of selected detections
/// by adding only those candidates which do not overlap an already chosen
/// detection of the same class by more than `max_iou`.
fn non_maximum_suppression(mut candidates: Vec<Detection>, max_iou: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut selected: Vec<Detection> = vec![];
    'candidates: while let Some(candidate) = candidates.pop() {
        // Check for overlap with any of the selected detections
        for prior in selected.iter() {
            if prior.class_id == candidate.class_id && iou(&prior.bbox, &candidate.bbox) > max_iou
            {
                continue 'candidates;
            }
        }

        selected.push(candidate);
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // Corner points of the overlap box. If the boxes do not overlap, the
    // corner points are ill defined and the area below comes out as zero.
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    // Avoid division-by-zero with `EPS`
    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box.
///
/// The bounding box is passed as a four-element array defining two points:
/// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`. An
/// ill-defined box with the bottom-right point above or to the left of the
/// top-left point has zero area.
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

/// Class names of the COCO dataset most pretrained YOLO exports ship with.
/// Overridable with a labels file for custom models.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn det(bbox: [f32; 4], class_id: usize, confidence: f32) -> Detection {
        Detection {
            bbox,
            class_id,
            confidence,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let bbox = [10.0, 10.0, 50.0, 30.0];
        assert!((iou(&bbox, &bbox) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn area_of_ill_defined_box_is_zero() {
        assert_eq!(bbox_area(&[10.0, 10.0, 5.0, 20.0]), 0.0);
        assert_eq!(bbox_area(&[0.0, 0.0, 4.0, 5.0]), 20.0);
    }

    #[test]
    fn nms_suppresses_overlapping_boxes_of_same_class() {
        let candidates = vec![
            det([0.0, 0.0, 10.0, 10.0], 0, 0.9),
            det([1.0, 1.0, 11.0, 11.0], 0, 0.8),
            det([100.0, 100.0, 110.0, 110.0], 0, 0.7),
        ];

        let selected = non_maximum_suppression(candidates, 0.5);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].confidence, 0.9);
        assert_eq!(selected[1].confidence, 0.7);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let candidates = vec![
            det([0.0, 0.0, 10.0, 10.0], 0, 0.9),
            det([1.0, 1.0, 11.0, 11.0], 1, 0.8),
        ];

        let selected = non_maximum_suppression(candidates, 0.5);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn decode_picks_best_class_and_scales_coordinates() {
        // Two classes, two boxes. Box 0 is a confident class-1 hit, box 1
        // stays below the threshold.
        let mut preds = Array3::<f32>::zeros((1, 6, 2));
        preds[[0, 0, 0]] = 320.0;
        preds[[0, 1, 0]] = 160.0;
        preds[[0, 2, 0]] = 64.0;
        preds[[0, 3, 0]] = 32.0;
        preds[[0, 4, 0]] = 0.1;
        preds[[0, 5, 0]] = 0.9;

        preds[[0, 4, 1]] = 0.2;

        let view = preds.view().into_dyn();
        let detections = decode_predictions(&view, 0.25, 2.0, 0.5).unwrap();

        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.class_id, 1);
        assert!((d.confidence - 0.9).abs() < 1e-6);
        assert_eq!(d.bbox, [576.0, 72.0, 704.0, 88.0]);
    }

    #[test]
    fn plan_output_values_deref_to_tensors() {
        let preds = Array3::<f32>::zeros((1, 6, 2));
        let tensor: Tensor = preds.into();
        let out: NnOut = tvec!(tensor.into_tvalue());

        let view = out[0].to_array_view::<f32>().unwrap();
        assert_eq!(view.shape(), &[1, 6, 2]);
    }

    #[test]
    fn decode_rejects_malformed_shapes() {
        let preds = Array3::<f32>::zeros((1, 3, 4));
        let view = preds.view().into_dyn();
        assert!(decode_predictions(&view, 0.25, 1.0, 1.0).is_err());
    }
}
