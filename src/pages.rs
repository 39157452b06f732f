//! Inline HTML pages.
//!
use crate::store::PredictionRecord;

const STYLE: &str = r#"
    body { font-family: sans-serif; max-width: 780px; margin: 2em auto; color: #222; }
    h1 { font-size: 1.6em; }
    a.button, button, input[type=submit] {
        background: #2d7d46; color: #fff; border: none; padding: 0.5em 1.2em;
        border-radius: 4px; font-size: 1em; text-decoration: none; cursor: pointer;
    }
    img.result { max-width: 100%; border: 1px solid #ccc; margin: 0.5em 0; }
    table { border-collapse: collapse; margin-top: 1em; }
    th, td { border: 1px solid #aaa; padding: 0.4em 1em; text-align: left; }
    section { margin-top: 2em; }
"#;

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>{STYLE}</style>\n</head>\n\
         <body>\n{body}\n</body>\n</html>\n"
    )
}

/// Minimal HTML escaping for text that ends up inside element bodies.
fn escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '&' => "&amp;".to_string(),
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '"' => "&quot;".to_string(),
            c => c.to_string(),
        })
        .collect()
}

pub fn welcome_page() -> String {
    page(
        "Object Detection",
        r#"<h1>Object Detection Demo</h1>
<p>Upload an image or take a webcam snapshot and a pretrained model will
mark every object it recognizes, together with its confidence.</p>
<p><a class="button" href="/input">Get started</a></p>"#,
    )
}

pub fn input_page() -> String {
    page(
        "Object Detection - Input",
        r#"<h1>Choose an image</h1>
<section>
  <h2>Upload a file</h2>
  <form action="/predict" method="post" enctype="multipart/form-data">
    <input type="file" name="file" accept="image/*">
    <input type="submit" value="Detect objects">
  </form>
</section>
<section>
  <h2>Or use your webcam</h2>
  <video id="webcam" autoplay playsinline width="480"></video>
  <p><button id="capture" type="button">Capture and detect</button></p>
  <p id="webcam-status"></p>
</section>
<script>
const video = document.getElementById('webcam');
const status = document.getElementById('webcam-status');

navigator.mediaDevices.getUserMedia({ video: true })
  .then((stream) => { video.srcObject = stream; })
  .catch(() => { status.textContent = 'Webcam not available.'; });

document.getElementById('capture').addEventListener('click', () => {
  const canvas = document.createElement('canvas');
  canvas.width = video.videoWidth;
  canvas.height = video.videoHeight;
  canvas.getContext('2d').drawImage(video, 0, 0);
  canvas.toBlob((blob) => {
    const form = new FormData();
    form.append('image', blob, 'webcam_capture.jpg');
    fetch('/predict_webcam', { method: 'POST', body: form })
      .then((resp) => resp.json())
      .then((json) => {
        if (json.success) {
          window.location = '/output';
        } else {
          status.textContent = 'Capture failed, please retry.';
        }
      });
  }, 'image/jpeg');
});
</script>"#,
    )
}

pub fn output_page(record: Option<&PredictionRecord>) -> String {
    let Some(record) = record else {
        return page(
            "Object Detection - Results",
            r#"<h1>No prediction results yet</h1>
<p>Run a prediction first.</p>
<p><a class="button" href="/input">Choose an image</a></p>"#,
        );
    };

    let mut rows = String::new();
    for detection in record.detections.iter() {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            escape(&detection.class),
            escape(&detection.confidence),
        ));
    }

    let detections_section = if record.detections.is_empty() {
        "<p>No objects detected.</p>".to_string()
    } else {
        format!(
            "<table>\n<tr><th>Class</th><th>Confidence</th></tr>\n{rows}</table>"
        )
    };

    let body = format!(
        r#"<h1>Detection results</h1>
<section>
  <h2>Annotated image</h2>
  <img class="result" src="{output}" alt="Annotated image">
</section>
<section>
  <h2>Detections</h2>
  {detections_section}
</section>
<section>
  <h2>Original image</h2>
  <img class="result" src="{original}" alt="Original image">
</section>
<p><a class="button" href="/input">Try another image</a></p>"#,
        output = record.output_image,
        original = record.original_image,
    );

    page("Object Detection - Results", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LabeledDetection;

    #[test]
    fn output_page_without_record_points_back_to_input() {
        let html = output_page(None);
        assert!(html.contains("No prediction results yet"));
        assert!(html.contains("href=\"/input\""));
    }

    #[test]
    fn output_page_renders_images_and_detection_rows() {
        let record = PredictionRecord {
            original_image: "/static/uploads/cat.jpg".into(),
            output_image: "/static/outputs/output_cat.jpg".into(),
            detections: vec![LabeledDetection {
                class: "cat".into(),
                confidence: "97.31%".into(),
            }],
        };

        let html = output_page(Some(&record));
        assert!(html.contains("src=\"/static/outputs/output_cat.jpg\""));
        assert!(html.contains("src=\"/static/uploads/cat.jpg\""));
        assert!(html.contains("<td>cat</td><td>97.31%</td>"));
    }

    #[test]
    fn class_names_are_html_escaped() {
        let record = PredictionRecord {
            original_image: "/static/uploads/a.jpg".into(),
            output_image: "/static/outputs/output_a.jpg".into(),
            detections: vec![LabeledDetection {
                class: "<script>".into(),
                confidence: "1.00%".into(),
            }],
        };

        let html = output_page(Some(&record));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<td><script></td>"));
    }
}
