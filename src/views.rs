//! HTML pages and user-facing messages.

use crate::pipeline::Presentation;

pub const MSG_NO_FILE_UPLOADED: &str = "No file uploaded 😢";
pub const MSG_NO_FILE_SELECTED: &str = "No selected file 😢";
pub const MSG_NO_ARTIFACT: &str = "Detection completed but no image found 😭";

const STYLE: &str = "body{font-family:sans-serif;max-width:52rem;margin:2rem auto;padding:0 1rem;text-align:center}\
img{max-width:100%;border-radius:8px}\
ul{list-style:none;padding:0;font-size:1.4rem}\
a.button,button{display:inline-block;margin:.5rem;padding:.6rem 1.2rem;border-radius:6px;border:0;background:#2e7d32;color:#fff;text-decoration:none;font-size:1rem}";

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = escape_html(title),
        body = body,
    )
}

/// Landing page with mode selection. The webcam link shows only when capture
/// is configured.
pub fn home(webcam_enabled: bool) -> String {
    let webcam = if webcam_enabled {
        "<a class=\"button\" href=\"/webcam\">🎥 Live webcam</a>"
    } else {
        ""
    };
    page(
        "Fruits Detection",
        &format!(
            "<h1>🍓 Fruits Detection</h1>\n<p>Choose how to find fruit.</p>\n\
<a class=\"button\" href=\"/upload_mode\">📁 Upload an image</a>{webcam}"
        ),
    )
}

pub fn upload_form() -> String {
    page(
        "Upload an image",
        "<h1>📁 Upload a fruit image</h1>\n\
<form action=\"/upload\" method=\"post\" enctype=\"multipart/form-data\">\n\
<input type=\"file\" name=\"file\" accept=\"image/*\" required>\n\
<button type=\"submit\">Detect</button>\n</form>\n\
<p><a href=\"/\">Back</a></p>",
    )
}

pub fn webcam() -> String {
    page(
        "Live detection",
        "<h1>🎥 Live fruit detection</h1>\n\
<img src=\"/video_feed\" alt=\"live detection stream\">\n\
<p><a href=\"/\">Back</a></p>",
    )
}

pub fn result(view: &Presentation) -> String {
    let items = if view.display.is_empty() {
        "<li>No fruit detected</li>".to_string()
    } else {
        view.display
            .iter()
            .map(|entry| format!("<li>{}</li>", escape_html(entry)))
            .collect::<Vec<_>>()
            .join("\n")
    };
    page(
        "Detection result",
        &format!(
            "<h1>🍉 Detection result</h1>\n\
<img src=\"{src}\" alt=\"annotated detection result\">\n\
<h2>Detected fruits</h2>\n<ul>\n{items}\n</ul>\n\
<p><a class=\"button\" href=\"/upload_mode\">Try another</a></p>",
            src = escape_html(&view.image_url),
        ),
    )
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_page_lists_entries_and_image() {
        let html = result(&Presentation {
            image_url: "/static/results/apple.jpg".to_string(),
            display: vec!["🍎 Apple".to_string()],
        });
        assert!(html.contains("<li>🍎 Apple</li>"));
        assert!(html.contains("src=\"/static/results/apple.jpg\""));
    }

    #[test]
    fn labels_are_escaped() {
        let html = result(&Presentation {
            image_url: "/x.jpg".to_string(),
            display: vec!["🍏 <script>".to_string()],
        });
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn home_hides_webcam_without_camera() {
        assert!(!home(false).contains("/webcam"));
        assert!(home(true).contains("/webcam"));
        assert!(upload_form().contains("name=\"file\""));
    }
}
