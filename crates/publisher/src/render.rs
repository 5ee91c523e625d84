//! Self-contained HTML rendering of the status snapshot.
//!
//! The page carries its own inline stylesheet and a restrictive
//! Content-Security-Policy; it references no external CSS, JS or images.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::snapshot::StatusSnapshot;

const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; style-src 'unsafe-inline'";

const STYLESHEET: &str = "\
body{font-family:system-ui,-apple-system,sans-serif;margin:0;padding:1rem;background:#f7f7f7;color:#222}\
h1{font-size:1.5rem;margin:0 0 1rem}\
h2{font-size:1.15rem;margin:1.5rem 0 .5rem;border-bottom:1px solid #ddd}\
ul{list-style:none;margin:0;padding:0}\
li{display:flex;align-items:center;gap:.5rem;padding:.35rem 0}\
.status-dot{display:inline-block;width:.8rem;height:.8rem;border-radius:50%}\
.status-green{background:#2e7d32}\
.status-yellow{background:#f9a825}\
.status-red{background:#c62828}\
.issue{color:#666;font-size:.9rem}\
.empty{color:#888;font-style:italic}\
footer{margin-top:2rem;color:#888;font-size:.8rem}";

/// Render the status page for `snapshot`, stamped with `generated_at`.
pub fn render_page(snapshot: &StatusSnapshot, generated_at: DateTime<Utc>) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(
        html,
        "<meta http-equiv=\"Content-Security-Policy\" content=\"{CONTENT_SECURITY_POLICY}\">"
    );
    html.push_str("<title>Equipment Status</title>\n");
    let _ = writeln!(html, "<style>{STYLESHEET}</style>");
    html.push_str("</head>\n<body>\n<h1>Equipment Status</h1>\n");

    if snapshot.areas.is_empty() {
        html.push_str("<p class=\"empty\">No areas configured.</p>\n");
    }

    for area in &snapshot.areas {
        let _ = writeln!(html, "<section>\n<h2>{}</h2>", escape_html(&area.name));
        if area.equipment.is_empty() {
            html.push_str("<p class=\"empty\">No equipment.</p>\n</section>\n");
            continue;
        }
        html.push_str("<ul>\n");
        for equipment in &area.equipment {
            let status = &equipment.status;
            let _ = write!(
                html,
                "<li><span class=\"status-dot status-{}\" title=\"{}\"></span><span>{}</span> <strong>{}</strong>",
                status.color.as_str(),
                escape_html(&status.label),
                escape_html(&equipment.name),
                escape_html(&status.label),
            );
            if let Some(issue) = status.issue_description.as_deref().filter(|s| !s.is_empty()) {
                let _ = write!(html, " <span class=\"issue\">{}</span>", escape_html(issue));
            }
            html.push_str("</li>\n");
        }
        html.push_str("</ul>\n</section>\n");
    }

    let _ = writeln!(
        html,
        "<footer>Generated: {}</footer>",
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    html.push_str("</body>\n</html>\n");
    html
}

/// Escape text for use in HTML element content and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
