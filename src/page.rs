//! Server-rendered home page listing every downloaded video.

use std::fmt::Write;

use url::Url;

use crate::metadata::{VideoCatalog, VideoRecord};

/// Renders the catalog as a standalone HTML document, newest download first.
pub fn render_index(catalog: &VideoCatalog) -> String {
    let mut records: Vec<&VideoRecord> = catalog.values().collect();
    records.sort_by(|a, b| {
        b.download_date
            .cmp(&a.download_date)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut html = String::from(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Downloaded videos</title>\n</head>\n<body>\n<h1>Downloaded videos</h1>\n\
         <form method=\"post\" action=\"/download\">\n\
         <input type=\"url\" name=\"url\" placeholder=\"https://www.youtube.com/watch?v=...\" required>\n\
         <button type=\"submit\">Download</button>\n</form>\n",
    );

    if records.is_empty() {
        html.push_str("<p>No videos downloaded yet.</p>\n");
    } else {
        html.push_str("<ul class=\"videos\">\n");
        for record in records {
            // Writing into a String cannot fail.
            let _ = write!(
                html,
                "<li id=\"{id}\"><a href=\"{href}\">{title}</a> by {uploader} \
                 <span class=\"meta\">{duration} &middot; {size} &middot; {date}</span>\
                 <p>{description}</p></li>\n",
                id = escape(&record.id),
                href = escape(&link_target(&record.file_path)),
                title = escape(&record.title),
                uploader = escape(&record.uploader),
                duration = format_duration(record.duration),
                size = format_size(record.filesize),
                date = escape(&record.download_date),
                description = escape(&record.description),
            );
        }
        html.push_str("</ul>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

/// Percent-encodes every segment of a stored `file_path` so titles holding
/// `#`, `%` or `?` still resolve to the file rather than a fragment or query.
fn link_target(file_path: &str) -> String {
    let Ok(mut link) = Url::parse("http://localhost/") else {
        return file_path.to_string();
    };
    if let Ok(mut segments) = link.path_segments_mut() {
        segments
            .clear()
            .extend(file_path.split('/').filter(|segment| !segment.is_empty()));
    }
    link.path().to_string()
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
