// Certificate and per-reviewer report generation.
// Uses genpdf - requires Liberation or similar fonts in standard paths
use std::path::Path;

use genpdf::Element;

use crate::error::Error;

fn load_font_family() -> Result<genpdf::fonts::FontFamily<genpdf::fonts::FontData>, Error> {
    let font_paths = [
        "/usr/share/fonts/truetype/liberation",
        "/usr/share/fonts/TTF",
        "/System/Library/Fonts/Supplemental",
        "/Library/Fonts",
    ];

    font_paths
        .iter()
        .filter(|p| Path::new(p).exists())
        .find_map(|path| {
            ["LiberationSans", "DejaVuSans", "Arial"]
                .iter()
                .find_map(|name| genpdf::fonts::from_files(*path, name, None).ok())
        })
        .ok_or_else(|| {
            Error::Config("No suitable fonts found. Install: apt install fonts-liberation".into())
        })
}

pub fn generate_certificate(paper_title: &str, output_path: &Path) -> Result<(), Error> {
    let font_family = load_font_family()?;

    let mut doc = genpdf::Document::new(font_family);
    doc.set_title("Certificate of Acceptance");

    let mut decorator = genpdf::SimplePageDecorator::new();
    decorator.set_margins(10);
    doc.set_page_decorator(decorator);

    let title_style = genpdf::style::Style::new().with_font_size(24);
    doc.push(genpdf::elements::Paragraph::new("Certificate of Acceptance").styled(title_style));

    let title = crate::review::truncate_chars(paper_title, 80);
    doc.push(genpdf::elements::Paragraph::new(&title));
    doc.push(genpdf::elements::Break::new(0.5));
    doc.push(genpdf::elements::Paragraph::new(
        "has successfully passed Veredicto's AI-powered peer review process",
    ));
    doc.push(genpdf::elements::Break::new(0.5));

    let date = chrono::Utc::now().format("%B %d, %Y").to_string();
    let id = output_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .replace("_certificate", "");

    doc.push(genpdf::elements::Paragraph::new(format!("Date: {}", date)));
    doc.push(genpdf::elements::Paragraph::new(format!(
        "Certificate ID: {}",
        id
    )));

    doc.render_to_file(output_path)
        .map_err(|e| Error::Config(format!("certificate render failed: {e}")))
}

/// Render one reviewer's full review text as a branded report PDF.
pub fn generate_review_report(
    review_text: &str,
    reviewer_name: &str,
    submission_id: &str,
    output_path: &Path,
) -> Result<(), Error> {
    let font_family = load_font_family()?;

    let mut doc = genpdf::Document::new(font_family);
    doc.set_title(format!("{reviewer_name} Review"));

    let mut decorator = genpdf::SimplePageDecorator::new();
    decorator.set_margins(10);
    doc.set_page_decorator(decorator);

    let header_style = genpdf::style::Style::new().with_font_size(24);
    doc.push(genpdf::elements::Paragraph::new("Veredicto").styled(header_style));
    doc.push(genpdf::elements::Paragraph::new("AI-Powered Peer Review"));
    doc.push(genpdf::elements::Break::new(0.5));

    let reviewer_style = genpdf::style::Style::new().with_font_size(16);
    doc.push(genpdf::elements::Paragraph::new(reviewer_name).styled(reviewer_style));

    let date = chrono::Utc::now().format("%B %d, %Y").to_string();
    doc.push(genpdf::elements::Paragraph::new(format!("Review Date: {date}")));
    doc.push(genpdf::elements::Paragraph::new(format!(
        "Submission ID: {submission_id}"
    )));
    doc.push(genpdf::elements::Break::new(1.0));

    for paragraph in review_text.split("\n\n") {
        // genpdf paragraphs do not handle embedded newlines.
        for line in paragraph.lines() {
            doc.push(genpdf::elements::Paragraph::new(line));
        }
        doc.push(genpdf::elements::Break::new(0.5));
    }

    doc.render_to_file(output_path)
        .map_err(|e| Error::Config(format!("report render failed: {e}")))
}
