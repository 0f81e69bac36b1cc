//! Source format resolution and raw text extraction

use crate::error::{QuarryError, Result};
use std::path::Path;

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    PlainText,
    Markdown,
    Pdf,
}

impl SourceFormat {
    /// Resolve the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "txt" => Ok(SourceFormat::PlainText),
            "md" => Ok(SourceFormat::Markdown),
            "pdf" => Ok(SourceFormat::Pdf),
            _ => Err(QuarryError::UnsupportedFormat { extension }),
        }
    }
}

/// One unit of extracted text; PDFs produce one per page
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: Option<i64>,
    pub text: String,
}

/// Extract raw text from a source file.
///
/// PDFs are extracted page by page so chunks can carry page numbers;
/// Markdown has its YAML front-matter stripped; plain text is used as-is.
pub fn extract_pages(path: &Path, format: SourceFormat) -> Result<Vec<PageText>> {
    match format {
        SourceFormat::PlainText => {
            let text = read_utf8(path)?;
            Ok(vec![PageText { page: None, text }])
        }
        SourceFormat::Markdown => {
            let text = read_utf8(path)?;
            Ok(vec![PageText {
                page: None,
                text: strip_front_matter(&text).to_string(),
            }])
        }
        SourceFormat::Pdf => {
            let pages = pdf_extract::extract_text_by_pages(path)
                .map_err(|e| QuarryError::Parse(format!("{}: {}", path.display(), e)))?;
            Ok(pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| PageText {
                    page: Some(i as i64 + 1),
                    text,
                })
                .collect())
        }
    }
}

fn read_utf8(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| QuarryError::io(e, format!("Failed to read source: {}", path.display())))
}

/// Strip a leading YAML front-matter block delimited by `---` lines
fn strip_front_matter(text: &str) -> &str {
    let rest = match text.strip_prefix("---") {
        Some(r) => r,
        None => return text,
    };
    let rest = match rest.strip_prefix("\r\n").or_else(|| rest.strip_prefix('\n')) {
        Some(r) => r,
        None => return text,
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let end = offset + line.len();
        let trimmed = line.trim();
        if trimmed == "---" || trimmed == "..." {
            return rest[end..].trim_start_matches(['\r', '\n']);
        }
        offset = end;
    }

    // No closing fence; treat the whole text as body
    text
}
