//! Text extraction for the formats docpool ingests.
//!
//! Dispatch is by file extension:
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `.txt`, `.md` | lossy UTF-8 |
//! | `.pdf` | `pdf-extract` |
//! | `.docx`, `.pptx`, `.xlsx` | ZIP package + `quick-xml` text runs |
//!
//! Failures are typed ([`ExtractError`]) so callers can log and skip;
//! [`extract_slice`] folds them into an empty slice.

use std::borrow::Cow;
use std::io::{Cursor, Read};
use std::path::Path;

use docpool_core::fingerprint::{clean_text, three_part_slice};
use quick_xml::events::Event;
use thiserror::Error;
use tracing::warn;

/// Maximum decompressed bytes read from one ZIP part (zip-bomb guard).
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;
const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("Office document extraction failed: {0}")]
    Ooxml(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        let format = match ext.as_str() {
            "txt" | "md" => DocumentFormat::PlainText,
            "pdf" => DocumentFormat::Pdf,
            "docx" => DocumentFormat::Docx,
            "pptx" => DocumentFormat::Pptx,
            "xlsx" => DocumentFormat::Xlsx,
            _ => return None,
        };
        Some(format)
    }
}

/// Read `path` and return its raw text.
pub fn extract_text(path: &Path) -> Result<String, ExtractError> {
    let format = DocumentFormat::from_path(path)
        .ok_or_else(|| ExtractError::Unsupported(path.display().to_string()))?;
    let bytes = std::fs::read(path)?;
    extract_bytes(&bytes, format)
}

pub fn extract_bytes(bytes: &[u8], format: DocumentFormat) -> Result<String, ExtractError> {
    match format {
        DocumentFormat::PlainText => Ok(String::from_utf8_lossy(bytes).into_owned()),
        DocumentFormat::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        DocumentFormat::Docx => {
            let mut package = Package::open(bytes)?;
            let xml = package.read_part("word/document.xml")?;
            text_runs(&xml, b"p")
        }
        DocumentFormat::Pptx => {
            let mut package = Package::open(bytes)?;
            let mut out = String::new();
            for name in package.numbered_parts("ppt/slides/slide") {
                let xml = package.read_part(&name)?;
                push_block(&mut out, &text_runs(&xml, b"p")?);
            }
            Ok(out)
        }
        DocumentFormat::Xlsx => {
            let mut package = Package::open(bytes)?;
            // Workbooks with only numbers have no shared strings part.
            let shared = match package.read_part("xl/sharedStrings.xml") {
                Ok(xml) => shared_strings(&xml)?,
                Err(_) => Vec::new(),
            };
            let mut out = String::new();
            for name in package
                .numbered_parts("xl/worksheets/sheet")
                .into_iter()
                .take(XLSX_MAX_SHEETS)
            {
                let xml = package.read_part(&name)?;
                push_block(&mut out, &sheet_cells(&xml, &shared)?);
            }
            Ok(out)
        }
    }
}

/// Extract, clean and sample a file. Any failure is logged and yields
/// an empty slice.
pub fn extract_slice(path: &Path, block_chars: usize) -> String {
    match extract_text(path) {
        Ok(text) => three_part_slice(&clean_text(&text), block_chars),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "text extraction failed");
            String::new()
        }
    }
}

fn push_block(out: &mut String, block: &str) {
    if block.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(block);
}

/// An OOXML package (a ZIP archive of XML parts).
struct Package<'a> {
    archive: zip::ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> Package<'a> {
    fn open(bytes: &'a [u8]) -> Result<Self, ExtractError> {
        let archive =
            zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))?;
        Ok(Self { archive })
    }

    fn read_part(&mut self, name: &str) -> Result<Vec<u8>, ExtractError> {
        let part = self
            .archive
            .by_name(name)
            .map_err(|e| ExtractError::Ooxml(format!("{name}: {e}")))?;
        let mut out = Vec::new();
        part.take(MAX_PART_BYTES)
            .read_to_end(&mut out)
            .map_err(|e| ExtractError::Ooxml(format!("{name}: {e}")))?;
        if out.len() as u64 >= MAX_PART_BYTES {
            return Err(ExtractError::Ooxml(format!(
                "{name} exceeds size limit ({MAX_PART_BYTES} bytes)"
            )));
        }
        Ok(out)
    }

    /// Parts named `<prefix><n>.xml`, ordered by `n`.
    fn numbered_parts(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<(u32, String)> = self
            .archive
            .file_names()
            .filter_map(|name| {
                let n = name.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
                Some((n, name.to_string()))
            })
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }
}

fn xml_error(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// Concatenate the text of every `<t>` element, ending a line at each
/// closing `block` element (e.g. `w:p` / `a:p` paragraphs).
fn text_runs(xml: &[u8], block: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::End(e) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == block && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Event::Text(te) if in_text => out.push_str(&unescape(&te)),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn unescape<'b>(te: &'b quick_xml::events::BytesText<'_>) -> Cow<'b, str> {
    te.unescape()
        .unwrap_or_else(|_| String::from_utf8_lossy(te.as_ref()))
}

/// Shared string table: one entry per `<si>`, rich-text runs joined.
fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Event::Text(te) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&unescape(&te));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Shared,
    Inline,
    Value,
}

/// Cell values of one worksheet, space separated, rows on new lines.
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut kind = CellKind::Value;
    let mut capture = false;
    let mut cells = 0usize;

    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf).map_err(xml_error)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"c" => {
                    kind = CellKind::Value;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"t" {
                            kind = match attr.value.as_ref() {
                                b"s" => CellKind::Shared,
                                b"inlineStr" => CellKind::Inline,
                                _ => CellKind::Value,
                            };
                        }
                    }
                }
                b"v" => capture = kind != CellKind::Inline,
                b"t" => capture = kind == CellKind::Inline,
                _ => {}
            },
            Event::Text(te) if capture => {
                let raw = unescape(&te);
                let value = raw.trim();
                let text = match kind {
                    CellKind::Shared => value
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| shared.get(i).cloned()),
                    _ => Some(value.to_string()),
                };
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    row.push(text);
                    cells += 1;
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => capture = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join(" ")),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, body) in parts {
            writer.start_file(*name, options).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("a/Report.DOCX")),
            Some(DocumentFormat::Docx)
        );
        assert_eq!(DocumentFormat::from_path(Path::new("notes")), None);
        assert_eq!(DocumentFormat::from_path(Path::new("x.ppt")), None);
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let err = extract_text(Path::new("/tmp/whatever.bin")).unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_bytes(b"not a pdf", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error() {
        let err = extract_bytes(b"not a zip", DocumentFormat::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let doc = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let text = extract_bytes(&bytes, DocumentFormat::Docx).unwrap();
        assert_eq!(text, "Hello world\nSecond & last");
    }

    #[test]
    fn pptx_slides_are_read_in_numeric_order() {
        let slide = |s: &str| format!(r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:r><a:t>{s}</a:t></a:r></a:p></p:sld>"#);
        let s1 = slide("first");
        let s2 = slide("second");
        let s10 = slide("tenth");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        let text = extract_bytes(&bytes, DocumentFormat::Pptx).unwrap();
        assert_eq!(text, "first\nsecond\ntenth");
    }

    #[test]
    fn xlsx_reads_shared_inline_and_numeric_cells() {
        let shared = r#"<sst><si><t>Region</t></si><si><r><t>North</t></r><r><t>east</t></r></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
            <row><c t="s"><v>0</v></c><c><v>42</v></c></row>
            <row><c t="s"><v>1</v></c><c t="inlineStr"><is><t>note</t></is></c></row>
        </sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let text = extract_bytes(&bytes, DocumentFormat::Xlsx).unwrap();
        assert_eq!(text, "Region 42\nNortheast note");
    }

    #[test]
    fn slice_of_unreadable_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF garbage").unwrap();
        assert_eq!(extract_slice(&path, 2048), "");
    }

    #[test]
    fn slice_of_text_file_is_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "# Title\n\n* item one\n* item two").unwrap();
        assert_eq!(extract_slice(&path, 2048), "Title item one item two");
    }
}
