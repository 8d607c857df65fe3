//! Document parsing: uploaded bytes to plain UTF-8 text.
//!
//! The ingestion pipeline only sees the [`DocumentParser`] trait. The
//! default [`TextExtractor`] handles plain text formats directly, HTML via
//! `scraper`, PDF via `pdf-extract`, and the OOXML family (DOCX, PPTX, XLSX) by reading the
//! relevant XML parts out of the ZIP container with `quick-xml`.
//!
//! Content types are resolved by [`detect_content_type`]: a specific type
//! declared on the multipart part wins, then the file extension, then a
//! sniff of the leading bytes.

use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_HTML: &str = "text/html";
pub const MIME_JSON: &str = "application/json";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Zip-bomb guard for a single decompressed XML part.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("document is not valid UTF-8 text")]
    Encoding,
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

/// External document parser collaborator.
///
/// Parsing is CPU-bound and synchronous; callers run it on the blocking pool.
pub trait DocumentParser: Send + Sync {
    /// Extract text from `bytes` of the given (already resolved) content type.
    fn parse(&self, bytes: &[u8], content_type: &str) -> Result<String, ExtractError>;
}

/// Built-in parser for text, PDF and OOXML documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextExtractor;

impl DocumentParser for TextExtractor {
    fn parse(&self, bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
        extract_text(bytes, content_type)
    }
}

/// Resolve the content type of an upload.
///
/// `declared` is used when it names something more specific than
/// `application/octet-stream`; parameters such as `; charset=utf-8` are
/// dropped. Otherwise the extension of `filename` decides, and failing
/// that the bytes are sniffed.
pub fn detect_content_type(declared: Option<&str>, filename: Option<&str>, bytes: &[u8]) -> String {
    if let Some(ct) = declared.map(essence).filter(|ct| !ct.is_empty()) {
        if ct != MIME_OCTET_STREAM {
            return ct;
        }
    }
    if let Some(ct) = filename.and_then(content_type_for_filename) {
        return ct.to_string();
    }
    sniff(bytes).to_string()
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Map a filename extension to a content type.
pub fn content_type_for_filename(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    let ct = match ext.as_str() {
        "txt" | "text" | "log" => MIME_TEXT,
        "md" | "markdown" => MIME_MARKDOWN,
        "csv" => MIME_CSV,
        "html" | "htm" => MIME_HTML,
        "json" => MIME_JSON,
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "pptx" => MIME_PPTX,
        "xlsx" => MIME_XLSX,
        _ => return None,
    };
    Some(ct)
}

fn sniff(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"%PDF-") {
        MIME_PDF
    } else if std::str::from_utf8(bytes).is_ok() {
        MIME_TEXT
    } else {
        MIME_OCTET_STREAM
    }
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_XLSX => extract_xlsx(bytes),
        MIME_HTML => decode_utf8(bytes).map(|s| html_text(&s)),
        MIME_JSON => decode_utf8(bytes),
        ct if ct.starts_with("text/") => decode_utf8(bytes),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Encoding)
}

/// Elements whose text starts a new paragraph.
const HTML_BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "pre", "blockquote",
    "section", "article", "header", "footer", "table", "dd", "dt",
];
/// Elements whose text is never shown.
const HTML_HIDDEN_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Visible text of an HTML document's body, one paragraph per block element.
fn html_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let body = scraper::Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut out = String::new();
    let mut last_block = None;
    for node in body.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() || node.ancestors().any(|a| element_named(a.value(), HTML_HIDDEN_TAGS)) {
            continue;
        }
        let block = node
            .ancestors()
            .find(|a| element_named(a.value(), HTML_BLOCK_TAGS))
            .map(|a| a.id());
        if !out.is_empty() {
            out.push_str(if block == last_block { " " } else { "\n\n" });
        }
        out.push_str(trimmed);
        last_block = block;
    }
    out
}

fn element_named(node: &scraper::Node, names: &[&str]) -> bool {
    node.as_element().is_some_and(|e| names.contains(&e.name()))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Numbered parts (`prefix<N>.xml`) in numeric order.
fn numbered_parts(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Concatenate the text of every `<t>` element, one line per `paragraph` element.
fn collect_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_t = false;
                } else if name.as_ref() == paragraph && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_parts(&archive, "ppt/slides/slide") {
        let xml = read_entry(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = match archive.index_for_name("xl/sharedStrings.xml") {
        Some(_) => shared_strings(&read_entry(&mut archive, "xl/sharedStrings.xml")?)?,
        None => Vec::new(),
    };
    let mut sheets = Vec::new();
    for name in numbered_parts(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry(&mut archive, &name)?;
        let text = sheet_cells(&xml, &shared)?;
        if !text.is_empty() {
            sheets.push(text);
        }
    }
    Ok(sheets.join("\n\n"))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one worksheet, one line per row, cells tab-separated.
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared_cell = false;
    let mut cells = 0usize;
    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => rows.push(Vec::new()),
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let raw = raw.trim();
                let value = if shared_cell {
                    raw.parse::<usize>().ok().and_then(|i| shared.get(i)).cloned()
                } else {
                    Some(raw.to_string())
                };
                if let Some(v) = value.filter(|v| !v.is_empty()) {
                    if rows.is_empty() {
                        rows.push(Vec::new());
                    }
                    if let Some(row) = rows.last_mut() {
                        row.push(v);
                    }
                    cells += 1;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows
        .into_iter()
        .filter(|r| !r.is_empty())
        .map(|r| r.join("\t"))
        .collect::<Vec<_>>()
        .join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_declared_type_wins() {
        let ct = detect_content_type(Some("text/markdown; charset=utf-8"), Some("a.pdf"), b"x");
        assert_eq!(ct, MIME_MARKDOWN);
    }

    #[test]
    fn test_octet_stream_falls_back_to_extension() {
        let ct = detect_content_type(Some(MIME_OCTET_STREAM), Some("Report.DOCX"), b"PK");
        assert_eq!(ct, MIME_DOCX);
    }

    #[test]
    fn test_sniffing() {
        assert_eq!(detect_content_type(None, None, b"%PDF-1.7 ..."), MIME_PDF);
        assert_eq!(detect_content_type(None, Some("notes"), b"hello"), MIME_TEXT);
        assert_eq!(
            detect_content_type(None, None, &[0xff, 0xfe, 0x00, 0x81]),
            MIME_OCTET_STREAM
        );
    }

    #[test]
    fn test_plain_text_passthrough() {
        let text = TextExtractor.parse("\u{feff}Hello\n\nWorld".as_bytes(), MIME_TEXT).unwrap();
        assert_eq!(text, "Hello\n\nWorld");
    }

    #[test]
    fn test_blank_text_document_parses_to_nothing() {
        let text = TextExtractor.parse(b"  \n\n ", MIME_TEXT).unwrap();
        assert!(text.trim().is_empty());
        assert_eq!(TextExtractor.parse(b"", MIME_TEXT).unwrap(), "");
    }

    #[test]
    fn test_unsupported_content_type() {
        let err = extract_text(b"foo", MIME_OCTET_STREAM).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn test_invalid_utf8_text() {
        let err = extract_text(&[0xc3, 0x28], MIME_TEXT).unwrap_err();
        assert!(matches!(err, ExtractError::Encoding));
    }

    #[test]
    fn test_invalid_pdf() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_zip_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn test_html_is_stripped() {
        let html = "<html><head><style>p { color: red; }</style></head>\
                    <body><p>Fish &amp; chips</p><script>alert(1)</script></body></html>";
        let text = extract_text(html.as_bytes(), MIME_HTML).unwrap();
        assert!(text.contains("Fish & chips"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn test_html_keeps_bare_angle_brackets_and_decodes_entities() {
        let html = "<p>5 < 6 apples</p><p>it&#8217;s fine &#x26; tidy</p><p>unclosed <b tail";
        let text = extract_text(html.as_bytes(), MIME_HTML).unwrap();
        assert!(text.contains("5 < 6 apples"), "text={:?}", text);
        assert!(text.contains("it\u{2019}s fine & tidy"), "text={:?}", text);
        assert!(text.starts_with("5 < 6 apples\n\nit"), "text={:?}", text);
    }

    #[test]
    fn test_html_inline_text_joins_within_a_block() {
        let html = "<body><div>Vacation <b>days</b> are <i>25</i>.</div><ul><li>One</li><li>Two</li></ul></body>";
        let text = extract_text(html.as_bytes(), MIME_HTML).unwrap();
        assert_eq!(text, "Vacation days are 25 .\n\nOne\n\nTwo");
    }

    #[test]
    fn test_docx_paragraphs() {
        let doc = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body><w:p><w:r><w:t>First para</w:t></w:r></w:p><w:p><w:r><w:t>Second</w:t></w:r><w:r><w:t> para</w:t></w:r></w:p></w:body>
</w:document>"#;
        let bytes = zip_with(&[("word/document.xml", doc)]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "First para\nSecond para");
    }

    #[test]
    fn test_xlsx_shared_strings() {
        let shared = r#"<sst><si><t>Region</t></si><si><t>West</t></si></sst>"#;
        let sheet = r#"<worksheet><sheetData>
<row><c t="s"><v>0</v></c><c><v>42</v></c></row>
<row><c t="s"><v>1</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let text = extract_text(&bytes, MIME_XLSX).unwrap();
        assert_eq!(text, "Region\t42\nWest");
    }

    #[test]
    fn test_pptx_slides_in_order() {
        let slide = |t: &str| format!("<p:sld><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>", t);
        let s1 = slide("One");
        let s2 = slide("Two");
        let s10 = slide("Ten");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let text = extract_text(&bytes, MIME_PPTX).unwrap();
        assert_eq!(text, "One\n\nTwo\n\nTen");
    }
}
