//! Local text conversion for binary documents (PDF, DOCX, PPTX).
//!
//! DOCX paragraphs and PPTX slides each become their own line so the
//! segmenter's line ranges point somewhere meaningful. A mime type of
//! `application/octet-stream` falls back to the file extension.

use std::io::{Cursor, Read};

use async_trait::async_trait;
use quick_xml::events::Event;

use marble_core::error::{Error, Result, Service};
use marble_core::objects::TextConverter;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Zip-bomb guard for a single decompressed XML entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pdf,
    Docx,
    Pptx,
}

fn detect(mime_type: &str, file_name: &str) -> Option<Format> {
    let base = mime_type.split(';').next().unwrap_or("").trim();
    match base {
        MIME_PDF => return Some(Format::Pdf),
        MIME_DOCX => return Some(Format::Docx),
        MIME_PPTX => return Some(Format::Pptx),
        "application/octet-stream" | "" => {}
        _ => return None,
    }
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(Format::Pdf),
        "docx" => Some(Format::Docx),
        "pptx" => Some(Format::Pptx),
        _ => None,
    }
}

#[derive(Default)]
pub struct LocalConverter;

impl LocalConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextConverter for LocalConverter {
    async fn to_text(&self, bytes: &[u8], mime_type: &str, file_name: &str) -> Result<String> {
        let format = detect(mime_type, file_name).ok_or_else(|| {
            Error::upstream(
                Service::Conversion,
                format!("unsupported content-type: {}", mime_type),
            )
        })?;

        let owned = bytes.to_vec();
        tokio::task::spawn_blocking(move || extract(format, &owned))
            .await
            .map_err(|e| Error::upstream(Service::Conversion, e))?
            .map_err(|e| Error::upstream(Service::Conversion, e))
    }
}

fn extract(format: Format, bytes: &[u8]) -> std::result::Result<String, String> {
    match format {
        Format::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| format!("PDF extraction failed: {}", e)),
        Format::Docx => extract_docx(bytes),
        Format::Pptx => extract_pptx(bytes),
    }
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> std::result::Result<Archive<'_>, String> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not an OOXML archive: {}", e))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> std::result::Result<Vec<u8>, String> {
    let entry = archive
        .by_name(name)
        .map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| format!("{}: {}", name, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        ));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    let paragraphs = text_runs_by_paragraph(&xml)?;
    Ok(paragraphs.join("\n"))
}

fn extract_pptx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slides.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut lines = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_entry(&mut archive, &name)?;
        let text = text_runs_by_paragraph(&xml)?.join(" ");
        if !text.is_empty() {
            lines.push(text);
        }
    }
    Ok(lines.join("\n"))
}

/// Concatenated `<*:t>` text per `<*:p>` paragraph; empty paragraphs are
/// dropped. Works for both WordprocessingML and DrawingML.
fn text_runs_by_paragraph(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ooxml(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
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

    #[tokio::test]
    async fn docx_paragraphs_become_lines() {
        let doc = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Project Marble</w:t></w:r><w:r><w:t xml:space="preserve"> lets teams</w:t></w:r></w:p>
            <w:p></w:p>
            <w:p><w:r><w:t>chat with files &amp; folders.</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let bytes = ooxml(&[("word/document.xml", doc)]);
        let text = LocalConverter
            .to_text(&bytes, MIME_DOCX, "intro.docx")
            .await
            .unwrap();
        assert_eq!(text, "Project Marble lets teams\nchat with files & folders.");
    }

    #[tokio::test]
    async fn pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#,
                t
            )
        };
        let (s1, s2, s10) = (slide("first"), slide("second"), slide("tenth"));
        let bytes = ooxml(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let text = LocalConverter
            .to_text(&bytes, "application/octet-stream", "deck.PPTX")
            .await
            .unwrap();
        assert_eq!(text, "first\nsecond\ntenth");
    }

    #[tokio::test]
    async fn unsupported_and_corrupt_inputs_are_conversion_failures() {
        for (bytes, mime, name) in [
            (b"foo".as_slice(), "image/png", "x.png"),
            (b"not a pdf".as_slice(), MIME_PDF, "x.pdf"),
            (b"not a zip".as_slice(), MIME_DOCX, "x.docx"),
        ] {
            let err = LocalConverter.to_text(bytes, mime, name).await.unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::Upstream {
                        service: Service::Conversion,
                        ..
                    }
                ),
                "{} -> {:?}",
                mime,
                err
            );
        }
    }

    #[test]
    fn detection_prefers_mime_then_extension() {
        assert_eq!(detect(MIME_PDF, "x.bin"), Some(Format::Pdf));
        assert_eq!(detect("application/octet-stream", "a.docx"), Some(Format::Docx));
        assert_eq!(detect("application/octet-stream", "a.zip"), None);
        assert_eq!(detect("image/png", "a.pdf"), None);
    }
}
