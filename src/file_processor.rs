//! Upload validation and transcript text extraction.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::AnalyzerError;

pub const MAX_FILE_BYTES: usize = 5 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: [&str; 2] = ["txt", "docx"];
pub const ALLOWED_MIME_TYPES: [&str; 3] = [
    "text/plain",
    DOCX_MIME,
    // browsers report some .docx uploads as opaque bytes
    "application/octet-stream",
];
/// Extracted text shorter than this (after trimming) is treated as unusable
pub const MIN_CONTENT_CHARS: usize = 10;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

static SAMPLE_TRANSCRIPT: &str = include_str!("../assets/sample_transcript.txt");

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]+").expect("filename regex"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("No file selected")]
    NoFile,
    #[error("File must have an extension")]
    MissingExtension,
    #[error("File type .{0} not allowed. Only .txt and .docx files are supported")]
    ExtensionNotAllowed(String),
    #[error("File too large. Maximum size is 5MB")]
    TooLarge,
    #[error("File is empty")]
    Empty,
    #[error("Could not read file content. Please ensure it's a valid .txt or .docx file")]
    NoUsableContent,
}

impl From<FileError> for AnalyzerError {
    fn from(err: FileError) -> Self {
        AnalyzerError::upload(err.to_string())
    }
}

/// One file received from a multipart upload
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Read a local file, guessing its content type from the extension
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut file = Self {
            filename,
            content_type: None,
            bytes,
        };
        file.content_type = match file.extension().as_deref() {
            Some("txt") => Some("text/plain".to_string()),
            Some("docx") => Some(DOCX_MIME.to_string()),
            _ => Some("application/octet-stream".to_string()),
        };
        Ok(file)
    }

    /// Lowercased extension, if the name has a non-empty one
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    /// Media type without parameters, lowercased
    fn media_type(&self) -> String {
        self.content_type
            .as_deref()
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    }
}

/// Name, extension, and size checks. Content is not inspected here.
pub fn validate_upload(file: &UploadedFile) -> Result<(), FileError> {
    if file.filename.trim().is_empty() {
        return Err(FileError::NoFile);
    }
    let ext = file.extension().ok_or(FileError::MissingExtension)?;
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(FileError::ExtensionNotAllowed(ext));
    }
    if file.bytes.len() > MAX_FILE_BYTES {
        return Err(FileError::TooLarge);
    }
    if file.bytes.is_empty() {
        return Err(FileError::Empty);
    }
    Ok(())
}

/// Decode the upload into transcript text.
///
/// Every failure collapses to [`FileError::NoUsableContent`]; the cause is
/// logged.
pub fn read_content(file: &UploadedFile) -> Result<String, FileError> {
    let media_type = file.media_type();
    let name = safe_filename(&file.filename);

    if !ALLOWED_MIME_TYPES.contains(&media_type.as_str()) {
        warn!(content_type = %media_type, file = %name, "rejected upload content type");
        return Err(FileError::NoUsableContent);
    }

    let is_text = media_type == "text/plain"
        || (media_type == "application/octet-stream" && file.extension().as_deref() == Some("txt"));

    let content = if is_text {
        String::from_utf8(file.bytes.clone()).map_err(|_| {
            warn!(file = %name, "upload is not valid UTF-8");
            FileError::NoUsableContent
        })?
    } else {
        read_docx(&file.bytes, &name)?
    };

    if content.trim().chars().count() < MIN_CONTENT_CHARS {
        warn!(file = %name, "upload has too little text");
        return Err(FileError::NoUsableContent);
    }
    Ok(content)
}

#[cfg(feature = "docx")]
fn read_docx(bytes: &[u8], name: &str) -> Result<String, FileError> {
    extract_docx_text(bytes).map_err(|e| {
        warn!(file = %name, error = %e, "could not read .docx upload");
        FileError::NoUsableContent
    })
}

#[cfg(not(feature = "docx"))]
fn read_docx(_bytes: &[u8], name: &str) -> Result<String, FileError> {
    warn!(file = %name, "built without .docx support");
    Err(FileError::NoUsableContent)
}

/// Paragraph text of a .docx document, one paragraph per line
#[cfg(feature = "docx")]
pub fn extract_docx_text(bytes: &[u8]) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| format!("DOCX zip: {}", e))?;
    let doc = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("DOCX missing document.xml: {}", e))?;

    let mut reader = quick_xml::Reader::from_reader(std::io::BufReader::new(doc));
    let mut buf = Vec::new();
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => current.clear(),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"p" => paragraphs.push(String::new()),
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                let text = e.unescape().map_err(|e| format!("DOCX text: {}", e))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("DOCX XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs.join("\n"))
}

/// Filesystem- and log-safe version of a client-supplied file name
pub fn safe_filename(filename: &str) -> String {
    let base = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c == '_');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// The demo transcript: the file at `override_path` when given, else the
/// copy bundled into the binary. `None` when the override can't be read.
pub fn load_sample_transcript(override_path: Option<&Path>) -> Option<String> {
    match override_path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => {
                info!(path = %path.display(), "sample transcript loaded");
                Some(content)
            }
            Ok(_) => {
                warn!(path = %path.display(), "sample transcript file is empty");
                None
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "sample transcript not readable");
                None
            }
        },
        None => Some(SAMPLE_TRANSCRIPT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, content_type: &str, bytes: &[u8]) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            content_type: Some(content_type.to_string()),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn validation_messages() {
        let cases = [
            (upload("", "text/plain", b"x"), "No file selected"),
            (upload("notes", "text/plain", b"x"), "File must have an extension"),
            (
                upload("deck.PDF", "application/pdf", b"%PDF"),
                "File type .pdf not allowed. Only .txt and .docx files are supported",
            ),
            (upload("call.txt", "text/plain", b""), "File is empty"),
        ];
        for (file, expected) in cases {
            assert_eq!(validate_upload(&file).unwrap_err().to_string(), expected);
        }
        assert!(validate_upload(&upload("call.TXT", "text/plain", b"hello")).is_ok());
    }

    #[test]
    fn text_with_charset_is_read() {
        let file = upload("call.txt", "text/plain; charset=utf-8", b"Rep: hello, how are you?");
        assert_eq!(read_content(&file).unwrap(), "Rep: hello, how are you?");
    }

    #[test]
    fn unusable_content_collapses_to_one_error() {
        let short = upload("call.txt", "text/plain", b"  hi  ");
        let binary = upload("call.txt", "text/plain", &[0xff; 16]);
        let wrong_type = upload("call.txt", "image/png", b"Rep: hello, how are you?");
        for file in [short, binary, wrong_type] {
            assert_eq!(read_content(&file), Err(FileError::NoUsableContent));
        }
    }

    #[test]
    fn octet_stream_txt_is_read_as_text() {
        let file = upload("call.txt", "application/octet-stream", b"Buyer: we need this by Q2.");
        assert_eq!(read_content(&file).unwrap(), "Buyer: we need this by Q2.");
    }

    #[test]
    fn safe_filename_strips_paths_and_symbols() {
        assert_eq!(safe_filename("../../etc/passwd"), "passwd");
        assert_eq!(safe_filename(r"C:\calls\Q1 call notes.txt"), "Q1_call_notes.txt");
        assert_eq!(safe_filename("..."), "upload");
    }

    #[test]
    fn bundled_sample_is_long_enough() {
        let sample = load_sample_transcript(None).unwrap();
        assert!(sample.trim().chars().count() >= crate::analysis::MIN_TRANSCRIPT_CHARS);
        assert!(load_sample_transcript(Some(Path::new("/definitely/not/here.txt"))).is_none());
    }
}
