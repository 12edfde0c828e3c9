//! Input documents: reading, encoding detection, decoding and XML parsing.
//!
//! Documents are held whole in memory and parsed into an `sxd-document`
//! package, the tree the query layer evaluates against.

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::path::{Path, PathBuf};
use sxd_document::Package;
use tracing::{debug, warn};

use crate::error::{InputError, InputResult};

/// `encoding="..."` in the XML declaration.
static DECLARED_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*<\?xml[^>]*?encoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#)
        .expect("Invalid declaration regex")
});

/// A decoded input document, ready to be parsed.
#[derive(Debug, Clone)]
pub struct InputDocument {
    /// Identity used in logs and errors (the path, or a caller-supplied name).
    pub name: String,
    pub path: Option<PathBuf>,
    /// Encoding the bytes were decoded from.
    pub encoding: String,
    pub text: String,
}

impl InputDocument {
    /// Read and decode a file.
    pub fn read<P: AsRef<Path>>(path: P) -> InputResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut document = Self::from_bytes(path.display().to_string(), &bytes)?;
        document.path = Some(path.to_path_buf());
        Ok(document)
    }

    /// Decode `bytes` with auto-detected encoding.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> InputResult<Self> {
        let name = name.into();
        let encoding = detect_encoding(bytes);
        let text = decode_content(bytes, &encoding, &name)?;
        debug!(document = %name, encoding = %encoding, "Decoded input document");
        Ok(Self {
            name,
            path: None,
            encoding,
            text,
        })
    }

    /// Parse the decoded text. External entities are not resolved.
    pub fn parse(&self) -> InputResult<Package> {
        sxd_document::parser::parse(&self.text).map_err(|e| InputError::Xml {
            document: self.name.clone(),
            message: format!("{:?}", e),
        })
    }
}

/// Detect the encoding of raw document bytes.
///
/// A byte order mark wins, then the XML declaration. Undeclared documents
/// are UTF-8 whenever they decode as such; chardet only guesses for the rest.
pub fn detect_encoding(bytes: &[u8]) -> String {
    if let Some((encoding, _)) = encoding_rs::Encoding::for_bom(bytes) {
        return encoding.name().to_ascii_lowercase();
    }

    let head = &bytes[..bytes.len().min(256)];
    if let Some(caps) = DECLARED_ENCODING.captures(head) {
        return String::from_utf8_lossy(&caps[1]).to_ascii_lowercase();
    }

    if std::str::from_utf8(bytes).is_ok() {
        return "utf-8".to_string();
    }

    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names. The bytes are known not to be UTF-8.
    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => "windows-1252".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other => other.to_string(),
    }
}

/// Decode bytes using the given encoding label.
///
/// Malformed sequences are replaced and logged; an unknown label is an error.
pub fn decode_content(bytes: &[u8], encoding: &str, document: &str) -> InputResult<String> {
    let charset = encoding_rs::Encoding::for_label(encoding.as_bytes()).ok_or_else(|| {
        InputError::Encoding {
            document: document.to_string(),
            message: format!("Unsupported encoding \"{}\"", encoding),
        }
    })?;

    let (text, used, had_errors) = charset.decode(bytes);
    if had_errors {
        warn!(
            document = %document,
            encoding = %used.name(),
            "Input contains malformed sequences, replaced with U+FFFD"
        );
    }
    Ok(text.into_owned())
}
