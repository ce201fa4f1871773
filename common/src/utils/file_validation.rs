use crate::error::AppError;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const MIN_UPLOAD_BYTES: usize = 100;

const ALLOWED_EXTENSIONS: &[&str] = &["txt", "md", "json", "csv", "pdf", "html", "htm", "xml"];

/// Byte markers that indicate an executable or script smuggled into an
/// upload that claims to be a document.
const SUSPICIOUS_MARKERS: &[&[u8]] = &[
    b"<script",
    b"#!/",
    b"<?php",
    b"powershell",
    b"\x7fELF",
];

/// Windows PE header; checked at offset 0 only, "MZ" mid-file is harmless.
const PE_MAGIC: &[u8] = b"MZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub filename: String,
    pub extension: String,
    pub mime: String,
}

/// Strip directory components and reject hostile names outright.
fn sanitize_filename(filename: &str) -> Result<String, AppError> {
    if filename.is_empty() {
        return Err(AppError::Validation("filename must not be empty".into()));
    }
    if filename.contains('\0') {
        return Err(AppError::Validation("filename contains a null byte".into()));
    }
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(AppError::Validation(
            "filename must not contain path components".into(),
        ));
    }

    let cleaned: String = filename
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();

    if cleaned.trim().is_empty() || !cleaned.contains('.') {
        return Err(AppError::Validation(format!(
            "filename '{filename}' is not acceptable"
        )));
    }

    Ok(cleaned)
}

fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

fn magic_bytes_ok(extension: &str, content: &[u8]) -> bool {
    match extension {
        "pdf" => content.starts_with(b"%PDF-"),
        _ => true,
    }
}

fn scan_for_suspicious_content(extension: &str, content: &[u8]) -> Result<(), AppError> {
    if content.starts_with(PE_MAGIC) {
        return Err(AppError::Validation(
            "upload looks like a Windows executable".into(),
        ));
    }

    let lowered: Vec<u8> = content
        .iter()
        .map(|b| b.to_ascii_lowercase())
        .collect();

    for marker in SUSPICIOUS_MARKERS {
        // HTML legitimately contains script tags; everything else may not.
        if *marker == b"<script" && (extension == "html" || extension == "htm") {
            continue;
        }
        if lowered
            .windows(marker.len())
            .any(|window| window == *marker)
        {
            return Err(AppError::Validation(
                "upload contains script or executable markers".into(),
            ));
        }
    }

    Ok(())
}

/// Validate an uploaded document per the ingestion rules: size bounds,
/// extension allowlist, magic-byte match and a suspicious-content scan.
pub fn validate_upload(filename: &str, content: &[u8]) -> Result<ValidatedUpload, AppError> {
    let cleaned = sanitize_filename(filename)?;

    if content.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::Validation(format!(
            "upload exceeds {MAX_UPLOAD_BYTES} bytes"
        )));
    }
    if content.len() < MIN_UPLOAD_BYTES {
        return Err(AppError::Validation(format!(
            "upload is smaller than {MIN_UPLOAD_BYTES} bytes"
        )));
    }

    let extension = extension_of(&cleaned)
        .ok_or_else(|| AppError::Validation("filename has no extension".into()))?;
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::Validation(format!(
            "extension .{extension} is not allowed"
        )));
    }

    if !magic_bytes_ok(&extension, content) {
        return Err(AppError::Validation(format!(
            "content does not match declared .{extension} format"
        )));
    }

    scan_for_suspicious_content(&extension, content)?;

    let mime = mime_guess::from_ext(&extension)
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(ValidatedUpload {
        filename: cleaned,
        extension,
        mime,
    })
}
