//! Model upload staging
//!
//! Streams an upload into the job workspace while hashing it. The stream is
//! read in 64 KiB chunks; crossing the size limit stops reading at once and
//! removes the partial file, so memory use is bounded regardless of upload
//! size.
//!
//! Format checks happen in two steps: the declared extension must be an
//! accepted format before any byte is read, then the first bytes must look
//! like that format.

use crate::models::{ModelFormat, StagedModel};
use crate::services::job_workspace::JobWorkspace;
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const CHUNK_SIZE: usize = 64 * 1024;
/// Bytes inspected for content sniffing
const SNIFF_LEN: usize = 512;
/// Binary STL: 80-byte header + u32 triangle count
const STL_HEADER_LEN: usize = 84;
const STL_TRIANGLE_LEN: u64 = 50;

/// Upload validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("Upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("Upload is empty")]
    EmptyUpload,

    #[error("Upload I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stage an upload into `workspace`
///
/// On any error the partially written file is removed before returning.
pub async fn stage_model<R>(
    mut reader: R,
    declared_filename: &str,
    max_bytes: u64,
    workspace: &JobWorkspace,
) -> Result<StagedModel, ValidationError>
where
    R: AsyncRead + Unpin,
{
    let format = ModelFormat::from_filename(declared_filename).ok_or_else(|| {
        ValidationError::UnsupportedFormat(format!(
            "'{}' does not have an accepted extension (stl, 3mf, obj, amf, step)",
            declared_filename
        ))
    })?;

    let path = workspace.model_path(format);
    debug!(
        job_id = %workspace.job_id(),
        filename = declared_filename,
        format = ?format,
        "Staging model upload"
    );

    match copy_bounded(&mut reader, &path, max_bytes, format).await {
        Ok((size_bytes, sha256)) => {
            info!(
                job_id = %workspace.job_id(),
                size_bytes,
                sha256 = %sha256,
                "Model staged"
            );
            Ok(StagedModel {
                original_filename: declared_filename.to_string(),
                sha256,
                path,
                size_bytes,
                format,
            })
        }
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %remove_err, "Failed to remove rejected upload");
                }
            }
            Err(e)
        }
    }
}

async fn copy_bounded<R>(
    reader: &mut R,
    path: &Path,
    max_bytes: u64,
    format: ModelFormat,
) -> Result<(u64, String), ValidationError>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
    let mut sniffed = false;
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buffer).await?;
        if n == 0 {
            break;
        }

        total += n as u64;
        if total > max_bytes {
            return Err(ValidationError::PayloadTooLarge { limit: max_bytes });
        }

        let chunk = &buffer[..n];
        if !sniffed {
            let take = (SNIFF_LEN - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            if head.len() >= SNIFF_LEN {
                check_content(format, &head)?;
                sniffed = true;
            }
        }

        hasher.update(chunk);
        file.write_all(chunk).await?;
    }

    if total == 0 {
        return Err(ValidationError::EmptyUpload);
    }
    if !sniffed {
        check_content(format, &head)?;
    }
    if format == ModelFormat::Stl {
        check_stl_size(&head, total)?;
    }

    file.flush().await?;
    Ok((total, format!("{:x}", hasher.finalize())))
}

/// Check the leading bytes against the declared format
pub fn check_content(format: ModelFormat, head: &[u8]) -> Result<(), ValidationError> {
    let is_zip = infer::archive::is_zip(head);

    let ok = match format {
        ModelFormat::ThreeMf => is_zip,
        ModelFormat::Amf => is_zip || looks_like_xml(head),
        ModelFormat::Step => trim_leading_whitespace(head).starts_with(b"ISO-10303-21"),
        ModelFormat::Obj => !head.contains(&0) && !is_foreign_type(head),
        ModelFormat::Stl => !is_foreign_type(head),
    };

    if ok {
        Ok(())
    } else {
        let detected = infer::get(head)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "unrecognised content".to_string());
        Err(ValidationError::UnsupportedFormat(format!(
            "content does not match .{} ({})",
            format.extension(),
            detected
        )))
    }
}

/// Binary STL size must equal header + 50 bytes per triangle
///
/// Files starting with `solid` are treated as ASCII STL unless they also
/// satisfy the binary size rule.
fn check_stl_size(head: &[u8], total: u64) -> Result<(), ValidationError> {
    let binary_ok = head.len() >= STL_HEADER_LEN && {
        let count = u32::from_le_bytes([head[80], head[81], head[82], head[83]]) as u64;
        STL_HEADER_LEN as u64 + STL_TRIANGLE_LEN * count == total
    };
    if binary_ok {
        return Ok(());
    }

    let trimmed = trim_leading_whitespace(head);
    if trimmed.starts_with(b"solid") && !head.contains(&0) {
        return Ok(());
    }

    Err(ValidationError::UnsupportedFormat(
        "STL is neither ASCII nor a well-formed binary STL".to_string(),
    ))
}

/// Something `infer` recognises that is not a text or zip container
fn is_foreign_type(head: &[u8]) -> bool {
    matches!(infer::get(head), Some(t) if t.matcher_type() != infer::MatcherType::Text)
}

fn looks_like_xml(head: &[u8]) -> bool {
    let trimmed = trim_leading_whitespace(head);
    let trimmed = trimmed.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(trimmed);
    trimmed.starts_with(b"<")
}

fn trim_leading_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    &bytes[start..]
}
