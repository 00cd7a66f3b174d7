//! Error taxonomy for a certificate batch.
//!
//! Every fallible stage of the pipeline returns a [`BatchResult`]. The variants
//! map onto the HTTP boundary through [`BatchError::status_code`] and
//! [`BatchError::public_message`]; the latter never leaks paths or internal
//! details to the caller.

use std::io;

/// Message sent to callers for faults that are not their fault.
pub const GENERIC_FAILURE_MESSAGE: &str = "Error generating certificates";

/// Everything that can end a batch early.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// The template could not be decoded as a raster image.
    #[error("unsupported template image: {0}")]
    UnsupportedImageFormat(String),

    /// The template decoded fine but exceeds the configured dimensions.
    #[error("template is {width}x{height}px, limit is {max_width}x{max_height}px")]
    TemplateTooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    /// The names file is not well-formed comma-separated data.
    #[error("malformed names file at line {line}: {reason}")]
    MalformedInput { line: usize, reason: String },

    /// The render settings record is unusable.
    #[error("invalid render settings: {0}")]
    InvalidSettings(String),

    /// The archive sink refused bytes (typically a disconnected client).
    #[error("archive sink write failed: {0}")]
    SinkWriteFailed(#[source] io::Error),

    /// Catch-all for unexpected faults during rendering or encoding.
    #[error("internal error: {0}")]
    InternalError(String),
}

pub type BatchResult<T> = Result<T, BatchError>;

impl BatchError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            line,
            reason: reason.into(),
        }
    }

    /// True for failures caused by the caller's inputs. These are detected
    /// before any archive byte is emitted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedImageFormat(_)
                | Self::TemplateTooLarge { .. }
                | Self::MalformedInput { .. }
                | Self::InvalidSettings(_)
        )
    }

    /// HTTP status for a response that has not started streaming yet.
    pub fn status_code(&self) -> u16 {
        if self.is_validation() {
            400
        } else {
            500
        }
    }

    /// Plain-text body safe to hand to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::TemplateTooLarge {
                max_width,
                max_height,
                ..
            } => format!("Template image size must not exceed {max_width}px x {max_height}px."),
            Self::UnsupportedImageFormat(_) => {
                "Template must be a PNG, JPEG, GIF, BMP or WebP image.".to_string()
            }
            Self::MalformedInput { line, .. } => {
                format!("Names file could not be parsed as CSV (line {line}).")
            }
            Self::InvalidSettings(reason) => format!("Invalid render settings: {reason}."),
            Self::SinkWriteFailed(_) | Self::InternalError(_) => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        }
    }
}

impl From<zip::result::ZipError> for BatchError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Self::SinkWriteFailed(e),
            other => Self::InternalError(format!("archive: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_large_message_matches_boundary_text() {
        let err = BatchError::TemplateTooLarge {
            width: 600,
            height: 200,
            max_width: 500,
            max_height: 500,
        };
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err.public_message(),
            "Template image size must not exceed 500px x 500px."
        );
    }

    #[test]
    fn internal_faults_are_opaque() {
        let err = BatchError::internal("png encoder blew up at /tmp/uploads/abc");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.public_message(), GENERIC_FAILURE_MESSAGE);
        assert!(!err.is_validation());
    }

    #[test]
    fn sink_failure_is_server_side() {
        let err = BatchError::SinkWriteFailed(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn zip_io_errors_become_sink_failures() {
        let zip_err = zip::result::ZipError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "x"));
        assert!(matches!(
            BatchError::from(zip_err),
            BatchError::SinkWriteFailed(_)
        ));
    }

    #[test]
    fn malformed_input_carries_line() {
        let err = BatchError::malformed(7, "unterminated quoted field");
        assert_eq!(err.status_code(), 400);
        assert!(err.public_message().contains("line 7"));
    }
}
