use std::fmt::Display;
use thiserror::Error;

/// Main error type for the sheet pipeline.
/// Aggregates errors from the standard library, dependencies and every pipeline module.
#[derive(Error, Debug)]
pub enum SheetError {
    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("{0}")]
    StringEncodingError(#[from] std::str::Utf8Error),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    // Helper module errors
    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    CfbError(#[from] crate::helpers::cfb::CfbError),

    #[error("{0}")]
    Biff8Error(#[from] crate::helpers::biff8::Biff8Error),

    // Pipeline module errors
    #[error("{0}")]
    RequestError(#[from] crate::coordinator::RequestError),

    #[error("{0}")]
    DecodeError(#[from] crate::workbook::DecodeError),

    #[error("{0}")]
    EncodeError(#[from] crate::workbook::EncodeError),

    #[error("{0}")]
    TransformError(#[from] crate::transform::TransformError),

    #[error("{0}")]
    ArchiveError(#[from] crate::archive::ArchiveError),

    #[error("{0}")]
    WorkspaceError(#[from] crate::workspace::WorkspaceError),
}

/// Coarse classification of a failed request, as reported to the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Decode,
    MissingColumn,
    UnsupportedAction,
    Encode,
    DuplicateEntry,
    Storage,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "InvalidRequestError",
            ErrorKind::Decode => "DecodeError",
            ErrorKind::MissingColumn => "MissingColumnError",
            ErrorKind::UnsupportedAction => "UnsupportedActionError",
            ErrorKind::Encode => "EncodeError",
            ErrorKind::DuplicateEntry => "DuplicateEntryError",
            ErrorKind::Storage => "StorageError",
        };
        write!(f, "{name}")
    }
}

impl SheetError {
    /// Classifies this error into one of the request-level error kinds.
    pub fn kind(&self) -> ErrorKind {
        use crate::archive::ArchiveError;
        use crate::coordinator::RequestError;
        use crate::transform::TransformError;
        use crate::workspace::WorkspaceError;

        match self {
            SheetError::RequestError(RequestError::UnsupportedAction { .. }) => ErrorKind::UnsupportedAction,
            SheetError::RequestError(_) => ErrorKind::InvalidRequest,
            SheetError::WorkspaceError(WorkspaceError::InvalidName(_)) => ErrorKind::InvalidRequest,
            SheetError::WorkspaceError(_) | SheetError::IoError(_) => ErrorKind::Storage,
            SheetError::TransformError(TransformError::MissingColumn { .. }) => ErrorKind::MissingColumn,
            SheetError::EncodeError(_) => ErrorKind::Encode,
            SheetError::ArchiveError(ArchiveError::DuplicateEntry(_)) => ErrorKind::DuplicateEntry,
            SheetError::ArchiveError(ArchiveError::InvalidEntryName(_)) => ErrorKind::InvalidRequest,
            SheetError::ArchiveError(ArchiveError::WriteError(_)) => ErrorKind::Storage,
            _ => ErrorKind::Decode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RequestError;
    use crate::transform::TransformError;

    #[test]
    fn kind_of_unsupported_action() {
        let error = SheetError::from(RequestError::UnsupportedAction {
            action: "fun9".to_owned(),
        });
        assert_eq!(error.kind(), ErrorKind::UnsupportedAction);
        assert_eq!(error.kind().to_string(), "UnsupportedActionError");
    }

    #[test]
    fn kind_of_missing_column() {
        let error = SheetError::from(TransformError::MissingColumn {
            column: "type".to_owned(),
        });
        assert_eq!(error.kind(), ErrorKind::MissingColumn);
        assert!(error.to_string().contains("type"));
    }
}
