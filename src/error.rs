use thiserror::Error;

/// Failures while turning an uploaded file into template content.
///
/// Any of these clears the session's previous content; nothing is left
/// half-updated.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("unsupported template format: {0} (expected .htm, .html or .zip)")]
    UnsupportedFormat(String),

    #[error("archive does not contain a sheet file (sheet.htm or sheetN.html)")]
    MissingSheet,

    #[error("failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("failed to read template: {0}")]
    Io(#[from] std::io::Error),

    #[error("template document is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("upload is empty")]
    Empty,
}

/// Failures while evaluating a calculation field's formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,

    #[error("range {0} spans more than one sheet")]
    CrossSheetRange(String),

    #[error("unexpected '{found}' at position {position}")]
    UnexpectedToken { found: char, position: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,

    #[error("formula for {0} references itself")]
    Cycle(String),
}

/// Failures of session-level operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no template content is loaded")]
    NoContent,

    #[error("unknown field instance '{0}'")]
    UnknownField(String),

    #[error("field '{0}' is a calculation and cannot be edited directly")]
    NotEditable(String),

    #[error("load {ticket} was superseded by load {current}")]
    StaleLoad { ticket: u64, current: u64 },

    #[error(transparent)]
    Upload(#[from] UploadError),
}
