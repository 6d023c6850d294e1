//! The validation-error taxonomy reported while sanitizing a document.
//!
//! Every rejected construct produces one [`ValidationError`]; the sanitizer
//! keeps going, so a single pass can report many of them. Errors are handed
//! to a [`ValidationSink`] together with the DOM node they originated from.

use std::cell::RefCell;

use kuchikiki::NodeRef;
use serde::Serialize;

/// A single CSS construct or stylesheet rejected during sanitization.
///
/// The serialized form is tagged with the stable snake_case code that hosts
/// match on, e.g. `{"code": "illegal_css_property", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("at-rule @{name} is not allowed")]
    IllegalCssAtRule { name: String },

    #[error("@import rules are not allowed")]
    IllegalCssImportRule,

    #[error("property {property_name} is not allowed")]
    IllegalCssProperty {
        property_name: String,
        property_value: String,
    },

    #[error("!important is not allowed on {property_name}")]
    IllegalCssImportant { property_name: String },

    #[error("unrecognized CSS: {message}")]
    UnrecognizedCss { message: String },

    #[error("stylesheet could not be parsed: {message}")]
    CssParseError { message: String },

    #[error("stylesheet exceeds the byte budget by {excess_bytes} bytes")]
    TooMuchCss { excess_bytes: usize },

    #[error("stylesheet URL {url} does not have a CSS file extension")]
    AmpCssBadFileExtension { url: String },

    #[error("stylesheet URL {url} could not be resolved to a local file")]
    AmpCssPathNotFound { url: String },

    #[error("stylesheet file could not be read: {message}")]
    StylesheetFileReadError { message: String },

    #[error("document has no body element")]
    MissingBodyElement,
}

impl ValidationError {
    /// Stable snake_case code for the error, matching the serialized tag.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::IllegalCssAtRule { .. } => "illegal_css_at_rule",
            ValidationError::IllegalCssImportRule => "illegal_css_import_rule",
            ValidationError::IllegalCssProperty { .. } => "illegal_css_property",
            ValidationError::IllegalCssImportant { .. } => "illegal_css_important",
            ValidationError::UnrecognizedCss { .. } => "unrecognized_css",
            ValidationError::CssParseError { .. } => "css_parse_error",
            ValidationError::TooMuchCss { .. } => "too_much_css",
            ValidationError::AmpCssBadFileExtension { .. } => "amp_css_bad_file_extension",
            ValidationError::AmpCssPathNotFound { .. } => "amp_css_path_not_found",
            ValidationError::StylesheetFileReadError { .. } => "stylesheet_file_read_error",
            ValidationError::MissingBodyElement => "missing_body_element",
        }
    }
}

/// Receives validation errors as they are encountered, tagged with the DOM
/// node they belong to. Implementations use interior mutability so the
/// sanitizer can hold a shared reference for the whole pass.
pub trait ValidationSink {
    fn report(&self, error: ValidationError, node: &NodeRef);
}

/// A recorded error plus the local name of its origin element, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationRecord {
    #[serde(flatten)]
    pub error: ValidationError,
    pub node_name: Option<String>,
}

/// Default sink: collects every report in encounter order.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    records: RefCell<Vec<ValidationRecord>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_records(self) -> Vec<ValidationRecord> {
        self.records.into_inner()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl ValidationSink for ErrorCollector {
    fn report(&self, error: ValidationError, node: &NodeRef) {
        let node_name = node
            .as_element()
            .map(|element| element.name.local.to_string());
        self.records
            .borrow_mut()
            .push(ValidationRecord { error, node_name });
    }
}
