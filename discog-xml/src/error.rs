use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum XmlError {
    #[error("error reading from underlying byte stream")]
    Io(#[source] std::io::Error),

    #[error("malformed XML syntax")]
    Syntax(#[source] quick_xml::Error),

    #[error("element had no usable `id` attribute")]
    MissingId,

    #[error("`id` attribute {0:?} is not a valid integer")]
    InvalidId(String),

    #[error("failed to canonicalize projected record")]
    Canonicalize(#[from] discog_types::canonical::CanonicalizeError),
}

impl From<quick_xml::events::attributes::AttrError> for XmlError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        XmlError::Syntax(err.into())
    }
}

impl From<quick_xml::Error> for XmlError {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io_err) => {
                XmlError::Io(std::io::Error::new(io_err.kind(), io_err))
            }
            other => XmlError::Syntax(other),
        }
    }
}
