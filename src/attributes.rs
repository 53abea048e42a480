//! Opaque attribute handling.
//!
//! The format of the standard attributes the core understands (`Code`,
//! `Exceptions`, `Signature`, debug tables, ...) is built into the reader and
//! writer. Everything else travels as an uninterpreted blob: the reader
//! surfaces an [`Attribute`] for each attribute whose name the caller
//! registered as a prototype, and the writer re-emits blobs verbatim (only the
//! name is re-interned into the output constant pool).

/// An attribute the core does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name, eg. `ScalaSig`
    pub type_name: String,

    /// Raw payload, without the 6 header bytes (name index and length)
    pub info: Vec<u8>,
}

impl Attribute {
    pub fn new(type_name: impl Into<String>, info: Vec<u8>) -> Attribute {
        Attribute {
            type_name: type_name.into(),
            info,
        }
    }
}
