//! Bridging Rust types into the registry.

use crate::error::RegistryResult;
use crate::schema::Field;
use crate::value::Record;

/// A Rust type with a registered record layout.
///
/// Implementors convert to and from [`Record`] explicitly; the registry
/// never inspects the Rust type itself.
///
/// ```
/// use knot_registry::{Field, Kind, Native, Record, RegistryResult};
///
/// struct Note {
///     text: String,
/// }
///
/// impl Native for Note {
///     const NAME: &'static str = "doc.Note";
///
///     fn fields() -> Vec<Field> {
///         vec![Field::new("text", Kind::Str)]
///     }
///
///     fn to_record(&self) -> Record {
///         Record::new(Self::NAME).with("text", self.text.as_str())
///     }
///
///     fn from_record(record: &Record) -> RegistryResult<Self> {
///         Ok(Self {
///             text: record.require("text")?.as_str().unwrap_or_default().to_string(),
///         })
///     }
/// }
///
/// let note = Note { text: "hi".into() };
/// assert_eq!(Note::from_record(&note.to_record()).unwrap().text, "hi");
/// ```
pub trait Native: Sized {
    /// Registered type name.
    const NAME: &'static str;

    /// Field layout, in encoding order.
    fn fields() -> Vec<Field>;

    /// Convert into a record tagged with [`Self::NAME`].
    fn to_record(&self) -> Record;

    /// Rebuild from a decoded record.
    fn from_record(record: &Record) -> RegistryResult<Self>;
}
