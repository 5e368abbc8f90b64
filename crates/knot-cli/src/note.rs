use knot_registry::{Field, Kind, Native, Record, RegistryError, RegistryResult};

/// The record type the CLI appends to feeds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    pub text: String,
}

impl Native for Note {
    const NAME: &'static str = "knot.Note";

    fn fields() -> Vec<Field> {
        vec![Field::new("text", Kind::Str)]
    }

    fn to_record(&self) -> Record {
        Record::new(Self::NAME).with("text", self.text.as_str())
    }

    fn from_record(record: &Record) -> RegistryResult<Self> {
        let text = record
            .require("text")?
            .as_str()
            .ok_or_else(|| RegistryError::FieldMismatch {
                type_name: Self::NAME.to_string(),
                reason: "text is not a string".into(),
            })?;
        Ok(Self {
            text: text.to_string(),
        })
    }
}
