use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

pub const MIN_DESCRIPTION_CHARS: usize = 20;
pub const MIN_LOCATION_CHARS: usize = 5;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@.]+(\.[^\s@.]+)+$").expect("valid email regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportFormValues {
    pub description: String,
    pub location: String,
    pub email: String,
    pub comments: String,
    pub send_to_local_police: bool,
    pub send_to_city_hall: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportField {
    Description,
    Location,
    Email,
    Comments,
    SendToLocalPolice,
    SendToCityHall,
}

impl ReportField {
    pub const ALL: [ReportField; 6] = [
        ReportField::Description,
        ReportField::Location,
        ReportField::Email,
        ReportField::Comments,
        ReportField::SendToLocalPolice,
        ReportField::SendToCityHall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportField::Description => "description",
            ReportField::Location => "location",
            ReportField::Email => "email",
            ReportField::Comments => "comments",
            ReportField::SendToLocalPolice => "sendToLocalPolice",
            ReportField::SendToCityHall => "sendToCityHall",
        }
    }
}

impl fmt::Display for ReportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    TooShort { min: usize },
    InvalidEmail,
    NoRecipient,
}

impl FieldErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            FieldErrorKind::TooShort { .. } => "too_short",
            FieldErrorKind::InvalidEmail => "invalid_email",
            FieldErrorKind::NoRecipient => "no_recipient",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldError {
    pub field: ReportField,
    pub kind: FieldErrorKind,
}

impl FieldError {
    pub fn message(&self) -> String {
        match (self.field, self.kind) {
            (ReportField::Description, FieldErrorKind::TooShort { min }) => {
                format!("Description must be at least {min} characters.")
            }
            (ReportField::Location, FieldErrorKind::TooShort { min }) => {
                format!("Photo location must be at least {min} characters.")
            }
            (field, FieldErrorKind::TooShort { min }) => {
                format!("{field} must be at least {min} characters.")
            }
            (_, FieldErrorKind::InvalidEmail) => "Please enter a valid email address.".to_string(),
            (_, FieldErrorKind::NoRecipient) => {
                "Please select at least one recipient (Local Police or City Hall).".to_string()
            }
        }
    }
}

impl Serialize for FieldError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FieldError", 3)?;
        state.serialize_field("kind", self.kind.code())?;
        let min = match self.kind {
            FieldErrorKind::TooShort { min } => Some(min),
            _ => None,
        };
        state.serialize_field("min", &min)?;
        state.serialize_field("message", &self.message())?;
        state.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<ReportField, FieldError>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn get(&self, field: ReportField) -> Option<&FieldError> {
        self.0.get(&field)
    }

    pub fn insert(&mut self, field: ReportField, kind: FieldErrorKind) {
        self.0.insert(field, FieldError { field, kind });
    }

    pub fn remove(&mut self, field: ReportField) {
        self.0.remove(&field);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn fields(&self) -> impl Iterator<Item = ReportField> + '_ {
        self.0.keys().copied()
    }

    pub fn refresh(&mut self, values: &ReportFormValues, field: ReportField) {
        match validate_field(values, field) {
            Some(kind) => self.insert(field, kind),
            None => self.remove(field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidReport {
    pub description: String,
    pub location: String,
    pub email: Option<String>,
    pub comments: Option<String>,
    pub send_to_local_police: bool,
    pub send_to_city_hall: bool,
}

impl ValidReport {
    pub fn recipients(&self) -> Vec<&'static str> {
        let mut recipients = Vec::new();
        if self.send_to_local_police {
            recipients.push("local_police");
        }
        if self.send_to_city_hall {
            recipients.push("city_hall");
        }
        recipients
    }
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

/// Checks a single field. The recipients rule is reported on `SendToLocalPolice`.
pub fn validate_field(values: &ReportFormValues, field: ReportField) -> Option<FieldErrorKind> {
    match field {
        ReportField::Description if char_len(&values.description) < MIN_DESCRIPTION_CHARS => {
            Some(FieldErrorKind::TooShort {
                min: MIN_DESCRIPTION_CHARS,
            })
        }
        ReportField::Location if char_len(&values.location) < MIN_LOCATION_CHARS => {
            Some(FieldErrorKind::TooShort {
                min: MIN_LOCATION_CHARS,
            })
        }
        ReportField::Email if !values.email.is_empty() && !is_valid_email(&values.email) => {
            Some(FieldErrorKind::InvalidEmail)
        }
        ReportField::SendToLocalPolice
            if !values.send_to_local_police && !values.send_to_city_hall =>
        {
            Some(FieldErrorKind::NoRecipient)
        }
        _ => None,
    }
}

pub fn validate(values: &ReportFormValues) -> Result<ValidReport, FieldErrors> {
    let mut errors = FieldErrors::default();
    for field in ReportField::ALL {
        if let Some(kind) = validate_field(values, field) {
            errors.insert(field, kind);
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let optional = |value: &str| {
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    };
    Ok(ValidReport {
        description: values.description.clone(),
        location: values.location.clone(),
        email: optional(&values.email),
        comments: optional(&values.comments),
        send_to_local_police: values.send_to_local_police,
        send_to_city_hall: values.send_to_city_hall,
    })
}
