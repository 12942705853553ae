//! Field, index and value types used by model states and operations.
//!
//! Each [`FieldType`] variant corresponds to a Django model field class.
//! Relational fields (`ForeignKey`, `OneToOneField`, `ManyToManyField`) carry
//! the target model and the metadata the migration writer needs to emit them.

use serde::{Deserialize, Serialize};

/// The type of a model field.
///
/// The JSON form is tagged by `"type"`, e.g. `{"type": "CharField"}` or
/// `{"type": "ForeignKey", "to": "auth.user", "on_delete": "Cascade"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    /// Auto-incrementing 32-bit integer primary key.
    AutoField,
    /// Auto-incrementing 64-bit integer primary key.
    BigAutoField,
    /// Variable-length string with a max length.
    CharField,
    /// Unlimited-length text.
    TextField,
    /// 32-bit signed integer.
    IntegerField,
    /// 64-bit signed integer.
    BigIntegerField,
    /// 16-bit signed integer.
    SmallIntegerField,
    /// Non-negative 32-bit integer.
    PositiveIntegerField,
    /// 64-bit floating-point number.
    FloatField,
    /// Fixed-precision decimal number.
    DecimalField {
        /// Maximum total digits.
        max_digits: u32,
        /// Digits after the decimal point.
        decimal_places: u32,
    },
    /// Boolean (true/false).
    BooleanField,
    /// Date without time.
    DateField,
    /// Date and time.
    DateTimeField,
    /// Time without date.
    TimeField,
    /// Duration / interval.
    DurationField,
    /// UUID field.
    UuidField,
    /// Raw binary data.
    BinaryField,
    /// JSON data.
    JsonField,
    /// Email address.
    EmailField,
    /// URL.
    UrlField,
    /// Slug (URL-friendly string).
    SlugField,
    /// IPv4 or IPv6 address.
    IpAddressField,
    /// File system path.
    FilePathField,
    /// Many-to-one relationship.
    ForeignKey {
        /// The target model (`"app.model"` or `"settings.NAME"`).
        to: String,
        /// Behavior when the referenced object is deleted.
        on_delete: OnDelete,
        /// The name used for the reverse relation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        related_name: Option<String>,
    },
    /// One-to-one relationship.
    OneToOneField {
        /// The target model.
        to: String,
        /// Behavior when the referenced object is deleted.
        on_delete: OnDelete,
        /// The name used for the reverse relation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        related_name: Option<String>,
    },
    /// Many-to-many relationship.
    ManyToManyField {
        /// The target model.
        to: String,
        /// Optional explicit intermediate ("through") model.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        through: Option<String>,
        /// The name used for the reverse relation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        related_name: Option<String>,
    },
}

impl FieldType {
    /// Returns the Django field class name (`"CharField"`, `"ForeignKey"`, ...).
    pub const fn python_class(&self) -> &'static str {
        match self {
            Self::AutoField => "AutoField",
            Self::BigAutoField => "BigAutoField",
            Self::CharField => "CharField",
            Self::TextField => "TextField",
            Self::IntegerField => "IntegerField",
            Self::BigIntegerField => "BigIntegerField",
            Self::SmallIntegerField => "SmallIntegerField",
            Self::PositiveIntegerField => "PositiveIntegerField",
            Self::FloatField => "FloatField",
            Self::DecimalField { .. } => "DecimalField",
            Self::BooleanField => "BooleanField",
            Self::DateField => "DateField",
            Self::DateTimeField => "DateTimeField",
            Self::TimeField => "TimeField",
            Self::DurationField => "DurationField",
            Self::UuidField => "UUIDField",
            Self::BinaryField => "BinaryField",
            Self::JsonField => "JSONField",
            Self::EmailField => "EmailField",
            Self::UrlField => "URLField",
            Self::SlugField => "SlugField",
            Self::IpAddressField => "GenericIPAddressField",
            Self::FilePathField => "FilePathField",
            Self::ForeignKey { .. } => "ForeignKey",
            Self::OneToOneField { .. } => "OneToOneField",
            Self::ManyToManyField { .. } => "ManyToManyField",
        }
    }

    /// Returns the relation target for relational fields.
    pub fn relation_target(&self) -> Option<&str> {
        match self {
            Self::ForeignKey { to, .. }
            | Self::OneToOneField { to, .. }
            | Self::ManyToManyField { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Returns `true` for auto-incrementing primary key types.
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::AutoField | Self::BigAutoField)
    }
}

/// Where a relation points, resolved against the app that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationTarget {
    /// A concrete model: `(app_label, model_name)`, model name lowercased.
    Model(String, String),
    /// A swappable model named by a setting, e.g. `AUTH_USER_MODEL`.
    Setting(String),
}

impl RelationTarget {
    /// Parses a relation target string.
    ///
    /// `"settings.NAME"` is a swappable reference, `"app.Model"` is explicit
    /// and a bare `"Model"` belongs to `app_label`.
    pub fn parse(to: &str, app_label: &str) -> Self {
        if let Some(setting) = to.strip_prefix("settings.") {
            return Self::Setting(setting.to_string());
        }
        match to.split_once('.') {
            Some((app, model)) => Self::Model(app.to_string(), model.to_lowercase()),
            None => Self::Model(app_label.to_string(), to.to_lowercase()),
        }
    }
}

/// Behavior when a referenced object is deleted (ON DELETE action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDelete {
    /// Delete all related objects.
    Cascade,
    /// Prevent deletion if related objects exist.
    Protect,
    /// Set the foreign key to NULL.
    SetNull,
    /// Set the foreign key to its default value.
    SetDefault,
    /// Take no action.
    DoNothing,
}

impl OnDelete {
    /// Returns the name of the matching `django.db.models.deletion` member.
    pub const fn python_name(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Protect => "PROTECT",
            Self::SetNull => "SET_NULL",
            Self::SetDefault => "SET_DEFAULT",
            Self::DoNothing => "DO_NOTHING",
        }
    }
}

/// A named database index over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// The index name.
    pub name: String,
    /// The fields included in this index.
    pub fields: Vec<String>,
}

impl Index {
    /// Creates a new index.
    pub fn new(name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}

/// A literal value, used for field defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Python `None`.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A string.
    String(String),
    /// A list of values.
    List(Vec<Value>),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}
