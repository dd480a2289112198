//! Physical warehouse locations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

/// Check that `ident` is a plain unquoted warehouse identifier.
pub fn validate_identifier(ident: &str) -> std::result::Result<(), ConfigError> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(ident.to_string()))
    }
}

/// A schema inside a database: `DATABASE.SCHEMA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaRef {
    pub database: String,
    pub schema: String,
}

impl SchemaRef {
    pub fn new(database: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        validate_identifier(&self.database)?;
        validate_identifier(&self.schema)
    }

    /// Object `name` inside this schema.
    pub fn object(&self, name: impl Into<String>) -> ObjectRef {
        ObjectRef {
            database: self.database.clone(),
            schema: self.schema.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.schema)
    }
}

impl FromStr for SchemaRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [database, schema] => {
                let r = SchemaRef::new(*database, *schema);
                r.validate()?;
                Ok(r)
            }
            _ => Err(ConfigError::InvalidIdentifier(s.to_string())),
        }
    }
}

/// A fully-qualified object: `DATABASE.SCHEMA.NAME`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub database: String,
    pub schema: String,
    pub name: String,
}

impl ObjectRef {
    pub fn schema_ref(&self) -> SchemaRef {
        SchemaRef::new(self.database.clone(), self.schema.clone())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.schema_ref().validate()?;
        validate_identifier(&self.name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.name)
    }
}

impl FromStr for ObjectRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [database, schema, name] => {
                let r = SchemaRef::new(*database, *schema).object(*name);
                r.validate()?;
                Ok(r)
            }
            _ => Err(ConfigError::InvalidIdentifier(s.to_string())),
        }
    }
}
