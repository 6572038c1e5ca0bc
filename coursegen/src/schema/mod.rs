//! Output schemas and the structural validator.

mod descriptor;
mod validator;

pub use descriptor::{FieldSchema, SchemaDescriptor};
pub use validator::{deserialize, validate, validate_as, SchemaValidator};
