pub mod assemble;
pub mod deserializer;
pub mod name;
pub mod tokens;
pub mod value_variant;
