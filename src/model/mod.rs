pub mod deserialized;
pub mod raw;
pub mod xml;
