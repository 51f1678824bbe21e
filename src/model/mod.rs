pub mod deserialized;
pub(crate) mod raw;
pub mod xml;
