pub mod messages;
pub mod triples;
