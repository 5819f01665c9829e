pub mod comment;
pub mod ideas;
pub mod schema;
pub mod stats;
pub mod taxonomy;
pub mod tokenizer;
