//! Parsers

pub mod json;
pub mod rfc3164;
pub mod text;

pub use json::JsonParser;
pub use rfc3164::Rfc3164Parser;
pub use text::TextParser;
