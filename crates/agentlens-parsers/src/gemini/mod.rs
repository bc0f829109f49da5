mod parser;
mod schema;

pub use parser::GeminiParser;
