mod parser;

pub use parser::CursorParser;
