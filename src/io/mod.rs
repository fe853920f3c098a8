// Data export in CSV and JSON

mod export;

pub use export::*;
