pub mod anthropic;
pub mod upstream;
