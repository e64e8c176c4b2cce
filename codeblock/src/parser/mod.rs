pub mod error;
mod layers;
pub mod program;
mod purify;

pub use error::ParseError;
pub use program::load_program;
pub use purify::{OutputMode, PurifyOptions, Purified};

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Resolve every code block in the annotated source, innermost first.
    pub fn purify(&self, options: &PurifyOptions) -> Result<Purified, ParseError> {
        let layers = layers::scan(&self.source, self.file_id)?;
        tracing::debug!(
            file_id = self.file_id,
            blocks = layers.count(),
            max_depth = layers.max_depth,
            mode = ?options.mode,
            "purifying source"
        );
        purify::render(&self.source, &layers, options, self.file_id)
    }
}
