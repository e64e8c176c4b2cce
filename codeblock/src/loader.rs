//! Explicit source-transform hook for hosts that load annotated files.
//!
//! The host calls [`TransformHook::load`] for each file it wants purified; the
//! purified text is also written to a sibling artifact next to the source.

use std::fs;
use std::path::{Path, PathBuf};

use crate::Error;
use crate::parser::{OutputMode, Parser, PurifyOptions};

/// Result of running the hook over one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    pub text: String,
    /// False when the text contained no blocks and was returned unchanged.
    pub transformed: bool,
    /// Where the purified text was written, if anywhere.
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct TransformHook {
    options: PurifyOptions,
}

impl TransformHook {
    pub fn new(options: PurifyOptions) -> Self {
        TransformHook { options }
    }

    pub fn transform(&self, text: &str) -> Result<Transformed, Error> {
        let purified = Parser::new(text.to_string(), 0).purify(&self.options)?;
        Ok(Transformed {
            text: purified.text,
            transformed: purified.found_blocks,
            artifact: None,
        })
    }

    /// Resolve, read and purify `path`; a transformed file is persisted to its
    /// [`artifact_path`].
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Transformed, Error> {
        let path = path.as_ref();
        let io = |source| Error::Io {
            path: path.to_path_buf(),
            source,
        };
        let path = fs::canonicalize(path).map_err(io)?;
        let text = fs::read_to_string(&path).map_err(io)?;
        let mut result = self.transform(&text)?;
        if result.transformed {
            let artifact = artifact_path(&path, self.options.mode);
            fs::write(&artifact, &result.text).map_err(|source| Error::Io {
                path: artifact.clone(),
                source,
            })?;
            tracing::debug!(source = %path.display(), artifact = %artifact.display(), "wrote purified artifact");
            result.artifact = Some(artifact);
        }
        Ok(result)
    }
}

/// `<path>~.pure.json` for JSON output, `<path>~.pure` for program output.
pub fn artifact_path(path: &Path, mode: OutputMode) -> PathBuf {
    let suffix = match mode {
        OutputMode::Json => "~.pure.json",
        OutputMode::Program => "~.pure",
    };
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
