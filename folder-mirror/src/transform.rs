//! Processing functions applied to mirrored files.
//!
//! A transformer reads the source file and produces the destination file.
//! The engine guarantees that the destination's parent directories exist
//! before calling it; the destination file itself may or may not exist and
//! should be created or overwritten.

use std::path::Path;

/// Processing function applied to each new file.
pub trait FileTransformer: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str {
        "custom"
    }

    /// Read `source` and write the result to `dest`.
    fn process(&self, source: &Path, dest: &Path) -> anyhow::Result<()>;
}

impl<F> FileTransformer for F
where
    F: Fn(&Path, &Path) -> anyhow::Result<()> + Send + Sync,
{
    fn process(&self, source: &Path, dest: &Path) -> anyhow::Result<()> {
        self(source, dest)
    }
}

/// Copies the source bytes verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTransformer;

impl FileTransformer for CopyTransformer {
    fn name(&self) -> &str {
        "copy"
    }

    fn process(&self, source: &Path, dest: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        std::fs::copy(source, dest).with_context(|| {
            format!("copying {} to {}", source.display(), dest.display())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_copy_overwrites_destination() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("in.txt");
        let dest = temp_dir.path().join("out.txt");
        std::fs::write(&source, "fresh").unwrap();
        std::fs::write(&dest, "stale contents").unwrap();

        CopyTransformer.process(&source, &dest).unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "fresh");
    }

    #[test]
    fn test_copy_missing_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = CopyTransformer
            .process(&temp_dir.path().join("gone"), &temp_dir.path().join("out"))
            .unwrap_err();
        assert!(err.to_string().contains("copying"));
    }

    #[test]
    fn test_closure_transformer() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("in.txt");
        let dest = temp_dir.path().join("out.txt");
        std::fs::write(&source, "shout").unwrap();

        let upper = |src: &Path, dst: &Path| -> anyhow::Result<()> {
            let text = std::fs::read_to_string(src)?;
            std::fs::write(dst, text.to_uppercase())?;
            Ok(())
        };

        upper.process(&source, &dest).unwrap();
        assert_eq!(upper.name(), "custom");
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "SHOUT");
    }
}
