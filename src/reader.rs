use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ABSOLUTE_MAX_FILE_BYTES;
use crate::error::{CoreError, Result};

/// One textual file pulled from the corpus.
#[derive(Debug, Clone)]
pub struct FileData {
    /// Repo-relative path with '/' separators.
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub root: PathBuf,
    pub max_file_bytes: u64,
    /// Directory names to skip anywhere in the tree.
    pub exclude_dir_names: Vec<String>,
}

/// Bytes inspected by the binary filter.
const SNIFF_WINDOW: usize = 512 * 1024; // 512 KiB

fn default_overrides(root: &Path, exclude_dir_names: &[String]) -> Result<Override> {
    let mut ob = OverrideBuilder::new(root);

    let mut add = |pat: &str| -> Result<()> {
        ob.add(pat)
            .map(|_| ())
            .map_err(|e| CoreError::reader(e.to_string()))
    };

    // Lockfiles and other machine-generated noise.
    add("**/*.lock")?;
    add("**/package-lock.json")?;
    add("**/pnpm-lock.yaml")?;
    add("**/yarn.lock")?;
    add("**/Cargo.lock")?;
    add("**/*.map")?;

    // Heavy build/VCS dirs. Include patterns for both the directory entry and
    // its descendants, otherwise walkers may still descend into it.
    for d in [
        ".git",
        "node_modules",
        "target",
        "dist",
        "build",
        "coverage",
        ".next",
        "out",
        ".corpex",
    ] {
        add(&format!("**/{d}"))?;
        add(&format!("**/{d}/**"))?;
    }

    for d in exclude_dir_names {
        let d = d.trim().trim_matches('/');
        if d.is_empty() {
            continue;
        }
        add(&format!("**/{d}"))?;
        add(&format!("**/{d}/**"))?;
    }

    ob.build().map_err(|e| CoreError::reader(e.to_string()))
}

/// Streams textual files out of a directory tree in deterministic lexical
/// order over relative paths.
///
/// Binary content is filtered on the first 512 KiB: any NUL byte, or a
/// non-text magic signature, rejects the file. Errors reading a single file
/// are logged and skipped; the stream continues.
pub struct SourceReader {
    opts: ReaderOptions,
}

impl SourceReader {
    pub fn new(opts: ReaderOptions) -> Self {
        Self { opts }
    }

    /// Walk the root and invoke `out` once per textual file.
    ///
    /// Cancellation is checked between files; an in-flight read completes.
    /// Returns the number of files emitted.
    pub fn stream<F>(&self, cancel: &CancellationToken, mut out: F) -> Result<usize>
    where
        F: FnMut(FileData) -> Result<()>,
    {
        let paths = self.collect_paths()?;
        let mut emitted = 0usize;

        for (rel, abs) in paths {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            let bytes = match std::fs::read(&abs) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %rel, error = %e, "skipping unreadable file");
                    continue;
                }
            };

            if !is_textual(&bytes) {
                continue;
            }

            let content = match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            };

            out(FileData { path: rel, content })?;
            emitted += 1;
        }

        Ok(emitted)
    }

    /// Sorted (relative, absolute) path pairs under the root, after
    /// exclusion and size filters.
    fn collect_paths(&self) -> Result<Vec<(String, PathBuf)>> {
        let root = &self.opts.root;
        std::fs::metadata(root)
            .map_err(|e| CoreError::reader(format!("root {}: {e}", root.display())))?;

        let overrides = default_overrides(root, &self.opts.exclude_dir_names)?;
        let walker = WalkBuilder::new(root)
            .standard_filters(true) // .gitignore, .ignore, hidden, etc.
            .overrides(overrides)
            .build();

        let max_bytes = self.opts.max_file_bytes.min(ABSOLUTE_MAX_FILE_BYTES);
        let mut paths = Vec::new();

        for item in walker {
            let dent = match item {
                Ok(d) => d,
                Err(_) => continue,
            };
            if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let abs = dent.into_path();
            let bytes = match std::fs::metadata(&abs).map(|m| m.len()) {
                Ok(b) => b,
                Err(_) => continue,
            };
            if bytes == 0 || bytes > max_bytes {
                continue;
            }

            let rel = match abs.strip_prefix(root) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            paths.push((rel, abs));
        }

        paths.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(paths)
    }
}

/// Binary filter applied to the first 512 KiB.
///
/// Rejects on any NUL byte, on a known binary magic signature, or when the
/// sample is not valid UTF-8 (allowing one clipped code point at the window
/// edge).
pub fn is_textual(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(SNIFF_WINDOW)];

    if sample.contains(&0u8) {
        return false;
    }
    if has_binary_magic(sample) {
        return false;
    }

    match std::str::from_utf8(sample) {
        Ok(_) => true,
        // A code point clipped by the sniff window is fine; anything broken
        // earlier is not text.
        Err(e) => e.valid_up_to() + 4 >= sample.len() && sample.len() == SNIFF_WINDOW,
    }
}

fn has_binary_magic(sample: &[u8]) -> bool {
    const MAGICS: &[&[u8]] = &[
        b"\x7fELF",             // ELF
        b"\xff\xd8\xff",        // JPEG
        b"\x89PNG",             // PNG
        b"GIF8",                // GIF
        b"PK\x03\x04",          // ZIP/JAR
        b"\x1f\x8b",            // gzip
        b"%PDF",                // PDF
        b"\xfe\xff",            // UTF-16 BE BOM
        b"\xff\xfe",            // UTF-16 LE BOM
        b"\xca\xfe\xba\xbe",    // Mach-O fat / Java class
        b"MZ",                  // PE
    ];
    MAGICS.iter().any(|m| sample.starts_with(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, bytes: &[u8]) {
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn binary_filter_keeps_only_the_text_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "text.txt", b"hello");
        write(dir.path(), "nul.bin", b"a\x00b");
        write(dir.path(), "elf", b"\x7fELF");
        write(dir.path(), "img.jpg", b"\xFF\xD8\xFF");

        let reader = SourceReader::new(ReaderOptions {
            root: dir.path().to_path_buf(),
            max_file_bytes: 1024,
            exclude_dir_names: vec![],
        });

        let cancel = CancellationToken::new();
        let mut seen = Vec::new();
        reader
            .stream(&cancel, |f| {
                seen.push(f.path);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec!["text.txt"]);
    }

    #[test]
    fn files_arrive_in_lexical_path_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        write(dir.path(), "b.txt", b"b");
        write(dir.path(), "a.txt", b"a");
        write(&dir.path().join("sub"), "c.txt", b"c");

        let reader = SourceReader::new(ReaderOptions {
            root: dir.path().to_path_buf(),
            max_file_bytes: 1024,
            exclude_dir_names: vec![],
        });

        let mut seen = Vec::new();
        reader
            .stream(&CancellationToken::new(), |f| {
                seen.push(f.path);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn cancellation_stops_between_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"a");
        write(dir.path(), "b.txt", b"b");

        let reader = SourceReader::new(ReaderOptions {
            root: dir.path().to_path_buf(),
            max_file_bytes: 1024,
            exclude_dir_names: vec![],
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reader.stream(&cancel, |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[test]
    fn excluded_dir_names_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("generated")).unwrap();
        write(dir.path(), "keep.txt", b"keep");
        write(&dir.path().join("generated"), "skip.txt", b"skip");

        let reader = SourceReader::new(ReaderOptions {
            root: dir.path().to_path_buf(),
            max_file_bytes: 1024,
            exclude_dir_names: vec!["generated".into()],
        });

        let mut seen = Vec::new();
        reader
            .stream(&CancellationToken::new(), |f| {
                seen.push(f.path);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["keep.txt"]);
    }

    #[test]
    fn sniff_accepts_json_and_utf8_text() {
        assert!(is_textual(b"{\"k\": 1}"));
        assert!(is_textual("héllo wörld".as_bytes()));
        assert!(!is_textual(b"\x89PNG\r\n"));
        assert!(!is_textual(b"MZ\x90"));
    }
}
