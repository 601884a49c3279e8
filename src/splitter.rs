use std::io::BufRead;
use std::sync::Arc;

use crate::config::ChunkingConfig;
use crate::error::{CoreError, Result, SplitStage};
use crate::language::Language;
use crate::token::Tokenizer;

/// A chunk produced by the splitter, before embedding and persistence.
///
/// `index` is the zero-based ordinal within the source document;
/// `start_token`/`end_token` are offsets in the document's token space.
/// Adjacent chunks overlap by exactly `overlap_tokens`:
/// `chunks[i+1].start_token == chunks[i].end_token - overlap_tokens`.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitChunk {
    pub index: usize,
    pub text: String,
    pub start_token: usize,
    pub end_token: usize,
}

/// Streaming, language-aware splitter.
///
/// Reads lines lazily, grows a buffer under a token budget, and prefers to
/// cut at language boundaries (headings, top-level declarations). In
/// structure-aware mode, cuts are suppressed while inside a brace/paren/
/// bracket block until the buffer exceeds a 1.2× hard ceiling.
pub struct Splitter {
    max_tokens: usize,
    overlap_tokens: usize,
    language: Language,
    tokenizer: Arc<dyn Tokenizer>,
    structure_aware: bool,
}

impl Splitter {
    pub fn new(
        cfg: &ChunkingConfig,
        language: Language,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            max_tokens: cfg.max_tokens,
            overlap_tokens: cfg.overlap_tokens,
            language,
            tokenizer,
            structure_aware: cfg.structure_aware && language_tracks_structure(language),
        })
    }

    /// Consume `reader` and invoke `emit` for each produced chunk, in order.
    ///
    /// Returns the number of chunks emitted. An error from `emit` is
    /// propagated unchanged; a non-EOF reader fault surfaces as a
    /// reader-stage split error.
    pub fn stream<R, F>(&self, mut reader: R, mut emit: F) -> Result<usize>
    where
        R: BufRead,
        F: FnMut(SplitChunk) -> Result<()>,
    {
        let mut state = SplitState::new(self);
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader
                .read_line(&mut line)
                .map_err(|e| CoreError::split(SplitStage::Reader, e.to_string()))?;
            if read == 0 {
                break; // EOF
            }
            state.process_line(self, &line, &mut emit)?;
        }

        state.flush(self, &mut emit)?;
        Ok(state.emitted)
    }
}

/// Only brace languages get depth tracking; headings and prose have no
/// nesting to respect.
fn language_tracks_structure(language: Language) -> bool {
    matches!(
        language,
        Language::Go
            | Language::Java
            | Language::JavaScript
            | Language::TypeScript
            | Language::CSharp
            | Language::Rust
            | Language::C
            | Language::Cpp
            | Language::Json
    )
}

struct SplitState {
    buf: String,
    current_tokens: usize,
    start_token: usize,
    index: usize,
    emitted: usize,
    /// Buffer holds content beyond the seeded overlap tail.
    fresh: bool,
    depth: DepthTracker,
}

impl SplitState {
    fn new(splitter: &Splitter) -> Self {
        let mut buf = String::new();
        buf.reserve(splitter.max_tokens.min(64 * 1024));
        Self {
            buf,
            current_tokens: 0,
            start_token: 0,
            index: 0,
            emitted: 0,
            fresh: false,
            depth: DepthTracker::default(),
        }
    }

    /// 1.2× budget: the only point a cut is allowed while nested.
    fn hard_ceiling(splitter: &Splitter) -> usize {
        splitter.max_tokens + splitter.max_tokens / 5
    }

    fn effective_budget(&self, splitter: &Splitter) -> usize {
        if splitter.structure_aware && self.depth.nested() {
            Self::hard_ceiling(splitter)
        } else {
            splitter.max_tokens
        }
    }

    fn process_line<F>(&mut self, splitter: &Splitter, line: &str, emit: &mut F) -> Result<()>
    where
        F: FnMut(SplitChunk) -> Result<()>,
    {
        let line_tokens = splitter.tokenizer.count(line);

        if self.should_cut_before(splitter, line, line_tokens) {
            self.emit_and_seed(splitter, emit)?;
        }

        // Fit the line, biting it into budget-sized pieces when it alone
        // overflows the buffer.
        let mut remaining = line;
        while !remaining.is_empty() {
            let budget = self.effective_budget(splitter);
            let room = budget.saturating_sub(self.current_tokens);
            if room == 0 {
                self.emit_and_seed(splitter, emit)?;
                continue;
            }

            let rem_tokens = splitter.tokenizer.count(remaining);
            if rem_tokens <= room {
                self.push(splitter, remaining);
                break;
            }

            let cut = prefix_boundary(splitter.tokenizer.as_ref(), remaining, room);
            if cut == 0 {
                if self.fresh {
                    self.emit_and_seed(splitter, emit)?;
                    continue;
                }
                return Err(CoreError::split(
                    SplitStage::Reader,
                    format!(
                        "single token wider than the {}-token budget",
                        splitter.max_tokens
                    ),
                ));
            }
            let (piece, rest) = remaining.split_at(cut);
            self.push(splitter, piece);
            remaining = rest;
            self.emit_and_seed(splitter, emit)?;
        }

        Ok(())
    }

    fn should_cut_before(&self, splitter: &Splitter, line: &str, line_tokens: usize) -> bool {
        if !self.fresh {
            return false;
        }

        if splitter.structure_aware && self.depth.nested() {
            // Suppressed inside a block: only the hard ceiling forces a cut.
            return self.current_tokens + line_tokens > Self::hard_ceiling(splitter);
        }

        let budget = self.current_tokens + line_tokens > splitter.max_tokens;
        let boundary = splitter.language.is_boundary(line);
        let structure = splitter.structure_aware && self.current_tokens * 2 > splitter.max_tokens;

        budget || boundary || structure
    }

    fn push(&mut self, splitter: &Splitter, piece: &str) {
        if piece.is_empty() {
            return;
        }
        self.buf.push_str(piece);
        self.current_tokens += splitter.tokenizer.count(piece);
        if splitter.structure_aware {
            self.depth.observe(piece);
        }
        self.fresh = true;
    }

    fn emit_and_seed<F>(&mut self, splitter: &Splitter, emit: &mut F) -> Result<()>
    where
        F: FnMut(SplitChunk) -> Result<()>,
    {
        if !self.fresh {
            return Ok(());
        }

        let end_token = self.start_token + self.current_tokens;
        emit(SplitChunk {
            index: self.index,
            text: self.buf.clone(),
            start_token: self.start_token,
            end_token,
        })?;
        self.index += 1;
        self.emitted += 1;

        if splitter.overlap_tokens > 0 {
            let target = splitter.overlap_tokens.min(self.current_tokens);
            let cut = suffix_boundary(splitter.tokenizer.as_ref(), &self.buf, target);
            let tail = self.buf[cut..].to_string();
            let seeded = splitter.tokenizer.count(&tail);
            self.buf = tail;
            self.current_tokens = seeded;
            self.start_token = end_token - seeded;
        } else {
            self.buf.clear();
            self.current_tokens = 0;
            self.start_token = end_token;
        }
        self.fresh = false;
        Ok(())
    }

    fn flush<F>(&mut self, splitter: &Splitter, emit: &mut F) -> Result<()>
    where
        F: FnMut(SplitChunk) -> Result<()>,
    {
        self.emit_and_seed(splitter, emit)
    }
}

/// Byte offset of the longest prefix of `s` whose token count is <= `budget`.
///
/// Token counts are monotone in prefix length (tokenizer contract), so a
/// binary search over char boundaries suffices.
fn prefix_boundary(tokenizer: &dyn Tokenizer, s: &str, budget: usize) -> usize {
    let boundaries: Vec<usize> = s
        .char_indices()
        .map(|(i, _)| i)
        .skip(1)
        .chain(std::iter::once(s.len()))
        .collect();

    let mut best = 0usize;
    let (mut lo, mut hi) = (0usize, boundaries.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        let end = boundaries[mid];
        if tokenizer.count(&s[..end]) <= budget {
            best = end;
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    best
}

/// Byte offset where the longest suffix of `s` with token count <= `budget`
/// begins.
fn suffix_boundary(tokenizer: &dyn Tokenizer, s: &str, budget: usize) -> usize {
    let boundaries: Vec<usize> = std::iter::once(0)
        .chain(s.char_indices().map(|(i, _)| i).skip(1))
        .collect();

    let mut best = s.len();
    let (mut lo, mut hi) = (0usize, boundaries.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        let start = boundaries[mid];
        if tokenizer.count(&s[start..]) <= budget {
            best = start;
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    best
}

/// Brace/paren/bracket nesting plus string and comment state for
/// structure-aware mode. Tracks the absolute document position; seeding a
/// new buffer does not reset it.
#[derive(Debug, Default)]
struct DepthTracker {
    braces: i32,
    parens: i32,
    brackets: i32,
    in_string: Option<char>,
    in_block_comment: bool,
}

impl DepthTracker {
    fn nested(&self) -> bool {
        self.braces > 0 || self.parens > 0 || self.brackets > 0
    }

    fn observe(&mut self, text: &str) {
        let mut chars = text.chars().peekable();
        let mut in_line_comment = false;

        while let Some(c) = chars.next() {
            if c == '\n' {
                in_line_comment = false;
                continue;
            }
            if in_line_comment {
                continue;
            }

            if self.in_block_comment {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    self.in_block_comment = false;
                }
                continue;
            }

            if let Some(quote) = self.in_string {
                if c == '\\' {
                    chars.next(); // escaped char never closes the string
                } else if c == quote {
                    self.in_string = None;
                }
                continue;
            }

            match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    in_line_comment = true;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    self.in_block_comment = true;
                }
                '"' | '\'' | '`' => self.in_string = Some(c),
                '{' => self.braces += 1,
                '}' => self.braces = (self.braces - 1).max(0),
                '(' => self.parens += 1,
                ')' => self.parens = (self.parens - 1).max(0),
                '[' => self.brackets += 1,
                ']' => self.brackets = (self.brackets - 1).max(0),
                _ => {}
            }
        }
    }
}
