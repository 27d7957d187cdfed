use crate::models::{Chunk, PipelineConfig};
use sha2::{Digest, Sha256};

pub const FIGURE_OPEN: &str = "[figure]";
pub const FIGURE_CLOSE: &str = "[/figure]";

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<&PipelineConfig> for ChunkingConfig {
    fn from(value: &PipelineConfig) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

/// One span after image resolution, in `(page_index, sequence_index)` order.
/// Image spans arrive as their description text; a failed description is an
/// empty string and still marks the chunk as containing a figure.
#[derive(Debug, Clone)]
pub enum FusedSpan {
    Text {
        span_index: usize,
        page_index: u32,
        text: String,
    },
    Figure {
        span_index: usize,
        page_index: u32,
        description: String,
    },
}

/// Merges the ordered span sequence of one document into bounded chunks.
///
/// Text accumulates in a running buffer and flushes at `chunk_size`,
/// seeding the next buffer with the trailing `chunk_overlap` characters of
/// the flushed buffer's plain text. Figure descriptions append as atomic
/// delimited blocks: when a block does not fit, the buffer flushes first and
/// the block lands whole in the next chunk, oversized blocks included.
/// Chunk ids derive from the document id and starting span position, so
/// identical input always yields identical ids.
pub fn fuse_chunks(document_id: &str, spans: &[FusedSpan], config: ChunkingConfig) -> Vec<Chunk> {
    debug_assert!(config.chunk_overlap < config.chunk_size);

    let mut fuser = Fuser::new(document_id, config);
    for span in spans {
        match span {
            FusedSpan::Text {
                span_index,
                page_index,
                text,
            } => fuser.append_text(*span_index, *page_index, text),
            FusedSpan::Figure {
                span_index,
                page_index,
                description,
            } => fuser.append_figure(*span_index, *page_index, description),
        }
    }
    fuser.finish()
}

struct Fuser<'a> {
    document_id: &'a str,
    config: ChunkingConfig,
    /// Full chunk text including figure blocks.
    text: Vec<char>,
    /// Text-span content only; overlap seeds come from here so a figure
    /// description is never carried into the next chunk.
    plain: Vec<char>,
    span_start: Option<usize>,
    span_end: usize,
    page_start: u32,
    page_end: u32,
    contains_image: bool,
    has_new_content: bool,
    ordinal: u64,
    chunks: Vec<Chunk>,
}

impl<'a> Fuser<'a> {
    fn new(document_id: &'a str, config: ChunkingConfig) -> Self {
        Self {
            document_id,
            config,
            text: Vec::new(),
            plain: Vec::new(),
            span_start: None,
            span_end: 0,
            page_start: 0,
            page_end: 0,
            contains_image: false,
            has_new_content: false,
            ordinal: 0,
            chunks: Vec::new(),
        }
    }

    fn mark(&mut self, span_index: usize, page_index: u32) {
        if self.span_start.is_none() {
            self.span_start = Some(span_index);
            self.page_start = page_index;
        }
        self.span_end = span_index;
        self.page_end = page_index;
        self.has_new_content = true;
    }

    fn append_text(&mut self, span_index: usize, page_index: u32, text: &str) {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return;
        }

        let mut offset = 0;
        let mut needs_separator = !self.text.is_empty();
        while offset < chars.len() {
            if self.text.len() >= self.config.chunk_size {
                self.flush();
                // continuation of the same span, no separator after the seed
                needs_separator = false;
            }
            if needs_separator {
                self.text.push('\n');
                self.plain.push('\n');
                needs_separator = false;
                continue;
            }

            self.mark(span_index, page_index);
            let room = self.config.chunk_size - self.text.len();
            let end = (offset + room).min(chars.len());
            self.text.extend(&chars[offset..end]);
            self.plain.extend(&chars[offset..end]);
            offset = end;
        }
    }

    fn append_figure(&mut self, span_index: usize, page_index: u32, description: &str) {
        let block: Vec<char> = format!("{FIGURE_OPEN}\n{}\n{FIGURE_CLOSE}", description.trim())
            .chars()
            .collect();

        let separator = usize::from(!self.text.is_empty());
        if self.has_new_content && self.text.len() + separator + block.len() > self.config.chunk_size
        {
            self.flush();
        }

        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.mark(span_index, page_index);
        self.contains_image = true;
        self.text.extend(&block);

        // oversized atomic blocks are isolated, never truncated
        if self.text.len() >= self.config.chunk_size {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let chunk_text: String = self.text.iter().collect();
        let span_start = self.span_start.unwrap_or(self.span_end);

        self.chunks.push(Chunk {
            chunk_id: make_chunk_id(self.document_id, span_start, self.ordinal),
            document_id: self.document_id.to_string(),
            text: chunk_text,
            span_start,
            span_end: self.span_end,
            page_start: self.page_start,
            page_end: self.page_end,
            contains_image: self.contains_image,
        });
        self.ordinal += 1;

        let keep = self.config.chunk_overlap.min(self.plain.len());
        let seed: Vec<char> = self.plain[self.plain.len() - keep..].to_vec();
        self.text = seed.clone();
        self.plain = seed;
        self.span_start = None;
        self.contains_image = false;
        self.has_new_content = false;
    }

    fn finish(mut self) -> Vec<Chunk> {
        if self.has_new_content && !self.text.is_empty() {
            self.flush();
        }
        self.chunks
    }
}

/// Stable id from document id, starting span position, and the chunk's
/// ordinal within the document. The ordinal disambiguates multiple chunks
/// cut from one long span while keeping re-ingestion idempotent.
fn make_chunk_id(document_id: &str, span_start: usize, ordinal: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((span_start as u64).to_le_bytes());
    hasher.update(ordinal.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap,
        }
    }

    fn text_span(span_index: usize, page_index: u32, text: &str) -> FusedSpan {
        FusedSpan::Text {
            span_index,
            page_index,
            text: text.to_string(),
        }
    }

    fn figure_span(span_index: usize, page_index: u32, description: &str) -> FusedSpan {
        FusedSpan::Figure {
            span_index,
            page_index,
            description: description.to_string(),
        }
    }

    fn block_is_atomic(chunk_text: &str) -> bool {
        chunk_text.matches(FIGURE_OPEN).count() == chunk_text.matches(FIGURE_CLOSE).count()
    }

    #[test]
    fn zero_spans_produce_zero_chunks() {
        let chunks = fuse_chunks("doc-1", &[], config(100, 10));
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_ids_are_deterministic_across_runs() {
        let spans = vec![
            text_span(0, 0, "The gradient descent update rule moves against the gradient."),
            figure_span(1, 0, "Loss surface with a marked minimum."),
            text_span(2, 1, "Momentum accumulates past updates to damp oscillation."),
        ];

        let first = fuse_chunks("doc-1", &spans, config(60, 10));
        let second = fuse_chunks("doc-1", &spans, config(60, 10));

        assert_eq!(
            first.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>(),
            second.iter().map(|c| c.chunk_id.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn long_text_span_splits_with_exact_overlap() {
        let body = "abcdefghijklmnopqrstuvwxyz0123456789abcdefghijklmn";
        let chunks = fuse_chunks("doc-1", &[text_span(0, 0, body)], config(20, 5));

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(!chunk.text.is_empty());
        }
        for pair in chunks.windows(2) {
            let tail: String = pair[0].text.chars().rev().take(5).collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(
                pair[1].text.starts_with(&tail),
                "chunk {:?} should begin with {:?}",
                pair[1].text,
                tail
            );
        }
        let ids: std::collections::HashSet<_> = chunks.iter().map(|c| &c.chunk_id).collect();
        assert_eq!(ids.len(), chunks.len(), "split chunks must keep distinct ids");
    }

    #[test]
    fn oversized_description_alone_yields_one_chunk() {
        let description = "A dense architecture diagram with many labelled boxes \
                           and arrows connecting encoder and decoder stages.";
        let chunks = fuse_chunks("doc-1", &[figure_span(0, 0, description)], config(50, 10));

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains_image);
        assert!(chunks[0].text.contains(description));
        assert!(chunks[0].text.starts_with(FIGURE_OPEN));
        assert!(chunks[0].text.ends_with(FIGURE_CLOSE));
    }

    #[test]
    fn failed_description_still_emits_placeholder_block() {
        let chunks = fuse_chunks(
            "doc-1",
            &[text_span(0, 0, "Before the figure."), figure_span(1, 0, "")],
            config(200, 10),
        );

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains_image);
        assert!(chunks[0].text.contains(&format!("{FIGURE_OPEN}\n\n{FIGURE_CLOSE}")));
    }

    // Scenario: text, image, text with chunk_size=50 and chunk_overlap=10.
    #[test]
    fn figure_block_is_never_split_and_overlap_comes_from_plain_text() {
        let spans = vec![
            text_span(0, 0, "Intro covers A and B."),
            figure_span(1, 0, "Diagram showing relationship between A and B."),
            text_span(2, 0, "Details of A follow."),
        ];

        let chunks = fuse_chunks("doc-1", &spans, config(50, 10));
        assert!(chunks.len() >= 2);

        for chunk in &chunks {
            assert!(block_is_atomic(&chunk.text), "split block in {:?}", chunk.text);
        }

        let figure_chunk = chunks
            .iter()
            .find(|chunk| chunk.contains_image)
            .expect("one chunk should carry the figure");
        assert!(figure_chunk
            .text
            .contains("[figure]\nDiagram showing relationship between A and B.\n[/figure]"));

        // last 10 characters of chunk one's pre-image text
        assert!(chunks[1].text.starts_with("s A and B."));

        // the description text never leaks into a following chunk's overlap
        let after_figure = chunks
            .iter()
            .skip_while(|chunk| !chunk.contains_image)
            .skip(1)
            .collect::<Vec<_>>();
        for chunk in after_figure {
            assert!(!chunk.text.contains("Diagram showing"));
        }
    }

    #[test]
    fn span_ranges_track_sources() {
        let spans = vec![
            text_span(0, 0, "First page prose."),
            text_span(1, 1, "Second page prose."),
        ];
        let chunks = fuse_chunks("doc-1", &spans, config(100, 10));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].span_start, 0);
        assert_eq!(chunks[0].span_end, 1);
        assert_eq!(chunks[0].page_start, 0);
        assert_eq!(chunks[0].page_end, 1);
        assert!(!chunks[0].contains_image);
    }
}
