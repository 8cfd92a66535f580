/// Characters that end a speakable phrase
const BREAKS: &[char] = &['，', '。', '！', '？', ',', '.', '!', '?', ';', '；', '\n'];

/// Groups streamed text into phrases for synthesis
///
/// A phrase is released when the incoming chunk carries a break character or
/// the buffer reaches `min_chars` characters.
pub struct PhraseSegmenter {
    min_chars: usize,
    buffer: String,
}

impl PhraseSegmenter {
    pub fn new(min_chars: usize) -> Self {
        Self {
            min_chars: min_chars.max(1),
            buffer: String::new(),
        }
    }

    pub fn push(&mut self, chunk: &str) -> Option<String> {
        self.buffer.push_str(chunk);
        let has_break = chunk.contains(BREAKS);
        if has_break || self.buffer.chars().count() >= self.min_chars {
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }

    /// Release whatever is left
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
