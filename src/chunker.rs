//! Splits raw text into overlapping, word-bounded chunks suitable for
//! embedding (C1).

use regex::Regex;
use std::sync::OnceLock;

fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").unwrap())
}

/// Split `text` into overlapping chunks of roughly `chunk_size_words` words,
/// each chunk's prefix overlapping the previous chunk's suffix by about
/// `overlap_words` words.
///
/// Splits on sentence boundaries when present; falls back to a pure
/// word-window split otherwise. Callers are responsible for discarding
/// empty/whitespace-only chunks.
pub fn chunk(text: &str, chunk_size_words: usize, overlap_words: usize) -> Vec<String> {
    let sentences: Vec<&str> = sentence_boundary()
        .split(text.trim())
        .filter(|s| !s.trim().is_empty())
        .collect();

    if sentences.len() <= 1 {
        return word_window_chunk(text, chunk_size_words, overlap_words);
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_size = 0usize;

    for sentence in &sentences {
        let sentence_words = word_count(sentence);
        if current_size + sentence_words > chunk_size_words && !current.is_empty() {
            chunks.push(current.join(" "));

            // Seed the next chunk with the smallest trailing run of
            // sentences whose combined word count is >= overlap_words.
            let mut seed: Vec<&str> = Vec::new();
            let mut seed_size = 0usize;
            for s in current.iter().rev() {
                if seed_size >= overlap_words {
                    break;
                }
                seed_size += word_count(s);
                seed.push(s);
            }
            seed.reverse();
            current = seed;
            current_size = seed_size;
        }
        current_size += sentence_words;
        current.push(sentence);
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }

    chunks
}

fn word_window_chunk(text: &str, chunk_size_words: usize, overlap_words: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let step = chunk_size_words.saturating_sub(overlap_words).max(1);

    while start < words.len() {
        let end = (start + chunk_size_words).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_short_text_into_one_piece() {
        let result = chunk("Hello world. This is a test.", 500, 100);
        assert_eq!(result.len(), 1);
        assert!(result[0].contains("Hello world"));
    }

    #[test]
    fn splits_on_sentence_boundaries_when_over_budget() {
        let sentence = "word ".repeat(50);
        let text = format!("{sentence}. {sentence}. {sentence}.");
        let result = chunk(&text, 60, 20);
        assert!(result.len() >= 2);
    }

    #[test]
    fn overlap_reappears_at_the_start_of_the_next_chunk() {
        let sentence_a = format!("{}.", "alpha ".repeat(40).trim());
        let sentence_b = format!("{}.", "bravo ".repeat(40).trim());
        let sentence_c = format!("{}.", "charlie ".repeat(40).trim());
        let text = format!("{sentence_a} {sentence_b} {sentence_c}");
        let result = chunk(&text, 45, 20);
        assert!(result.len() >= 2);
        assert!(result[1].contains("bravo") || result[1].contains("alpha"));
    }

    #[test]
    fn falls_back_to_word_window_without_sentence_boundaries() {
        let text = "word ".repeat(120);
        let result = chunk(text.trim(), 50, 10);
        assert!(result.len() >= 2);
        for w in result.windows(2) {
            assert_ne!(w[0], w[1]);
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk("", 500, 100).is_empty());
        assert!(chunk("   ", 500, 100).is_empty());
    }

    #[test]
    fn default_sizes_match_the_contract() {
        let text = "word ".repeat(1000);
        let result = chunk(text.trim(), 500, 100);
        assert!(result.len() > 1);
    }
}
