//! Fragment assembly — buffering generation deltas into speakable pieces.
//!
//! Synthesis wants natural speech boundaries, not raw token deltas: a
//! fragment ends at sentence-ending punctuation or at the maximum fragment
//! length, whichever comes first. Never one fragment per token; never one
//! giant fragment for the whole utterance.

use regex::Regex;

/// One speakable fragment of an utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Fragment sequence within the utterance (0-indexed).
    pub seq: u32,
    /// Fragment text.
    pub text: String,
    /// Whether this is the final fragment.
    pub is_last: bool,
}

/// Policy for fragment boundaries.
#[derive(Debug, Clone)]
pub struct FragmentPolicy {
    /// Hard cap on fragment length in characters.
    pub max_fragment_chars: usize,
}

impl Default for FragmentPolicy {
    fn default() -> Self {
        Self {
            max_fragment_chars: 160,
        }
    }
}

/// Accumulates text deltas and emits boundary-aligned fragments.
pub struct FragmentAssembler {
    policy: FragmentPolicy,
    boundary: Regex,
    buf: String,
    next_seq: u32,
}

impl FragmentAssembler {
    /// Create an assembler with the given policy.
    pub fn new(policy: FragmentPolicy) -> Self {
        Self {
            policy,
            // Sentence-ending punctuation, optionally followed by closing
            // quotes/brackets, then whitespace.
            boundary: Regex::new(r#"[.!?…]['"\)\]]*\s"#).expect("static regex"),
            buf: String::new(),
            next_seq: 0,
        }
    }

    /// Feed a delta; returns any fragments completed by it.
    pub fn push(&mut self, delta: &str) -> Vec<Fragment> {
        self.buf.push_str(delta);
        let mut out = Vec::new();

        loop {
            if let Some(m) = self.boundary.find(&self.buf) {
                let text: String = self.buf.drain(..m.end()).collect();
                self.emit(&mut out, text.trim());
                continue;
            }

            if self.buf.len() >= self.policy.max_fragment_chars {
                // No sentence boundary in reach — split at the last
                // whitespace under the cap so words stay intact.
                let cut = self.buf[..self.policy.max_fragment_chars]
                    .rfind(char::is_whitespace)
                    .unwrap_or(self.policy.max_fragment_chars);
                let text: String = self.buf.drain(..cut).collect();
                self.buf = self.buf.trim_start().to_string();
                self.emit(&mut out, text.trim());
                continue;
            }

            break;
        }

        out
    }

    /// Flush the remaining buffer as the final fragment.
    ///
    /// Returns `None` when nothing is buffered and at least one fragment
    /// was already emitted with `is_last` still pending — callers mark the
    /// utterance complete themselves in that case.
    pub fn finish(&mut self) -> Option<Fragment> {
        let text = self.buf.trim().to_string();
        self.buf.clear();
        if text.is_empty() {
            return None;
        }
        let fragment = Fragment {
            seq: self.next_seq,
            text,
            is_last: true,
        };
        self.next_seq += 1;
        Some(fragment)
    }

    /// Number of fragments emitted so far.
    pub fn emitted(&self) -> u32 {
        self.next_seq
    }

    fn emit(&mut self, out: &mut Vec<Fragment>, text: &str) {
        if text.is_empty() {
            return;
        }
        out.push(Fragment {
            seq: self.next_seq,
            text: text.to_string(),
            is_last: false,
        });
        self.next_seq += 1;
    }
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::new(FragmentPolicy::default())
    }
}

/// Split a fully-known text into fragments (pre-generated candidates).
pub fn fragment_text(text: &str, policy: FragmentPolicy) -> Vec<Fragment> {
    let mut assembler = FragmentAssembler::new(policy);
    let mut fragments = assembler.push(text);
    // Trailing space lets the boundary regex see a final "…? " style end.
    fragments.extend(assembler.push(" "));
    if let Some(last) = assembler.finish() {
        fragments.push(last);
    } else if let Some(last) = fragments.last_mut() {
        last.is_last = true;
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentence_boundary_emission() {
        let mut asm = FragmentAssembler::default();
        let mut fragments = Vec::new();

        for delta in ["What's the ", "denominator? ", "And which ", "cohort? "] {
            fragments.extend(asm.push(delta));
        }

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text, "What's the denominator?");
        assert_eq!(fragments[1].text, "And which cohort?");
        assert_eq!(fragments[0].seq, 0);
        assert_eq!(fragments[1].seq, 1);
    }

    #[test]
    fn test_not_one_fragment_per_token() {
        let mut asm = FragmentAssembler::default();
        let mut count = 0;
        for delta in ["one ", "two ", "three ", "four ", "five. "] {
            count += asm.push(delta).len();
        }
        assert_eq!(count, 1);
    }

    #[test]
    fn test_max_length_split_keeps_words_intact() {
        let mut asm = FragmentAssembler::new(FragmentPolicy {
            max_fragment_chars: 20,
        });
        let fragments = asm.push("a very long stretch of words without any punctuation at all ");
        assert!(!fragments.is_empty());
        for f in &fragments {
            assert!(f.text.len() <= 20);
            assert!(!f.text.starts_with(' '));
            assert!(!f.text.ends_with(' '));
        }
    }

    #[test]
    fn test_finish_flushes_remainder() {
        let mut asm = FragmentAssembler::default();
        assert!(asm.push("trailing words with no period").is_empty());
        let last = asm.finish().unwrap();
        assert_eq!(last.text, "trailing words with no period");
        assert!(last.is_last);
        assert!(asm.finish().is_none());
    }

    #[test]
    fn test_fragment_text_whole_candidate() {
        let fragments = fragment_text(
            "What's the denominator on that churn number? Is it all customers or just enterprise?",
            FragmentPolicy::default(),
        );
        assert_eq!(fragments.len(), 2);
        assert!(fragments.last().unwrap().is_last);
        assert!(!fragments[0].is_last);
    }

    #[test]
    fn test_fragment_text_single_sentence() {
        let fragments = fragment_text("Just one question.", FragmentPolicy::default());
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].is_last);
        assert_eq!(fragments[0].text, "Just one question.");
    }

    #[test]
    fn test_abbreviation_quote_boundary() {
        let mut asm = FragmentAssembler::default();
        let fragments = asm.push("He said \"no more discounts.\" Then he left. ");
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].text, "He said \"no more discounts.\"");
    }

    #[test]
    fn test_empty_input() {
        let mut asm = FragmentAssembler::default();
        assert!(asm.push("").is_empty());
        assert!(asm.finish().is_none());
        assert_eq!(asm.emitted(), 0);
    }
}
