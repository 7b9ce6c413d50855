//! Brute-force sync word correlation.
//!
//! Useful during initial acquisition to locate a known hard-decision pattern in a soft symbol
//! buffer. The cost is `O(N * W * R)` for a buffer of `N` bytes and `R` words of length `W`, so
//! it should not be used once the stream is locked.
use crate::{Error, Result};

/// Soft values at or above this threshold are hard decoded as 1.
pub const HARD_THRESHOLD: u8 = 127;

/// Word byte value expecting a soft 1.
pub const EXPECT_ONE: u8 = 0;
/// Word byte value expecting a soft 0.
pub const EXPECT_ZERO: u8 = 255;

fn hard_correlate(data: u8, expected: u8) -> u32 {
    match expected {
        EXPECT_ONE if data >= HARD_THRESHOLD => 1,
        EXPECT_ZERO if data < HARD_THRESHOLD => 1,
        _ => 0,
    }
}

/// Expand the bits of `pattern`, MSB first, into a correlation word using the
/// [EXPECT_ONE]/[EXPECT_ZERO] convention.
#[must_use]
pub fn encode_word(pattern: &[u8]) -> Vec<u8> {
    pattern
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1))
        .map(|bit| if bit == 1 { EXPECT_ONE } else { EXPECT_ZERO })
        .collect()
}

/// Best match found for a single word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Correlation {
    /// Index of the word in the correlator's word list.
    pub word: usize,
    /// Offset into the searched buffer where the word starts.
    pub offset: usize,
    /// Number of matching positions.
    pub score: u32,
}

/// Correlates one or more equal-length reference words against soft symbol buffers.
#[derive(Debug, Clone)]
pub struct Correlator {
    words: Vec<Vec<u8>>,
    best: Vec<Correlation>,
    winner: usize,
}

impl Correlator {
    /// Create a correlator for `words`.
    ///
    /// # Errors
    /// [Error::Config] if there are no words, any word is empty, or the words differ in length.
    pub fn new(words: Vec<Vec<u8>>) -> Result<Self> {
        let Some(first) = words.first() else {
            return Err(Error::Config("no correlation words provided".into()));
        };
        let len = first.len();
        if len == 0 {
            return Err(Error::Config("correlation words must not be empty".into()));
        }
        if let Some(idx) = words.iter().position(|w| w.len() != len) {
            return Err(Error::Config(format!(
                "correlation word {idx} has length {}, expected {len}",
                words[idx].len()
            )));
        }
        let best = (0..words.len())
            .map(|word| Correlation {
                word,
                ..Default::default()
            })
            .collect();
        Ok(Correlator {
            words,
            best,
            winner: 0,
        })
    }

    /// Length of every reference word.
    #[must_use]
    pub fn word_len(&self) -> usize {
        self.words[0].len()
    }

    fn reset(&mut self) {
        for (word, c) in self.best.iter_mut().enumerate() {
            *c = Correlation {
                word,
                ..Default::default()
            };
        }
        self.winner = 0;
    }

    /// Search every offset of `data` for every word and return the overall best match.
    ///
    /// Per-word results remain available through [Self::per_word] until the next call. On ties
    /// the earliest offset, then the earliest word, wins.
    ///
    /// # Errors
    /// [Error::NotEnoughData] if `data` is shorter than the word length.
    pub fn correlate(&mut self, data: &[u8]) -> Result<Correlation> {
        let wlen = self.word_len();
        if data.len() < wlen {
            return Err(Error::NotEnoughData {
                actual: data.len(),
                minimum: wlen,
            });
        }
        self.reset();

        for (offset, window) in data.windows(wlen).enumerate() {
            for (word, best) in self.words.iter().zip(self.best.iter_mut()) {
                let score = window
                    .iter()
                    .zip(word)
                    .map(|(d, w)| hard_correlate(*d, *w))
                    .sum::<u32>();
                if score > best.score {
                    best.score = score;
                    best.offset = offset;
                }
            }
        }

        let mut high = 0;
        for (idx, c) in self.best.iter().enumerate() {
            if c.score > high {
                high = c.score;
                self.winner = idx;
            }
        }

        Ok(self.best[self.winner])
    }

    /// Best correlation of the last search.
    #[must_use]
    pub fn highest(&self) -> Correlation {
        self.best[self.winner]
    }

    /// Best correlation of the last search for each word, in word order.
    #[must_use]
    pub fn per_word(&self) -> &[Correlation] {
        &self.best
    }
}
