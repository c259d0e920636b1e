use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"[\p{L}\p{N}]+").expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "the","a","an","and","or","but","in","on","at","to","for","of","with","by","from",
            "as","is","was","are","were","been","be","have","has","had","do","does","did",
            "will","would","could","should","may","might","must","shall","can","need",
            "this","that","these","those","it","its","they","them","their","we","our","you",
            "your","he","she","his","her","not","no","so","if","then","than","too","very",
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Lazy stream of index terms over NFKC-normalized, lower-cased text.
pub struct Tokens {
    normalized: String,
    pos: usize,
}

impl Iterator for Tokens {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while let Some(mat) = RE.find_at(&self.normalized, self.pos) {
            self.pos = mat.end();
            let token = mat.as_str();
            // single characters carry no signal
            if token.chars().nth(1).is_none() || is_stopword(token) { continue; }
            return Some(token.to_string());
        }
        self.pos = self.normalized.len();
        None
    }
}

/// Tokenize text: lowercase, split on anything that is not a letter or digit,
/// drop tokens of one character and stop words. No stemming.
pub fn tokenize(text: &str) -> Tokens {
    let normalized = text.nfkc().collect::<String>().to_lowercase();
    Tokens { normalized, pos: 0 }
}

/// Term frequency map plus the document length in tokens.
pub fn term_frequencies(text: &str) -> (HashMap<String, u32>, u32) {
    let mut tf: HashMap<String, u32> = HashMap::new();
    let mut len = 0u32;
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0) += 1;
        len += 1;
    }
    (tf, len)
}
