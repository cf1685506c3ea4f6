//! Tokenization and stopword filtering.
//!
//! The [`Tokenizer`] trait is the seam for language-specific word
//! segmentation. [`DefaultTokenizer`] handles mixed Latin/CJK text
//! without a dictionary: alphanumeric runs become lowercase words and
//! CJK runs become overlapping character bigrams.
//!
//! Filtering is a separate step. An [`Analyzer`] pairs a tokenizer with
//! a [`StopwordSet`] and is rebuilt whole when the stopwords change.

use std::collections::HashSet;
use std::sync::Arc;

/// Stopwords always filtered, in addition to any configured ones.
pub const BUILTIN_STOPWORDS: &[&str] = &[
    // Chinese function words
    "的", "一", "不", "在", "人", "有", "是", "为", "以", "于", "上", "他", "而", "后", "之", "来",
    "及", "了", "因", "下", "可", "到", "由", "这", "与", "也", "此", "但", "并", "得", "其",
    "我们", "你", "他们", "一个", "一些", "和", "或", "等", "地", "中", "对", "从", "我", "她",
    // English function words
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

/// Splits text into terms.
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Dictionary-free tokenizer for mixed Latin and CJK text.
///
/// - alphanumeric runs are lowercased and emitted as one token
/// - a run of CJK ideographs/kana/hangul emits overlapping bigrams,
///   or the single character when the run has length one
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTokenizer;

impl Tokenizer for DefaultTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut cjk: Vec<char> = Vec::new();

        for c in text.chars() {
            if is_cjk(c) {
                flush_word(&mut word, &mut tokens);
                cjk.push(c);
            } else if c.is_alphanumeric() {
                flush_cjk(&mut cjk, &mut tokens);
                word.extend(c.to_lowercase());
            } else {
                flush_word(&mut word, &mut tokens);
                flush_cjk(&mut cjk, &mut tokens);
            }
        }
        flush_word(&mut word, &mut tokens);
        flush_cjk(&mut cjk, &mut tokens);
        tokens
    }
}

fn flush_word(word: &mut String, tokens: &mut Vec<String>) {
    if !word.is_empty() {
        tokens.push(std::mem::take(word));
    }
}

fn flush_cjk(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    match run.len() {
        0 => {}
        1 => tokens.push(run[0].to_string()),
        _ => tokens.extend(run.windows(2).map(|pair| pair.iter().collect::<String>())),
    }
    run.clear();
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF      // hiragana, katakana
        | 0x3400..=0x4DBF    // CJK extension A
        | 0x4E00..=0x9FFF    // CJK unified ideographs
        | 0xAC00..=0xD7AF    // hangul syllables
        | 0xF900..=0xFAFF    // compatibility ideographs
        | 0x20000..=0x2A6DF  // extension B
    )
}

/// Built-in stopwords merged with a user-supplied list.
#[derive(Debug, Clone)]
pub struct StopwordSet {
    custom: Vec<String>,
    words: HashSet<String>,
}

impl StopwordSet {
    pub fn new(custom: &[String]) -> Self {
        let custom: Vec<String> = custom
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        let words = BUILTIN_STOPWORDS
            .iter()
            .map(|w| w.to_string())
            .chain(custom.iter().cloned())
            .collect();
        Self { custom, words }
    }

    pub fn builtin() -> Self {
        Self::new(&[])
    }

    pub fn contains(&self, term: &str) -> bool {
        self.words.contains(term)
    }

    /// The user-supplied part, normalized.
    pub fn custom(&self) -> &[String] {
        &self.custom
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// A tokenizer plus the stopwords it filters.
#[derive(Clone)]
pub struct Analyzer {
    tokenizer: Arc<dyn Tokenizer>,
    stopwords: StopwordSet,
}

impl Analyzer {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, stopwords: StopwordSet) -> Self {
        Self {
            tokenizer,
            stopwords,
        }
    }

    /// Same tokenizer, new stopword list.
    pub fn rebuild(&self, stopwords: StopwordSet) -> Self {
        Self::new(Arc::clone(&self.tokenizer), stopwords)
    }

    pub fn stopwords(&self) -> &StopwordSet {
        &self.stopwords
    }

    pub fn analyze(&self, text: &str) -> Vec<String> {
        self.tokenizer
            .tokenize(text)
            .into_iter()
            .filter(|t| !t.trim().is_empty() && !self.stopwords.contains(t))
            .collect()
    }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("stopwords", &self.stopwords.len())
            .finish()
    }
}
