use std::collections::{HashMap, HashSet};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 1.0;

/// In-memory BM25 index over the description corpus, rebuilt for every
/// search call.
///
/// Tokenization splits on whitespace and nothing else: no stemming, no
/// stopwords, no accent stripping, case preserved. Query terms combine
/// disjunctively; the IDF is smoothed (`ln(1 + (N - n + 0.5) / (n + 0.5))`)
/// so a term present in every document still contributes a positive score,
/// and document length is fully normalized so a short exact match outranks a
/// longer document repeating the term.
pub struct Bm25Index {
    docs: Vec<DocEntry>,
    doc_freq: HashMap<String, usize>,
    avg_len: f64,
}

struct DocEntry {
    term_freq: HashMap<String, usize>,
    len: usize,
}

pub fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

impl Bm25Index {
    pub fn build<'a, I>(texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut docs = Vec::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;

        for text in texts {
            let mut term_freq: HashMap<String, usize> = HashMap::new();
            let mut len = 0usize;
            for term in tokenize(text) {
                *term_freq.entry(term.to_string()).or_insert(0) += 1;
                len += 1;
            }
            for term in term_freq.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            total_len += len;
            docs.push(DocEntry { term_freq, len });
        }

        let avg_len = if docs.is_empty() || total_len == 0 {
            1.0
        } else {
            total_len as f64 / docs.len() as f64
        };
        Self {
            docs,
            doc_freq,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// BM25 score of every document against `query`, position-aligned with
    /// the build order. `None` marks documents matching no query term.
    pub fn score_all(&self, query: &str) -> Vec<Option<f64>> {
        let terms: HashSet<&str> = tokenize(query).collect();
        let num_docs = self.docs.len() as f64;

        self.docs
            .iter()
            .map(|doc| {
                let mut score = 0.0;
                let mut matched = false;
                for term in &terms {
                    let Some(&tf) = doc.term_freq.get(*term) else {
                        continue;
                    };
                    matched = true;
                    let n = *self.doc_freq.get(*term).unwrap_or(&0) as f64;
                    let idf = (1.0 + (num_docs - n + 0.5) / (n + 0.5)).ln();
                    let tf = tf as f64;
                    let norm =
                        tf + BM25_K1 * (1.0 - BM25_B + BM25_B * doc.len as f64 / self.avg_len);
                    score += idf * (tf * (BM25_K1 + 1.0)) / norm;
                }
                if matched {
                    Some(score)
                } else {
                    None
                }
            })
            .collect()
    }
}
