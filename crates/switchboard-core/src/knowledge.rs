//! Knowledge search for agents that declare a collection
//!
//! [`KnowledgeSearch`] is the seam to whatever document store backs the bot.
//! [`MarkdownKnowledgeBase`] is the built-in one: a directory of
//! `RAG-<slug>.md` files searched by keyword overlap.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_KNOWLEDGE_TOP_K: usize = 3;
pub const DEFAULT_KNOWLEDGE_MAX_CHARS: usize = 2000;

/// One retrieved passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub content: String,
    #[serde(default)]
    pub source: String,
    /// Lower is closer
    #[serde(default)]
    pub distance: Option<f32>,
}

#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(
        &self,
        collection_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<KnowledgeSnippet>>;
}

/// Render snippets as the prompt's knowledge block, cut at `max_chars`.
///
/// Each snippet becomes `[i] (source) [dist: 0.1234]` followed by its content.
pub fn format_knowledge_context(snippets: &[KnowledgeSnippet], max_chars: usize) -> String {
    let rendered = snippets
        .iter()
        .enumerate()
        .map(|(i, snippet)| {
            let mut header = format!("[{}]", i + 1);
            if !snippet.source.is_empty() {
                header.push_str(&format!(" ({})", snippet.source));
            }
            if let Some(dist) = snippet.distance {
                header.push_str(&format!(" [dist: {:.4}]", dist));
            }
            format!("{}\n{}", header, snippet.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    match rendered.char_indices().nth(max_chars) {
        Some((cut, _)) => rendered[..cut].to_string(),
        None => rendered,
    }
}

/// File name for a collection: `RAG-<ascii-lowercase-slug>.md`
pub fn collection_file_name(collection_id: &str) -> String {
    let slug: String = collection_id
        .trim()
        .chars()
        .map(fold_accent)
        .map(|c| if c.is_whitespace() { '-' } else { c.to_ascii_lowercase() })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!("RAG-{}.md", slug)
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'a',
        'é' | 'ê' | 'è' | 'É' | 'Ê' | 'È' => 'e',
        'í' | 'ì' | 'î' | 'Í' | 'Ì' | 'Î' => 'i',
        'ó' | 'ô' | 'õ' | 'ò' | 'Ó' | 'Ô' | 'Õ' | 'Ò' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        other => other,
    }
}

/// Markdown files on disk, one per collection
#[derive(Debug, Clone)]
pub struct MarkdownKnowledgeBase {
    root: PathBuf,
}

impl MarkdownKnowledgeBase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `RAG-<slug>.md`, else a file literally named after the collection
    fn resolve(&self, collection_id: &str) -> Option<PathBuf> {
        let by_slug = self.root.join(collection_file_name(collection_id));
        if by_slug.is_file() {
            return Some(by_slug);
        }
        let exact = self.root.join(collection_id);
        exact.is_file().then_some(exact)
    }
}

#[async_trait]
impl KnowledgeSearch for MarkdownKnowledgeBase {
    async fn search(
        &self,
        collection_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<KnowledgeSnippet>> {
        let Some(path) = self.resolve(collection_id) else {
            debug!("No knowledge file for collection '{}'", collection_id);
            return Ok(Vec::new());
        };

        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read knowledge file {}", path.display()))?;

        let terms = query_terms(query);
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut scored: Vec<(usize, usize, &str)> = split_passages(&text)
            .into_iter()
            .enumerate()
            .filter_map(|(idx, passage)| {
                let haystack = normalize(passage);
                let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
                (hits > 0).then_some((hits, idx, passage))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let results: Vec<KnowledgeSnippet> = scored
            .into_iter()
            .take(top_k)
            .map(|(hits, _, passage)| KnowledgeSnippet {
                content: passage.to_string(),
                source: source.clone(),
                distance: Some(1.0 - hits as f32 / terms.len() as f32),
            })
            .collect();

        debug!(
            "Knowledge search in '{}' for {} terms returned {} passages",
            collection_id,
            terms.len(),
            results.len()
        );
        Ok(results)
    }
}

/// Passages are separated by blank lines or start at a markdown heading
fn split_passages(text: &str) -> Vec<&str> {
    let mut passages = Vec::new();
    let mut start: Option<usize> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        let line_start = offset;
        offset += line.len();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            if let Some(s) = start.take() {
                passages.push(text[s..line_start].trim());
            }
            if trimmed.starts_with('#') {
                start = Some(line_start);
            }
        } else if start.is_none() {
            start = Some(line_start);
        }
    }
    if let Some(s) = start {
        passages.push(text[s..].trim());
    }

    passages.retain(|p| !p.is_empty());
    passages
}

fn normalize(text: &str) -> String {
    text.chars().map(fold_accent).collect::<String>().to_lowercase()
}

/// Distinct query words of three or more characters
fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = normalize(query)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_string)
        .collect();
    terms.sort();
    terms.dedup();
    terms
}
