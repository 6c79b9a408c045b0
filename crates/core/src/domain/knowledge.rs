use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const CHUNK_ID_HEX_LEN: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl ChunkId {
    /// Deterministic id for the `ordinal`-th chunk of `source_url`, so re-ingestion upserts.
    pub fn derive(source_url: &str, ordinal: usize) -> Self {
        let digest = Sha256::digest(format!("{source_url}::{ordinal}").as_bytes());
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest.as_slice() {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex.truncate(CHUNK_ID_HEX_LEN);
        Self(hex)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: ChunkId,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Chunk text before embedding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkDraft {
    pub id: ChunkId,
    pub source_url: String,
    pub title: String,
    pub content: String,
}

impl ChunkDraft {
    pub fn with_embedding(self, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: self.id,
            source_url: self.source_url,
            title: self.title,
            content: self.content,
            embedding,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: ChunkId,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub distance: f32,
}

/// Collapses whitespace and cuts the text into `size`-char windows advancing by `size - overlap`.
///
/// The last window may be shorter. Sizes count chars, not bytes.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let clean = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.is_empty() || size == 0 {
        return Vec::new();
    }

    let chars = clean.chars().collect::<Vec<_>>();
    let step = size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end >= chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

pub fn build_chunk_drafts(
    source_url: &str,
    title: &str,
    text: &str,
    size: usize,
    overlap: usize,
) -> Vec<ChunkDraft> {
    chunk_text(text, size, overlap)
        .into_iter()
        .enumerate()
        .map(|(ordinal, content)| ChunkDraft {
            id: ChunkId::derive(source_url, ordinal),
            source_url: source_url.to_string(),
            title: title.to_string(),
            content,
        })
        .collect()
}

/// `1 - cosine similarity`; `None` for empty, mismatched or zero-norm vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some((1.0 - dot / denom) as f32)
}

/// Keeps the `k` nearest candidates, ascending by distance with ties broken by chunk id.
pub fn rank_nearest(
    query: &[f32],
    candidates: impl IntoIterator<Item = KnowledgeChunk>,
    k: usize,
) -> Vec<RetrievedChunk> {
    let mut scored = candidates
        .into_iter()
        .filter(|chunk| !chunk.content.trim().is_empty())
        .filter_map(|chunk| {
            cosine_distance(query, &chunk.embedding).map(|distance| RetrievedChunk {
                id: chunk.id,
                source_url: chunk.source_url,
                title: chunk.title,
                content: chunk.content,
                distance,
            })
        })
        .collect::<Vec<_>>();
    scored.sort_by(|left, right| {
        left.distance.total_cmp(&right.distance).then_with(|| left.id.cmp(&right.id))
    });
    scored.truncate(k.max(1));
    scored
}

#[cfg(test)]
mod tests {
    use super::{build_chunk_drafts, chunk_text, cosine_distance, rank_nearest, ChunkId, KnowledgeChunk};

    fn chunk(id: &str, embedding: Vec<f32>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: ChunkId(id.to_string()),
            source_url: format!("https://example.com/{id}"),
            title: id.to_string(),
            content: format!("content {id}"),
            embedding,
        }
    }

    #[test]
    fn chunk_ids_are_stable_and_ordinal_sensitive() {
        let first = ChunkId::derive("https://example.com/pricing", 0);

        assert_eq!(first, ChunkId::derive("https://example.com/pricing", 0));
        assert_ne!(first, ChunkId::derive("https://example.com/pricing", 1));
        assert_eq!(first.0.len(), 32);
        assert!(first.0.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn chunking_uses_size_minus_overlap_step_and_short_tail() {
        let text = "a".repeat(2500);
        let chunks = chunk_text(&text, 1000, 200);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 1000);
        assert_eq!(chunks[1].chars().count(), 1000);
        assert_eq!(chunks[2].chars().count(), 900);
    }

    #[test]
    fn chunking_collapses_whitespace_and_counts_chars() {
        let chunks = chunk_text("  привет \n\n  мир\tи всё  ", 7, 2);

        assert_eq!(chunks[0], "привет ");
        assert!(!chunks.concat().contains("  "));
        assert!(chunk_text("   \n ", 10, 2).is_empty());
    }

    #[test]
    fn drafts_number_chunks_per_source() {
        let drafts = build_chunk_drafts("https://example.com", "Home", &"x".repeat(1500), 1000, 200);

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].id, ChunkId::derive("https://example.com", 1));
        assert_eq!(drafts[0].title, "Home");
    }

    #[test]
    fn nearest_ranking_is_ascending_by_distance() {
        let query = vec![1.0, 0.0];
        let ranked = rank_nearest(
            &query,
            vec![
                chunk("far", vec![0.0, 1.0]),
                chunk("near", vec![1.0, 0.1]),
                chunk("exact", vec![2.0, 0.0]),
                chunk("broken", vec![1.0]),
            ],
            2,
        );

        let ids = ranked.iter().map(|item| item.id.0.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }
}
