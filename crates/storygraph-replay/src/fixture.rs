use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use storygraph_core::{Envelope, FineGraph, FlatEvent, MacroGraph};
use storygraph_engine::net::{FetchError, GraphFetcher};

pub const SAMPLE_BOOK: &str = include_str!("../fixtures/sample_book.json");

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookFixture {
    pub book_id: String,
    #[serde(default)]
    pub manifest_version: Option<String>,
    pub chapters: Vec<ChapterFixture>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterFixture {
    pub chapter_idx: u32,
    #[serde(default)]
    pub snapshot: Option<serde_json::Value>,
    #[serde(default)]
    pub fine_graphs: Vec<FineGraph>,
    #[serde(default)]
    pub flat_events: Vec<FlatEvent>,
    #[serde(default)]
    pub macro_graph: Option<MacroGraph>,
}

impl ChapterFixture {
    pub fn last_event(&self) -> u32 {
        let from_snapshot = self
            .snapshot
            .as_ref()
            .and_then(|v| v.get("maxEventIdx"))
            .and_then(|v| v.as_u64())
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        let from_fine = self
            .fine_graphs
            .iter()
            .map(|g| g.max_event_idx.unwrap_or(g.event_idx).max(g.event_idx))
            .max()
            .unwrap_or(0);
        let from_flat = self.flat_events.iter().map(|e| e.event_idx).max().unwrap_or(0);
        from_snapshot.max(from_fine).max(from_flat)
    }
}

impl BookFixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid fixture {}", path.display()))
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut fixture: BookFixture = serde_json::from_str(raw).context("failed to decode book fixture")?;
        fixture.chapters.sort_by_key(|c| c.chapter_idx);
        Ok(fixture)
    }

    pub fn steps(&self, only_chapter: Option<u32>) -> Vec<(u32, i64)> {
        self.chapters
            .iter()
            .filter(|c| only_chapter.map_or(true, |n| n == c.chapter_idx))
            .flat_map(|c| match c.last_event() {
                0 => vec![(c.chapter_idx, 0)],
                last => (1..=i64::from(last)).map(|e| (c.chapter_idx, e)).collect(),
            })
            .collect()
    }
}

pub struct FixtureFetcher {
    book_id: String,
    fine: HashMap<(u32, u32), FineGraph>,
    macros: HashMap<u32, MacroGraph>,
}

impl FixtureFetcher {
    pub fn new(fixture: &BookFixture) -> Self {
        let mut fine = HashMap::new();
        let mut macros = HashMap::new();
        for c in &fixture.chapters {
            for g in &c.fine_graphs {
                fine.insert((c.chapter_idx, g.event_idx), g.clone());
            }
            if let Some(m) = &c.macro_graph {
                macros.insert(c.chapter_idx, m.clone());
            }
        }
        Self {
            book_id: fixture.book_id.clone(),
            fine,
            macros,
        }
    }
}

#[async_trait]
impl GraphFetcher for FixtureFetcher {
    async fn fetch_macro_graph(
        &self,
        book_id: &str,
        up_to_chapter: u32,
    ) -> Result<Envelope<MacroGraph>, FetchError> {
        if book_id != self.book_id {
            return Ok(Envelope::failure());
        }
        Ok(self
            .macros
            .get(&up_to_chapter)
            .cloned()
            .map_or_else(Envelope::failure, Envelope::success))
    }

    async fn fetch_fine_graph(
        &self,
        book_id: &str,
        chapter_idx: u32,
        event_idx: u32,
    ) -> Result<Envelope<FineGraph>, FetchError> {
        if book_id != self.book_id {
            return Ok(Envelope::failure());
        }
        Ok(self
            .fine
            .get(&(chapter_idx, event_idx))
            .cloned()
            .map_or_else(Envelope::failure, Envelope::success))
    }
}
