use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use storygraph_core::{ElementId, FlatEvent, GraphElement, MaterializedState, Position};

use crate::cache::{ChapterKey, SnapshotStore};
use crate::events::{EventSink, SceneEvent};
use crate::graph::replay;
use crate::graph::{
    diff, ElementBuilder, GraphIndex, NodePlacer, PlacementRegistry, SearchFilterEngine,
    SearchResult, SelectionHighlighter, SelectionState, StyleMutation, TapTarget,
};
use crate::net::{ChapterLoader, GraphFetcher, LoadOutcome, LoadSource};
use crate::render::{SceneRenderer, SceneSynchronizer, SyncReport};
use crate::store::{self, KeyValueStore};
use crate::util::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    Cache(LoadSource),
    FlatEvents,
    MacroGraph,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationReport {
    pub book_id: String,
    pub chapter_idx: u32,
    pub requested_event: i64,
    pub resolved_event: u32,
    pub source: StateSource,
    pub nodes: usize,
    pub edges: usize,
    pub dropped_edges: usize,
    pub restored_positions: usize,
    pub sync: SyncReport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationOutcome {
    Applied(NavigationReport),
    Superseded,
}

/// Issues navigation tokens; a new one cancels the one before it. Clones
/// share the same latest token, so a navigation can be superseded while the
/// session is busy with it.
#[derive(Debug, Clone, Default)]
pub struct Navigator {
    latest: Arc<Mutex<Option<CancellationToken>>>,
}

impl Navigator {
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let prev = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(prev) = prev {
            prev.cancel();
        }
        token
    }

    pub fn cancel(&self) {
        let prev = self.latest.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(prev) = prev {
            prev.cancel();
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveSearch {
    query: String,
    restrict: Option<HashSet<ElementId>>,
    result: SearchResult,
}

/// One reader's graph view: owns the caches, the scene and the visual state,
/// and turns navigation, taps, searches and drags into renderer calls.
pub struct GraphSession<R: SceneRenderer> {
    config: EngineConfig,
    renderer: R,
    snapshots: SnapshotStore,
    loader: ChapterLoader,
    builder: ElementBuilder,
    synchronizer: SceneSynchronizer,
    search_engine: SearchFilterEngine,
    highlighter: SelectionHighlighter,
    registry: PlacementRegistry,
    current: Vec<GraphElement>,
    index: GraphIndex,
    search: Option<ActiveSearch>,
    flat_events: HashMap<ChapterKey, Vec<FlatEvent>>,
    known_chapters: HashSet<ChapterKey>,
    book: Option<String>,
    navigator: Navigator,
    events: EventSink,
}

impl<R: SceneRenderer> GraphSession<R> {
    pub fn new(
        config: EngineConfig,
        renderer: R,
        kv: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn GraphFetcher>,
        events: EventSink,
    ) -> Self {
        let placer = NodePlacer::new(config.placement.clone());
        Self {
            snapshots: SnapshotStore::new(config.snapshot_cache_size),
            loader: ChapterLoader::new(kv, fetcher, config.store_ttl(), config.max_prefetch_events),
            builder: ElementBuilder::new(config.label_max_chars),
            synchronizer: SceneSynchronizer::new(
                placer,
                config.canvas,
                config.layout_config(),
                events.clone(),
            ),
            search_engine: SearchFilterEngine::new(config.min_query_len),
            highlighter: SelectionHighlighter::default(),
            registry: PlacementRegistry::default(),
            current: Vec::new(),
            index: GraphIndex::default(),
            search: None,
            flat_events: HashMap::new(),
            known_chapters: HashSet::new(),
            book: None,
            navigator: Navigator::default(),
            events,
            renderer,
            config,
        }
    }

    pub fn with_placement_seed(mut self, seed: u64) -> Self {
        self.synchronizer = SceneSynchronizer::new(
            NodePlacer::with_seed(self.config.placement.clone(), seed),
            self.config.canvas,
            self.config.layout_config(),
            self.events.clone(),
        );
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn elements(&self) -> &[GraphElement] {
        &self.current
    }

    pub fn registry(&self) -> &PlacementRegistry {
        &self.registry
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn selection(&self) -> &SelectionState {
        self.highlighter.state()
    }

    pub fn search_result(&self) -> Option<&SearchResult> {
        self.search.as_ref().map(|s| &s.result)
    }

    pub fn current_book(&self) -> Option<&str> {
        self.book.as_deref()
    }

    pub fn navigator(&self) -> Navigator {
        self.navigator.clone()
    }

    pub fn begin_navigation(&self) -> CancellationToken {
        self.navigator.begin()
    }

    pub fn register_flat_events(&mut self, book_id: &str, chapter_idx: u32, events: Vec<FlatEvent>) {
        self.flat_events.insert(ChapterKey::new(book_id, chapter_idx), events);
    }

    pub async fn navigate(
        &mut self,
        book_id: &str,
        chapter_idx: u32,
        event_idx: i64,
        token: &CancellationToken,
    ) -> NavigationOutcome {
        if token.is_cancelled() {
            return NavigationOutcome::Superseded;
        }

        let book_changed = self.book.as_deref() != Some(book_id);
        let saved_positions = if book_changed && self.config.persist_positions {
            let saved = store::load_positions(self.loader.kv().as_ref(), book_id).await;
            if token.is_cancelled() {
                return NavigationOutcome::Superseded;
            }
            Some(saved)
        } else {
            None
        };

        let (state, source) = match self.resolve_state(book_id, chapter_idx, event_idx, token).await {
            Some(resolved) => resolved,
            None => return NavigationOutcome::Superseded,
        };

        // Nothing below suspends; the scene is updated in one go.
        let mut restored_positions = 0;
        if book_changed {
            self.clear_scene();
            if let Some(saved) = saved_positions {
                restored_positions = self.registry.restore(saved);
            }
            self.book = Some(book_id.to_string());
        }

        let built = self.builder.build_state(&state);
        let delta = diff(&self.current, &built.elements);
        let sync = self
            .synchronizer
            .sync(&mut self.renderer, &delta, &mut self.registry);

        self.highlighter
            .forget_removed(delta.removed.iter().map(|e| e.id()));
        self.current = built.elements;
        self.index = GraphIndex::from_elements(&self.current);
        self.rerun_search();
        self.refresh_styles();

        if self.config.persist_positions && sync.is_structural() {
            self.persist_positions().await;
        }

        let added_nodes: Vec<ElementId> = sync
            .added
            .iter()
            .filter(|id| self.index.has_node(id))
            .cloned()
            .collect();
        self.events.emit(SceneEvent::NodesAdded {
            book_id: book_id.to_string(),
            chapter_idx,
            event_idx,
            ids: added_nodes,
        });

        let nodes = self.current.iter().filter(|e| e.is_node()).count();
        let report = NavigationReport {
            book_id: book_id.to_string(),
            chapter_idx,
            requested_event: event_idx,
            resolved_event: state.event_idx,
            source,
            nodes,
            edges: self.current.len() - nodes,
            dropped_edges: built.dropped_edges,
            restored_positions,
            sync,
        };
        tracing::debug!(
            book = book_id,
            chapter = chapter_idx,
            event = event_idx,
            source = ?report.source,
            nodes = report.nodes,
            edges = report.edges,
            "navigation applied"
        );
        NavigationOutcome::Applied(report)
    }

    pub fn tap(&mut self, target: TapTarget) -> Vec<StyleMutation> {
        let search = self.search.as_ref().map(|s| &s.result);
        let muts = self.highlighter.tap(target, &self.index, search);
        self.synchronizer.apply_styles(&mut self.renderer, &muts);
        muts
    }

    pub fn set_search(&mut self, query: &str, restrict: Option<HashSet<ElementId>>) -> SearchResult {
        let result = self
            .search_engine
            .filter(query, &self.current, restrict.as_ref());
        self.search = result.active.then(|| ActiveSearch {
            query: query.to_string(),
            restrict,
            result: result.clone(),
        });
        self.refresh_styles();
        result
    }

    pub fn node_dragged(&mut self, id: &ElementId, p: Position) -> bool {
        if !self.index.has_node(id) {
            return false;
        }
        if let Err(e) = self.renderer.set_position(id, p) {
            tracing::warn!(%id, error = %e, "drag not applied");
            return false;
        }
        self.registry.moved(id.clone(), p);
        true
    }

    pub async fn persist_positions(&self) {
        let Some(book) = &self.book else {
            return;
        };
        if let Err(e) = store::save_positions(self.loader.kv().as_ref(), book, &self.registry).await {
            tracing::warn!(book = %book, error = %e, "positions not persisted");
        }
    }

    /// Records a book manifest version, here and in the store. A change from
    /// the version seen by this or an earlier session drops that book's cached
    /// chapters.
    pub async fn observe_manifest(&mut self, book_id: &str, version: &str) -> bool {
        let kv = Arc::clone(self.loader.kv());
        let stored = store::load_manifest(kv.as_ref(), book_id).await;
        let previous = self
            .snapshots
            .manifest(book_id)
            .map(str::to_string)
            .or_else(|| stored.clone());
        let changed_here = self.snapshots.observe_manifest(book_id, version);
        if stored.as_deref() != Some(version) {
            if let Err(e) = store::save_manifest(kv.as_ref(), book_id, version).await {
                tracing::warn!(book = book_id, error = %e, "manifest version not persisted");
            }
        }
        if !changed_here && previous.as_deref().map_or(true, |p| p == version) {
            return false;
        }
        if !changed_here {
            let dropped = self.snapshots.invalidate_book(book_id);
            tracing::debug!(book = book_id, from = ?previous, to = version, dropped, "manifest changed since last session");
        }

        let stale: Vec<ChapterKey> = self
            .known_chapters
            .iter()
            .filter(|k| k.book_id == book_id)
            .cloned()
            .collect();
        for key in stale {
            let stale_key = store::snapshot_key(&key.book_id, previous.as_deref(), key.chapter_idx);
            if let Err(e) = kv.remove(&stale_key).await {
                tracing::warn!(book = book_id, chapter = key.chapter_idx, error = %e, "stale chapter not removed");
            }
            self.known_chapters.remove(&key);
        }
        true
    }

    pub fn reset(&mut self) -> SyncReport {
        self.navigator.cancel();
        let report = self.clear_scene();
        self.book = None;
        report
    }

    async fn resolve_state(
        &mut self,
        book_id: &str,
        chapter_idx: u32,
        event_idx: i64,
        token: &CancellationToken,
    ) -> Option<(MaterializedState, StateSource)> {
        match self.loader.load(&mut self.snapshots, book_id, chapter_idx, event_idx, token).await {
            LoadOutcome::Superseded => return None,
            LoadOutcome::Ready(src) => {
                self.known_chapters.insert(ChapterKey::new(book_id, chapter_idx));
                let state = self.snapshots.reconstruct(book_id, chapter_idx, event_idx, &[]);
                return Some((state, StateSource::Cache(src)));
            }
            LoadOutcome::Miss => {}
        }

        if let Some(flat) = self.flat_events.get(&ChapterKey::new(book_id, chapter_idx)) {
            return Some((replay::aggregate_flat(flat, event_idx), StateSource::FlatEvents));
        }

        match self.loader.load_macro(book_id, chapter_idx, token).await {
            LoadOutcome::Superseded => None,
            LoadOutcome::Ready(g) => Some((replay::from_macro(&g), StateSource::MacroGraph)),
            LoadOutcome::Miss => {
                tracing::debug!(book = book_id, chapter = chapter_idx, "no graph data, showing empty chapter");
                Some((MaterializedState::empty(), StateSource::Empty))
            }
        }
    }

    fn clear_scene(&mut self) -> SyncReport {
        let delta = diff(&self.current, &[]);
        let report = self
            .synchronizer
            .sync(&mut self.renderer, &delta, &mut self.registry);
        let clears = self.highlighter.reset();
        self.synchronizer.apply_styles(&mut self.renderer, &clears);
        self.synchronizer.reset();
        self.registry.clear();
        self.current.clear();
        self.index = GraphIndex::default();
        self.search = None;
        report
    }

    fn rerun_search(&mut self) {
        let Some(active) = self.search.take() else {
            return;
        };
        let result = self
            .search_engine
            .filter(&active.query, &self.current, active.restrict.as_ref());
        self.search = Some(ActiveSearch { result, ..active });
    }

    fn refresh_styles(&mut self) {
        let search = self.search.as_ref().map(|s| &s.result);
        let muts = self.highlighter.refresh(&self.index, search);
        self.synchronizer.apply_styles(&mut self.renderer, &muts);
    }
}
