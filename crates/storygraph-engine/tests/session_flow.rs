use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use storygraph_core::{
    BaseSnapshot, ChapterSnapshotCache, CharacterState, ElementId, Envelope, EventDelta, FineGraph,
    FlatEvent, MacroGraph, RelationState,
};
use storygraph_engine::cache::codec;
use storygraph_engine::graph::{TapTarget, VisualClass};
use storygraph_engine::net::{FetchError, GraphFetcher, LoadSource};
use storygraph_engine::render::{HeadlessRenderer, SyncPhase};
use storygraph_engine::store::{snapshot_key, KeyValueStore, MemoryStore};
use storygraph_engine::{
    EngineConfig, EventSink, GraphSession, NavigationOutcome, NavigationReport, SceneEvent,
    StateSource,
};

const BOOK: &str = "book-1";

#[derive(Default)]
struct Scripted {
    fine: HashMap<(u32, u32), FineGraph>,
    macros: HashMap<u32, MacroGraph>,
    calls: AtomicUsize,
}

impl Scripted {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphFetcher for Scripted {
    async fn fetch_macro_graph(
        &self,
        _book_id: &str,
        up_to_chapter: u32,
    ) -> Result<Envelope<MacroGraph>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .macros
            .get(&up_to_chapter)
            .cloned()
            .map_or_else(Envelope::failure, Envelope::success))
    }

    async fn fetch_fine_graph(
        &self,
        _book_id: &str,
        chapter_idx: u32,
        event_idx: u32,
    ) -> Result<Envelope<FineGraph>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .fine
            .get(&(chapter_idx, event_idx))
            .cloned()
            .map_or_else(Envelope::failure, Envelope::success))
    }
}

fn id(s: &str) -> ElementId {
    ElementId::new(s)
}

fn ids(list: &[ElementId]) -> HashSet<String> {
    list.iter().map(|i| i.as_str().to_string()).collect()
}

fn set_of(list: &[&str]) -> HashSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Base at event 1 with Anna alone; event 2 brings Ben and their relation.
fn growing_chapter(chapter_idx: u32) -> ChapterSnapshotCache {
    let mut d2 = EventDelta::new(2);
    d2.characters.push(CharacterState::new("B", "Ben"));
    d2.relations.push(RelationState::new("A", "B", 0.5));
    ChapterSnapshotCache {
        book_id: BOOK.to_string(),
        chapter_idx,
        base_snapshot: BaseSnapshot {
            event_idx: 1,
            characters: vec![CharacterState::new("A", "Anna")],
            relations: Vec::new(),
        },
        diffs: vec![d2],
        max_event_idx: 2,
    }
}

fn trio_chapter(chapter_idx: u32) -> ChapterSnapshotCache {
    ChapterSnapshotCache {
        book_id: BOOK.to_string(),
        chapter_idx,
        base_snapshot: BaseSnapshot {
            event_idx: 1,
            characters: vec![
                CharacterState::new("1", "Anna"),
                CharacterState::new("2", "Ben"),
                CharacterState::new("3", "Dora"),
            ],
            relations: vec![RelationState::new("1", "2", 0.2), RelationState::new("2", "3", -0.4)],
        },
        diffs: Vec::new(),
        max_event_idx: 1,
    }
}

async fn seed(kv: &MemoryStore, cache: &ChapterSnapshotCache) {
    seed_under(kv, None, cache).await;
}

async fn seed_under(kv: &MemoryStore, manifest: Option<&str>, cache: &ChapterSnapshotCache) {
    let value = codec::to_json(cache).expect("encode");
    kv.set(&snapshot_key(&cache.book_id, manifest, cache.chapter_idx), value, None)
        .await
        .expect("seed");
}

fn fine(event_idx: u32, max: u32, characters: &[&str]) -> FineGraph {
    FineGraph {
        chapter_idx: 1,
        event_idx,
        max_event_idx: Some(max),
        char_start_pos: 0,
        char_end_pos: 0,
        characters: characters.iter().map(|c| CharacterState::new(*c, *c)).collect(),
        relations: Vec::new(),
        event_meta: None,
    }
}

/// Chapter 1 served event by event: Anna, then Anna and Ben.
fn growing_fetcher() -> Scripted {
    let mut fetcher = Scripted::default();
    fetcher.fine.insert((1, 1), fine(1, 2, &["A"]));
    let mut g = fine(2, 2, &["A", "B"]);
    g.relations.push(RelationState::new("A", "B", 0.5));
    fetcher.fine.insert((1, 2), g);
    fetcher
}

fn session(
    kv: Arc<MemoryStore>,
    fetcher: Arc<Scripted>,
    sink: EventSink,
) -> GraphSession<HeadlessRenderer> {
    GraphSession::new(EngineConfig::default(), HeadlessRenderer::new(), kv, fetcher, sink)
        .with_placement_seed(11)
}

async fn go(s: &mut GraphSession<HeadlessRenderer>, chapter: u32, event: i64) -> NavigationReport {
    let token = s.begin_navigation();
    match s.navigate(BOOK, chapter, event, &token).await {
        NavigationOutcome::Applied(report) => report,
        NavigationOutcome::Superseded => panic!("navigation to {chapter}/{event} superseded"),
    }
}

#[tokio::test]
async fn cached_chapter_grows_between_events() {
    let kv = Arc::new(MemoryStore::new());
    seed(&kv, &growing_chapter(1)).await;
    let (sink, events) = EventSink::channel();
    let mut s = session(kv, Arc::new(Scripted::default()), sink);

    let first = go(&mut s, 1, 1).await;
    assert_eq!(first.source, StateSource::Cache(LoadSource::Store));
    assert_eq!((first.nodes, first.edges), (1, 0));
    assert_eq!(ids(&first.sync.added), set_of(&["A"]));

    let second = go(&mut s, 1, 2).await;
    assert_eq!(second.source, StateSource::Cache(LoadSource::Memory));
    assert_eq!(second.resolved_event, 2);
    assert_eq!(ids(&second.sync.added), set_of(&["B", "A|B"]));
    assert!(second.sync.removed.is_empty());
    assert!(s.renderer().element(&id("A|B")).is_some());

    let entered: Vec<Vec<ElementId>> = events
        .try_iter()
        .filter_map(|ev| match ev {
            SceneEvent::NodesAdded { ids, .. } => Some(ids),
            SceneEvent::LayoutComplete { .. } => None,
        })
        .collect();
    assert_eq!(entered, vec![vec![id("A")], vec![id("B")]]);

    // Going back drops what event 2 introduced.
    let back = go(&mut s, 1, 1).await;
    assert_eq!(ids(&back.sync.removed), set_of(&["B", "A|B"]));
    assert_eq!(s.renderer().len(), 1);
}

#[tokio::test]
async fn repeated_navigation_makes_no_renderer_calls() {
    let kv = Arc::new(MemoryStore::new());
    seed(&kv, &growing_chapter(1)).await;
    let mut s = session(kv, Arc::new(Scripted::default()), EventSink::disconnected());

    go(&mut s, 1, 2).await;
    s.renderer_mut().take_calls();
    let again = go(&mut s, 1, 2).await;
    assert!(again.sync.is_noop());
    assert!(s.renderer().calls().is_empty());

    // Past the last event clamps to it.
    let clamped = go(&mut s, 1, 99).await;
    assert_eq!(clamped.resolved_event, 2);
    assert!(s.renderer().calls().is_empty());
}

#[tokio::test]
async fn stale_navigation_is_superseded() {
    let kv = Arc::new(MemoryStore::new());
    seed(&kv, &growing_chapter(1)).await;
    let mut s = session(kv, Arc::new(Scripted::default()), EventSink::disconnected());

    let stale = s.begin_navigation();
    let fresh = s.begin_navigation();
    assert_eq!(s.navigate(BOOK, 1, 2, &stale).await, NavigationOutcome::Superseded);
    assert!(s.renderer().calls().is_empty());
    assert!(s.current_book().is_none());

    assert!(matches!(
        s.navigate(BOOK, 1, 2, &fresh).await,
        NavigationOutcome::Applied(_)
    ));
    assert_eq!(s.renderer().len(), 3);
}

/// Holds its first fine-graph fetch until `gate` is notified.
struct Gated {
    inner: Scripted,
    entered: Notify,
    gate: Notify,
}

#[async_trait]
impl GraphFetcher for Gated {
    async fn fetch_macro_graph(&self, book_id: &str, up_to_chapter: u32) -> Result<Envelope<MacroGraph>, FetchError> {
        self.inner.fetch_macro_graph(book_id, up_to_chapter).await
    }

    async fn fetch_fine_graph(&self, book_id: &str, chapter_idx: u32, event_idx: u32) -> Result<Envelope<FineGraph>, FetchError> {
        if self.inner.calls() == 0 {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        self.inner.fetch_fine_graph(book_id, chapter_idx, event_idx).await
    }
}

#[tokio::test]
async fn navigation_overtaken_mid_fetch_is_dropped() {
    let kv = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(Gated {
        inner: growing_fetcher(),
        entered: Notify::new(),
        gate: Notify::new(),
    });
    let mut s = GraphSession::new(
        EngineConfig::default(),
        HeadlessRenderer::new(),
        kv.clone(),
        fetcher.clone(),
        EventSink::disconnected(),
    );
    let navigator = s.navigator();

    let a = s.begin_navigation();
    let (outcome, b) = tokio::join!(s.navigate(BOOK, 1, 2, &a), async {
        fetcher.entered.notified().await;
        let b = navigator.begin();
        fetcher.gate.notify_one();
        b
    });
    assert_eq!(outcome, NavigationOutcome::Superseded);
    assert!(a.is_cancelled());
    assert!(s.renderer().calls().is_empty());
    assert!(s.current_book().is_none());
    assert!(!s.snapshots().contains(BOOK, 1));
    assert!(kv.is_empty().await);

    match s.navigate(BOOK, 1, 2, &b).await {
        NavigationOutcome::Applied(report) => assert_eq!((report.nodes, report.edges), (2, 1)),
        NavigationOutcome::Superseded => panic!("latest navigation superseded"),
    }
}

#[tokio::test]
async fn positions_and_chapters_survive_a_new_session() {
    let kv = Arc::new(MemoryStore::new());

    let mut first = session(kv.clone(), Arc::new(growing_fetcher()), EventSink::disconnected());
    let report = go(&mut first, 1, 2).await;
    assert_eq!(report.source, StateSource::Cache(LoadSource::Fetched));
    assert_eq!(first.registry().len(), 2);

    let offline = Arc::new(Scripted::default());
    let mut second = session(kv, offline.clone(), EventSink::disconnected());
    let report = go(&mut second, 1, 2).await;
    assert_eq!(report.source, StateSource::Cache(LoadSource::Store));
    assert_eq!(report.restored_positions, 2);
    assert_eq!(offline.calls(), 0);
    for node in ["A", "B"] {
        assert_eq!(second.registry().get(&id(node)), first.registry().get(&id(node)));
    }
}

#[tokio::test]
async fn falls_back_to_flat_events_then_macro_graph() {
    let mut fetcher = Scripted::default();
    fetcher.macros.insert(
        3,
        MacroGraph {
            up_to_chapter: 3,
            characters: vec![CharacterState::new("A", "Anna"), CharacterState::new("C", "Cid")],
            relations: vec![RelationState::new("C", "A", 0.1), RelationState::new("A", "Z", 0.9)],
        },
    );
    let mut s = session(Arc::new(MemoryStore::new()), Arc::new(fetcher), EventSink::disconnected());
    s.register_flat_events(
        BOOK,
        2,
        vec![
            FlatEvent {
                event_idx: 2,
                characters: vec![CharacterState::new("B", "Ben")],
                relations: Vec::new(),
            },
            FlatEvent {
                event_idx: 1,
                characters: vec![CharacterState::new("A", "Anna")],
                relations: Vec::new(),
            },
        ],
    );

    let flat = go(&mut s, 2, 5).await;
    assert_eq!(flat.source, StateSource::FlatEvents);
    assert_eq!(flat.resolved_event, 2);
    assert_eq!(flat.nodes, 2);

    let chapter_level = go(&mut s, 3, 1).await;
    assert_eq!(chapter_level.source, StateSource::MacroGraph);
    assert_eq!(chapter_level.resolved_event, 0);
    assert_eq!((chapter_level.nodes, chapter_level.edges), (2, 1));
    assert_eq!(chapter_level.dropped_edges, 1);
    assert!(s.renderer().element(&id("A|C")).is_some());

    let nothing = go(&mut s, 4, 1).await;
    assert_eq!(nothing.source, StateSource::Empty);
    assert!(s.renderer().is_empty());
}

#[tokio::test]
async fn failed_add_is_retried_on_next_navigation() {
    let kv = Arc::new(MemoryStore::new());
    seed(&kv, &growing_chapter(1)).await;
    let mut s = session(kv, Arc::new(Scripted::default()), EventSink::disconnected());

    s.renderer_mut().fail_once("add_elements");
    let failed = go(&mut s, 1, 2).await;
    assert!(failed.sync.failed_phases.contains(&SyncPhase::Add));
    assert!(failed.sync.pending > 0);
    assert!(s.renderer().is_empty());

    let retried = go(&mut s, 1, 2).await;
    assert!(retried.sync.failed_phases.is_empty());
    assert_eq!(s.renderer().len(), 3);
}

#[tokio::test]
async fn search_scopes_tap_highlights() {
    let kv = Arc::new(MemoryStore::new());
    seed(&kv, &trio_chapter(1)).await;
    let mut s = session(kv, Arc::new(Scripted::default()), EventSink::disconnected());
    go(&mut s, 1, 1).await;

    let result = s.set_search("an", None);
    assert!(result.active);
    assert_eq!(
        result.result_ids.iter().map(|i| i.as_str().to_string()).collect::<HashSet<_>>(),
        set_of(&["1", "2", "1|2"])
    );
    let r = s.renderer();
    assert_eq!(r.class_of(&id("3")), Some(VisualClass::Faded));
    assert_eq!(r.class_of(&id("2|3")), Some(VisualClass::Faded));
    assert_eq!(r.class_of(&id("1")), None);

    s.tap(TapTarget::Node(id("1")));
    let r = s.renderer();
    assert_eq!(r.class_of(&id("1")), Some(VisualClass::Selected));
    assert_eq!(r.class_of(&id("2")), Some(VisualClass::Highlighted));
    assert_eq!(r.class_of(&id("1|2")), Some(VisualClass::Highlighted));
    assert_eq!(r.class_of(&id("3")), Some(VisualClass::Faded));

    let cleared = s.set_search("a", None);
    assert!(!cleared.active);
    assert!(s.search_result().is_none());

    let muts = s.tap(TapTarget::Node(id("3")));
    assert!(!muts
        .iter()
        .any(|m| m.id == id("1") && m.class == Some(VisualClass::Selected)));
    let r = s.renderer();
    assert_eq!(r.class_of(&id("3")), Some(VisualClass::Selected));
    assert_eq!(r.class_of(&id("2")), Some(VisualClass::Highlighted));
    assert_eq!(r.class_of(&id("2|3")), Some(VisualClass::Highlighted));
    assert_eq!(r.class_of(&id("1")), Some(VisualClass::Faded));

    s.tap(TapTarget::Background);
    assert!(s.renderer().class_of(&id("1")).is_none());
}

#[tokio::test]
async fn manifest_change_drops_stored_chapters() {
    let kv = Arc::new(MemoryStore::new());
    seed_under(&kv, Some("v1"), &growing_chapter(1)).await;
    let mut s = session(kv.clone(), Arc::new(Scripted::default()), EventSink::disconnected());

    // First sighting only records the version.
    assert!(!s.observe_manifest(BOOK, "v1").await);
    let report = go(&mut s, 1, 2).await;
    assert_eq!(report.source, StateSource::Cache(LoadSource::Store));
    assert!(!s.observe_manifest(BOOK, "v1").await);
    assert!(s.observe_manifest(BOOK, "v2").await);
    assert!(kv.get(&snapshot_key(BOOK, Some("v1"), 1)).await.expect("get").is_none());
    assert!(!s.snapshots().contains(BOOK, 1));
}

#[tokio::test]
async fn manifest_change_is_seen_by_a_new_session() {
    let kv = Arc::new(MemoryStore::new());
    let mut first = session(kv.clone(), Arc::new(growing_fetcher()), EventSink::disconnected());
    assert!(!first.observe_manifest(BOOK, "v1").await);
    go(&mut first, 1, 1).await;

    let mut revised = Scripted::default();
    revised.fine.insert((1, 1), fine(1, 1, &["N"]));
    let mut second = session(kv.clone(), Arc::new(revised), EventSink::disconnected());
    assert!(second.observe_manifest(BOOK, "v2").await);
    let report = go(&mut second, 1, 1).await;
    assert_eq!(report.source, StateSource::Cache(LoadSource::Fetched));
    assert!(second.renderer().element(&id("N")).is_some());
    assert!(second.renderer().element(&id("A")).is_none());

    // Same version again: the stored chapter is reused.
    let offline = Arc::new(Scripted::default());
    let mut third = session(kv, offline.clone(), EventSink::disconnected());
    assert!(!third.observe_manifest(BOOK, "v2").await);
    let report = go(&mut third, 1, 1).await;
    assert_eq!(report.source, StateSource::Cache(LoadSource::Store));
    assert!(third.renderer().element(&id("N")).is_some());
    assert_eq!(offline.calls(), 0);
}

#[tokio::test]
async fn chapter_with_a_missing_event_stops_before_it() {
    let mut fetcher = Scripted::default();
    fetcher.fine.insert((1, 1), fine(1, 5, &["A"]));
    fetcher.fine.insert((1, 2), fine(2, 5, &["A", "B"]));
    fetcher.fine.insert((1, 4), fine(4, 5, &["A", "B", "C", "D"]));
    fetcher.fine.insert((1, 5), fine(5, 5, &["A", "B", "C", "D", "E"]));
    let fetcher = Arc::new(fetcher);
    let kv = Arc::new(MemoryStore::new());
    let mut s = session(kv.clone(), fetcher.clone(), EventSink::disconnected());

    let report = go(&mut s, 1, 5).await;
    assert_eq!(report.source, StateSource::Cache(LoadSource::Fetched));
    assert_eq!(report.resolved_event, 2);
    assert_eq!(report.nodes, 2);
    assert!(kv.get(&snapshot_key(BOOK, None, 1)).await.expect("get").is_none());
    assert_eq!(fetcher.calls(), 3);

    // Within the fetched part memory answers; past it the chapter is fetched again.
    let early = go(&mut s, 1, 1).await;
    assert_eq!(early.source, StateSource::Cache(LoadSource::Memory));
    let late = go(&mut s, 1, 5).await;
    assert_eq!(late.source, StateSource::Cache(LoadSource::Fetched));
    assert_eq!(fetcher.calls(), 6);
}

#[tokio::test]
async fn dragged_node_keeps_its_position() {
    let kv = Arc::new(MemoryStore::new());
    seed(&kv, &growing_chapter(1)).await;
    let mut s = session(kv, Arc::new(Scripted::default()), EventSink::disconnected());
    go(&mut s, 1, 2).await;

    let p = storygraph_core::Position::new(10.0, 20.0);
    assert!(s.node_dragged(&id("A"), p));
    assert!(!s.node_dragged(&id("A|B"), p));
    assert!(!s.node_dragged(&id("nobody"), p));

    go(&mut s, 1, 1).await;
    go(&mut s, 1, 2).await;
    assert_eq!(s.registry().get(&id("A")), Some(p));

    let cleared = s.reset();
    assert_eq!(cleared.removed.len(), 3);
    assert!(s.renderer().is_empty());
    assert!(s.registry().is_empty());
}
