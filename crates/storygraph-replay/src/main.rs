mod config;
mod fixture;

use anyhow::Result;
use std::sync::Arc;

use config::parse_args;
use fixture::{BookFixture, FixtureFetcher, SAMPLE_BOOK};
use storygraph_core::{CharacterId, ElementId};
use storygraph_engine::graph::TapTarget;
use storygraph_engine::render::HeadlessRenderer;
use storygraph_engine::store::{snapshot_key, KeyValueStore, MemoryStore};
use storygraph_engine::util::config as engine_config;
use storygraph_engine::{EventSink, GraphSession, NavigationOutcome, SceneEvent};

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = parse_args()?;

    let cfg = match &args.config {
        Some(path) => engine_config::load_or_default_from_path(path),
        None => engine_config::load_or_default(),
    };
    let fixture = match &args.fixture {
        Some(path) => BookFixture::load(path)?,
        None => BookFixture::parse(SAMPLE_BOOK)?,
    };
    tracing::info!(
        book = %fixture.book_id,
        chapters = fixture.chapters.len(),
        layout = ?cfg.layout_mode,
        "replay starting"
    );

    let kv = Arc::new(MemoryStore::new());
    for chapter in &fixture.chapters {
        if let Some(snapshot) = &chapter.snapshot {
            let key = snapshot_key(&fixture.book_id, fixture.manifest_version.as_deref(), chapter.chapter_idx);
            kv.set(&key, snapshot.clone(), None).await?;
        }
    }

    let (sink, events) = EventSink::channel();
    let fetcher = Arc::new(FixtureFetcher::new(&fixture));
    let mut session = GraphSession::new(cfg, HeadlessRenderer::new(), kv, fetcher, sink)
        .with_placement_seed(args.seed);

    if let Some(version) = &fixture.manifest_version {
        session.observe_manifest(&fixture.book_id, version).await;
    }
    for chapter in &fixture.chapters {
        if !chapter.flat_events.is_empty() {
            session.register_flat_events(&fixture.book_id, chapter.chapter_idx, chapter.flat_events.clone());
        }
    }

    for (chapter, event) in fixture.steps(args.chapter) {
        let token = session.begin_navigation();
        match session.navigate(&fixture.book_id, chapter, event, &token).await {
            NavigationOutcome::Applied(report) => {
                tracing::info!(
                    chapter,
                    event,
                    source = ?report.source,
                    nodes = report.nodes,
                    edges = report.edges,
                    added = report.sync.added.len(),
                    removed = report.sync.removed.len(),
                    restyled = report.sync.updated.len(),
                    dropped_edges = report.dropped_edges,
                    fallbacks = report.sync.placement.fallbacks.len(),
                    "navigated"
                );
            }
            NavigationOutcome::Superseded => {
                tracing::warn!(chapter, event, "navigation superseded");
            }
        }

        if let Some(q) = &args.search {
            let result = session.set_search(q, None);
            tracing::info!(query = %q, active = result.active, hits = result.result_ids.len(), "search applied");
        }

        for ev in events.try_iter() {
            match ev {
                SceneEvent::LayoutComplete { nodes, edges } => {
                    tracing::debug!(nodes, edges, "layout complete");
                }
                SceneEvent::NodesAdded { ids, .. } if !ids.is_empty() => {
                    let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
                    tracing::info!(?ids, "nodes entered");
                }
                SceneEvent::NodesAdded { .. } => {}
            }
        }
    }

    if let Some(id) = &args.tap {
        let muts = session.tap(TapTarget::Node(ElementId::from(&CharacterId::new(id.as_str()))));
        tracing::info!(id = %id, selection = ?session.selection(), mutations = muts.len(), "tapped");
    }

    let renderer = session.renderer();
    tracing::info!(
        elements = renderer.len(),
        positions = session.registry().len(),
        repaints = renderer.repaints(),
        calls = renderer.mutation_count(),
        "replay finished"
    );
    Ok(())
}
