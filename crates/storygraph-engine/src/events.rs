use crossbeam_channel::{Receiver, Sender};
use storygraph_core::ElementId;

#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    LayoutComplete { nodes: usize, edges: usize },
    NodesAdded {
        book_id: String,
        chapter_idx: u32,
        event_idx: i64,
        ids: Vec<ElementId>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<Sender<SceneEvent>>);

impl EventSink {
    pub fn channel() -> (Self, Receiver<SceneEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self(Some(tx)), rx)
    }

    pub fn disconnected() -> Self {
        Self(None)
    }

    pub fn emit(&self, ev: SceneEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.send(ev);
        }
    }
}
