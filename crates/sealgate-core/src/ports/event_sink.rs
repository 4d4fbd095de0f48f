//! EventSink port - イベント記録の抽象化
//!
//! # 実装
//! - NoopEventSink: 何もしない
//! - RecordingEventSink: メモリに溜める（テストと CLI の遷移表示用）

use std::sync::Mutex;

use crate::domain::{FlowEvent, FlowState};

/// EventSink は状態遷移イベントを受け取る
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FlowEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: FlowEvent) {}
}

#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<FlowEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Sequence of target states, in emission order.
    pub fn states(&self) -> Vec<FlowState> {
        self.events().into_iter().map(|e| e.to).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: FlowEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn emit(&self, event: FlowEvent) {
        (**self).emit(event)
    }
}
