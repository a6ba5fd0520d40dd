// ABOUTME: Application layer: the engine that owns every pane-level component

mod engine;

pub use engine::{EngineDeps, EngineError, PaneEngine};
