//! The engine context: global signals and the object lists.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::error::EngineError;
use crate::fader::{Fader, FaderType};
use crate::signal::SignalHandler;
use crate::source::{Output, Source, SourceIndex};
use crate::volmeter::Volmeter;
use crate::EngineResult;

/// Owns every engine object. Callers get `Arc` handles to them.
pub struct Engine {
    signals: Arc<SignalHandler>,
    // Keyed by current name; sources re-key themselves on rename.
    sources: Arc<SourceIndex>,
    outputs: RwLock<Vec<Arc<Output>>>,
    faders: RwLock<Vec<Arc<Fader>>>,
    volmeters: RwLock<Vec<Arc<Volmeter>>>,
}

impl Engine {
    pub fn new() -> Self {
        info!("Engine context created");
        Self {
            signals: Arc::new(SignalHandler::new()),
            sources: Arc::new(RwLock::new(HashMap::new())),
            outputs: RwLock::new(Vec::new()),
            faders: RwLock::new(Vec::new()),
            volmeters: RwLock::new(Vec::new()),
        }
    }

    /// The global signal handler (`source_create`, `source_destroy`, ...).
    pub fn signals(&self) -> &SignalHandler {
        &self.signals
    }

    /// Create a source and emit `source_create`.
    #[instrument(skip(self))]
    pub fn create_source(&self, name: &str) -> EngineResult<Arc<Source>> {
        let source = {
            let mut sources = self.sources.write();
            if sources.contains_key(name) {
                return Err(EngineError::DuplicateName(name.to_string()));
            }
            let source = Arc::new(Source::new(
                name,
                Arc::clone(&self.signals),
                Arc::downgrade(&self.sources),
            ));
            sources.insert(name.to_string(), Arc::clone(&source));
            source
        };

        debug!("Source created");
        source.emit_global("source_create");
        Ok(source)
    }

    /// Remove a source, emitting `remove` then `destroy` on the source and
    /// the matching global signals.
    #[instrument(skip(self))]
    pub fn remove_source(&self, name: &str) -> EngineResult<()> {
        let source = self
            .sources
            .write()
            .remove(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;

        source.emit_both("remove", "source_remove");
        source.emit_both("destroy", "source_destroy");
        debug!("Source removed");
        Ok(())
    }

    /// Find a source by its current name.
    pub fn source_by_name(&self, name: &str) -> Option<Arc<Source>> {
        self.sources.read().get(name).cloned()
    }

    /// Every source, ordered by name.
    pub fn sources(&self) -> Vec<Arc<Source>> {
        let mut sources: Vec<(String, Arc<Source>)> = self
            .sources
            .read()
            .iter()
            .map(|(name, source)| (name.clone(), Arc::clone(source)))
            .collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));
        sources.into_iter().map(|(_, source)| source).collect()
    }

    #[instrument(skip(self))]
    pub fn create_output(&self, name: &str) -> EngineResult<Arc<Output>> {
        let mut outputs = self.outputs.write();
        if outputs.iter().any(|o| o.name() == name) {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        let output = Arc::new(Output::new(name));
        outputs.push(Arc::clone(&output));
        debug!("Output created");
        Ok(output)
    }

    pub fn remove_output(&self, name: &str) -> EngineResult<()> {
        let mut outputs = self.outputs.write();
        let idx = outputs
            .iter()
            .position(|o| o.name() == name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))?;
        outputs.remove(idx);
        Ok(())
    }

    pub fn output_by_name(&self, name: &str) -> Option<Arc<Output>> {
        self.outputs
            .read()
            .iter()
            .find(|o| o.name() == name)
            .cloned()
    }

    pub fn create_fader(&self, kind: FaderType) -> Arc<Fader> {
        let fader = Arc::new(Fader::new(kind));
        self.faders.write().push(Arc::clone(&fader));
        fader
    }

    /// Drop the engine's reference. Returns false if the fader is unknown.
    pub fn destroy_fader(&self, fader: &Arc<Fader>) -> bool {
        let mut faders = self.faders.write();
        let before = faders.len();
        faders.retain(|f| !Arc::ptr_eq(f, fader));
        before != faders.len()
    }

    pub fn fader_count(&self) -> usize {
        self.faders.read().len()
    }

    pub fn create_volmeter(&self, kind: FaderType) -> Arc<Volmeter> {
        let meter = Arc::new(Volmeter::new(kind));
        self.volmeters.write().push(Arc::clone(&meter));
        meter
    }

    /// Drop the engine's reference. Returns false if the volmeter is unknown.
    pub fn destroy_volmeter(&self, meter: &Arc<Volmeter>) -> bool {
        let mut volmeters = self.volmeters.write();
        let before = volmeters.len();
        volmeters.retain(|m| !Arc::ptr_eq(m, meter));
        before != volmeters.len()
    }

    pub fn volmeter_count(&self) -> usize {
        self.volmeters.read().len()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_source_lifecycle_signals() {
        let engine = Engine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for signal in ["source_create", "source_remove", "source_destroy"] {
            let sink = Arc::clone(&seen);
            engine.signals().connect(signal, move |data| {
                let name = data.source("source").map(|s| s.name()).unwrap_or_default();
                sink.lock().push(format!("{signal}:{name}"));
            });
        }

        engine.create_source("mic").unwrap();
        engine.remove_source("mic").unwrap();

        assert_eq!(
            *seen.lock(),
            vec!["source_create:mic", "source_remove:mic", "source_destroy:mic"]
        );
        assert!(engine.source_by_name("mic").is_none());
    }

    #[test]
    fn test_duplicate_and_missing_names() {
        let engine = Engine::new();
        engine.create_source("mic").unwrap();
        assert_eq!(
            engine.create_source("mic").unwrap_err(),
            EngineError::DuplicateName("mic".into())
        );
        assert_eq!(
            engine.remove_source("cam").unwrap_err(),
            EngineError::NotFound("cam".into())
        );

        engine.create_output("stream").unwrap();
        assert!(engine.output_by_name("stream").is_some());
        engine.remove_output("stream").unwrap();
        assert!(engine.output_by_name("stream").is_none());
    }

    #[test]
    fn test_name_lookup_follows_rename() {
        let engine = Engine::new();
        let mic = engine.create_source("mic").unwrap();
        engine.create_source("cam").unwrap();

        mic.rename("mic2").unwrap();
        assert!(engine.source_by_name("mic").is_none());
        assert!(Arc::ptr_eq(&engine.source_by_name("mic2").unwrap(), &mic));

        // The old name is free again; the new one is taken.
        engine.create_source("mic").unwrap();
        assert_eq!(
            mic.rename("cam").unwrap_err(),
            EngineError::DuplicateName("cam".into())
        );
        assert_eq!(mic.name(), "mic2");

        let names: Vec<String> = engine.sources().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["cam", "mic", "mic2"]);

        engine.remove_source("mic2").unwrap();
        assert!(engine.source_by_name("mic2").is_none());
    }

    #[test]
    fn test_destroyed_fader_leaves_only_weak_refs_dangling() {
        let engine = Engine::new();
        let fader = engine.create_fader(FaderType::Cubic);
        let weak = Arc::downgrade(&fader);

        assert!(engine.destroy_fader(&fader));
        assert!(!engine.destroy_fader(&fader));
        drop(fader);
        assert!(weak.upgrade().is_none());
        assert_eq!(engine.fader_count(), 0);
    }
}
