//! Engine configuration and the per-process engine instance.
//!
//! The engine bundles what used to be process globals: sample-rate
//! record, the workspace dictionary with every builtin, and the audio
//! driver. It is constructed once at startup and passed by reference;
//! only the MIDI state grid remains truly global.

use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::AudioDriver;
use crate::error::{Error, Result};
use crate::table::GForm;
use crate::thread::{Rate, Thread};
use crate::value::Z;

pub const DEFAULT_SAMPLE_RATE: Z = 48_000.0;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: Z,
    pub prelude_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub quiet: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            prelude_file: None,
            log_file: None,
            quiet: false,
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    rate: Rate,
    workspace: Arc<GForm>,
    audio: Arc<AudioDriver>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Arc<Engine> {
        let rate = Rate::new(config.sample_rate);
        let workspace = GForm::empty();
        crate::prims::register(&workspace, &rate);
        tracing::info!(
            sample_rate = config.sample_rate,
            "engine initialized"
        );
        Arc::new(Engine {
            config,
            rate,
            workspace,
            audio: AudioDriver::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn workspace(&self) -> &Arc<GForm> {
        &self.workspace
    }

    pub fn audio(&self) -> &Arc<AudioDriver> {
        &self.audio
    }

    pub fn new_thread(self: &Arc<Self>) -> Thread {
        Thread::new(self.clone())
    }

    /// Run the configured prelude file on the given thread, if any.
    pub fn load_prelude(&self, th: &mut Thread) -> Result<()> {
        let Some(path) = &self.config.prelude_file else {
            return Ok(());
        };
        let src = std::fs::read_to_string(path).map_err(|e| {
            Error::Failed(format!("cannot read prelude {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "loading prelude");
        th.run(&src)
    }
}

/// A throwaway engine for unit tests.
#[cfg(test)]
pub fn test_engine() -> Arc<Engine> {
    Engine::new(EngineConfig::default())
}

/// A thread over a throwaway engine for unit tests.
#[cfg(test)]
pub fn test_thread() -> Thread {
    test_engine().new_thread()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_exposes_configured_rate() {
        let engine = Engine::new(EngineConfig {
            sample_rate: 44_100.0,
            ..Default::default()
        });
        assert_eq!(engine.rate().sample_rate, 44_100.0);
        let mut th = engine.new_thread();
        assert_eq!(th.eval("sampleRate").unwrap().as_float(), 44_100.0);
    }

    #[test]
    fn workspace_holds_builtins() {
        let engine = test_engine();
        let key = crate::value::V::Str(crate::strings::getsym("+"));
        assert!(engine.workspace().get(&key).is_some());
    }

    #[test]
    fn threads_are_independent() {
        let engine = test_engine();
        let mut a = engine.new_thread();
        let mut b = engine.new_thread();
        a.push(crate::value::V::Real(1.0)).unwrap();
        assert_eq!(a.stack_depth(), 1);
        assert_eq!(b.stack_depth(), 0);
        b.clear_stack();
    }

    #[test]
    fn missing_prelude_is_a_failed_error() {
        let engine = Engine::new(EngineConfig {
            prelude_file: Some(PathBuf::from("/does/not/exist.strom")),
            ..Default::default()
        });
        let mut th = engine.new_thread();
        assert!(matches!(
            engine.load_prelude(&mut th),
            Err(Error::Failed(_))
        ));
    }
}
