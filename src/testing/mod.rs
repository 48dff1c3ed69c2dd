//! Testing utilities shared by unit and integration tests.

pub mod fixtures;
pub mod mocks;

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::sandbox::Manager;
use crate::spec::{SpecMap, SpecRegistry};
use mocks::{MemoryFileProvider, MockBehavior, MockProvider, SequenceNamespaceProvider};

pub use fixtures::{test_config, SpecFixtures};

/// A manager wired to in-memory test doubles.
pub struct TestHarness {
    pub manager: Manager,
    pub provider: Arc<MockProvider>,
    pub files: Arc<MemoryFileProvider>,
    pub specs: Arc<SpecRegistry>,
}

impl TestHarness {
    pub fn new(behavior: MockBehavior) -> Self {
        Self::with_parts(
            MockProvider::new(behavior),
            MemoryFileProvider::new(),
            test_config(Path::new("/srv/sandbox")),
        )
    }

    pub fn with_parts(provider: MockProvider, files: MemoryFileProvider, config: Config) -> Self {
        Self::with_specs(provider, files, config, SpecFixtures::sample_map())
    }

    pub fn with_specs(
        provider: MockProvider,
        files: MemoryFileProvider,
        config: Config,
        specs: SpecMap,
    ) -> Self {
        let provider = Arc::new(provider);
        let files = Arc::new(files);
        let specs = Arc::new(SpecRegistry::new(specs));
        let manager = Manager::new(
            provider.clone(),
            specs.clone(),
            files.clone(),
            Arc::new(SequenceNamespaceProvider::new()),
            Arc::new(config),
        );

        Self {
            manager,
            provider,
            files,
            specs,
        }
    }
}
