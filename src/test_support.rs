//! Test support utilities shared across unit and integration tests.

use std::collections::BTreeSet;
use std::env;
use std::ffi::OsString;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::model::{
    Credentials, FlavorParams, FormationId, NewFlavor, NewFormation, NewLayer, NewProvider,
    ProviderKind,
};
use crate::platform::{Platform, PlatformError};
use crate::provider::{Adapters, MockProvider};
use crate::store::Store;

/// Owner recorded on every fixture record.
pub const OWNER: &str = "autotest";

/// Identifier shared by the fixture provider, flavor and formation.
pub const FIXTURE_ID: &str = "autotest";

/// Payload for the mock provider fixture with non-empty credentials.
#[must_use]
pub fn autotest_provider() -> NewProvider {
    NewProvider {
        id: FIXTURE_ID.into(),
        kind: ProviderKind::Mock,
        creds: Credentials::from_iter([
            ("secret_key", serde_json::Value::from("x".repeat(64))),
            ("access_key", serde_json::Value::from(20)),
        ]),
    }
}

/// Payload for the flavor fixture bound to [`autotest_provider`].
#[must_use]
pub fn autotest_flavor() -> NewFlavor {
    NewFlavor {
        id: FIXTURE_ID.into(),
        provider: FIXTURE_ID.into(),
        params: FlavorParams::from_iter([("region", "us-west-2"), ("instance_size", "m1.medium")]),
    }
}

/// Adapter registry routing mock providers to `mock`.
#[must_use]
pub fn mock_adapters(mock: &MockProvider) -> Adapters {
    Adapters::new().with(ProviderKind::Mock, Arc::new(mock.clone()))
}

/// In-memory platform seeded with the fixture provider and flavor.
#[derive(Debug)]
pub struct Harness {
    /// Platform under test.
    pub platform: Platform<Store>,
    /// Mock provider shared with the platform's adapters.
    pub mock: MockProvider,
}

impl Harness {
    /// Seeds a platform around a default mock.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] when seeding fails.
    pub fn seeded() -> Result<Self, PlatformError> {
        Self::with_mock(MockProvider::new())
    }

    /// Seeds a platform around `mock`.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] when seeding fails.
    pub fn with_mock(mock: MockProvider) -> Result<Self, PlatformError> {
        let platform = Platform::new(Arc::new(Store::in_memory()), mock_adapters(&mock));
        platform.create_provider(OWNER, autotest_provider())?;
        platform.create_flavor(OWNER, autotest_flavor())?;
        Ok(Self { platform, mock })
    }

    /// Bounds the platform's in-flight provider calls.
    #[must_use]
    pub fn with_concurrency(self, limit: usize) -> Self {
        Self {
            platform: self.platform.with_concurrency(limit),
            mock: self.mock,
        }
    }

    /// Creates the fixture formation with a `proxy` and a `runtime` layer.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError`] when any record cannot be created.
    pub fn formation_with_layers(&self) -> Result<FormationId, PlatformError> {
        let formation = self.platform.create_formation(
            OWNER,
            NewFormation {
                id: FIXTURE_ID.into(),
            },
        )?;
        self.platform.create_layer(
            OWNER,
            &formation.id,
            NewLayer::new("proxy", FIXTURE_ID, "recipe[deis::proxy]"),
        )?;
        self.platform.create_layer(
            OWNER,
            &formation.id,
            NewLayer::new("runtime", FIXTURE_ID, "recipe[deis::runtime]"),
        )?;
        Ok(formation.id)
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
