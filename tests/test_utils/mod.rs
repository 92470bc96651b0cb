//! Test utilities: in-memory database setup and scriptable vendor fakes.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use wallet_sync::config::WorkerConfig;
use wallet_sync::drivers::{
    AppleWalletDriver, LoyaltyObjectPatcher, PassRegenerator, PushNotifier, RegeneratedPass,
    Vendor, VendorErrorKind, WalletDrivers, WalletError,
};
use wallet_sync::repositories::WalletJobQueue;
use wallet_sync::sync_worker::WalletSyncWorker;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Records every call; fails with the queued errors first, then succeeds.
#[derive(Default)]
pub struct FakePatcher {
    pub calls: Mutex<Vec<(String, i64)>>,
    failures: Mutex<VecDeque<WalletError>>,
    always_fail: bool,
}

impl FakePatcher {
    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Default::default()
        }
    }

    pub fn failing_with(errors: Vec<WalletError>) -> Self {
        Self {
            failures: Mutex::new(errors.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, i64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LoyaltyObjectPatcher for FakePatcher {
    async fn apply(&self, object_id: &str, balance: i64) -> Result<(), WalletError> {
        self.calls
            .lock()
            .unwrap()
            .push((object_id.to_string(), balance));

        if self.always_fail {
            return Err(patch_failed());
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct FakeRegenerator {
    pub calls: Mutex<Vec<String>>,
    pub error: Option<WalletError>,
}

#[async_trait]
impl PassRegenerator for FakeRegenerator {
    async fn regenerate(&self, serial_number: &str) -> Result<RegeneratedPass, WalletError> {
        self.calls.lock().unwrap().push(serial_number.to_string());
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(RegeneratedPass {
                serial_number: serial_number.to_string(),
            }),
        }
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub calls: Mutex<Vec<String>>,
    pub fail: bool,
}

impl FakeNotifier {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PushNotifier for FakeNotifier {
    async fn notify(&self, device_token: &str) -> Result<(), WalletError> {
        self.calls.lock().unwrap().push(device_token.to_string());
        if self.fail {
            Err(WalletError::vendor(
                Vendor::Apns,
                VendorErrorKind::PushFailed,
                "HTTP 503: ServiceUnavailable",
            ))
        } else {
            Ok(())
        }
    }
}

pub fn patch_failed() -> WalletError {
    WalletError::from_status(
        Vendor::GoogleWallet,
        VendorErrorKind::PatchFailed,
        500,
        "backend error",
    )
}

/// Worker wired to the given fakes over a fresh database.
pub struct Harness {
    pub worker: WalletSyncWorker,
    pub queue: WalletJobQueue,
    pub patcher: Arc<FakePatcher>,
    pub regenerator: Arc<FakeRegenerator>,
    pub notifier: Arc<FakeNotifier>,
}

pub async fn harness(
    patcher: FakePatcher,
    regenerator: FakeRegenerator,
    notifier: FakeNotifier,
) -> Harness {
    let db = setup_test_db().await.expect("test db");
    let config = WorkerConfig::default();
    let queue = WalletJobQueue::new(db, config.max_attempts);

    let patcher = Arc::new(patcher);
    let regenerator = Arc::new(regenerator);
    let notifier = Arc::new(notifier);

    let drivers = WalletDrivers::new(
        patcher.clone(),
        AppleWalletDriver::new(regenerator.clone(), notifier.clone()),
    );
    let worker = WalletSyncWorker::new(queue.clone(), drivers, config);

    Harness {
        worker,
        queue,
        patcher,
        regenerator,
        notifier,
    }
}
