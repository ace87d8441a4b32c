//! Port ledger tests

use std::sync::Arc;
use std::time::Duration;

use fleetdeploy::errors::{DeployError, LedgerError};
use fleetdeploy::models::project::Environment;
use fleetdeploy::ports::ledger::PortLedger;
use fleetdeploy::ports::ranges::PortRanges;
use fleetdeploy::ports::store::{FileLedgerStore, LedgerStore, MemoryLedgerStore, PortKey};
use fleetdeploy::filesys::file::File;

fn ledger_over(store: Arc<dyn LedgerStore>) -> Arc<PortLedger> {
    Arc::new(PortLedger::new(
        store,
        PortRanges::default(),
        Duration::from_secs(300),
    ))
}

#[tokio::test]
async fn test_simultaneous_reservations_of_one_port() {
    let ledger = ledger_over(Arc::new(MemoryLedgerStore::new()));
    let foo = PortKey::new("foo", Environment::Staging, "app");
    let bar = PortKey::new("bar", Environment::Staging, "app");

    let (a, b) = tokio::join!(ledger.reserve(&foo, 3000), ledger.reserve(&bar, 3000));

    let (winner, loser) = match (a, b) {
        (Ok(reservation), Err(e)) | (Err(e), Ok(reservation)) => (reservation, e),
        other => panic!("expected exactly one reservation, got {:?}", other),
    };
    assert!(!winner.token.is_empty());
    assert!(matches!(
        DeployError::from(loser),
        DeployError::PortConflict { port: 3000, .. }
    ));
}

#[tokio::test]
async fn test_concurrent_reservations_across_ledger_instances() {
    // Two ledgers over one store behave like two processes on one host
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
    let ledgers = [ledger_over(store.clone()), ledger_over(store)];

    let mut handles = Vec::new();
    for i in 0..16 {
        let ledger = ledgers[i % 2].clone();
        handles.push(tokio::spawn(async move {
            let key = PortKey::new(format!("project-{}", i), Environment::Staging, "app");
            ledger.reserve(&key, 3100).await
        }));
    }

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(LedgerError::PortInUse { port, .. }) => assert_eq!(port, 3100),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn test_committed_port_blocks_other_projects() {
    let ledger = ledger_over(Arc::new(MemoryLedgerStore::new()));
    let foo = PortKey::new("foo", Environment::Staging, "app");
    let bar = PortKey::new("bar", Environment::Staging, "app");

    let reservation = ledger.reserve(&foo, 3000).await.unwrap();
    assert!(ledger.commit(&reservation.token).await.unwrap());

    assert!(matches!(
        ledger.reserve(&bar, 3000).await,
        Err(LedgerError::PortInUse { .. })
    ));
    assert_eq!(
        ledger
            .find_next_available(Environment::Staging, "app")
            .await
            .unwrap(),
        3001
    );
}

#[tokio::test]
async fn test_file_ledger_shared_between_instances() {
    let dir = tempfile::tempdir().unwrap();
    let store = || -> Arc<dyn LedgerStore> {
        Arc::new(FileLedgerStore::new(
            File::new(dir.path().join("ports.json")),
            File::new(dir.path().join("ports.lock")),
        ))
    };
    let first = ledger_over(store());
    let second = ledger_over(store());

    let foo = PortKey::new("foo", Environment::Production, "app");
    let reservation = first.reserve(&foo, 4000).await.unwrap();
    assert!(first.commit(&reservation.token).await.unwrap());

    let bar = PortKey::new("bar", Environment::Production, "app");
    assert!(matches!(
        second.reserve(&bar, 4000).await,
        Err(LedgerError::PortInUse { .. })
    ));
    assert_eq!(
        second.commitment_for(&foo).await.unwrap().map(|c| c.port),
        Some(4000)
    );
}
