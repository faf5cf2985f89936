//! Several clients of one execution sharing a store
//!
//! Each client takes its own row from the shared dataset, meets the others at
//! a barrier inside a suite, and reports through its own sink.

use fleetsync::config::ClientIdentity;
use fleetsync::data::{DataTable, NextOptions};
use fleetsync::distributed::{BarrierCoordinator, InMemoryMetricStore, MetricQuery, MetricStore};
use fleetsync::output::{MemorySink, Record};
use fleetsync::suite::{Step, SuiteRunner, TestState};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const USERS: &str = "user,password\nalice,a1\nbob,b2\ncarol,c3\ndave,d4\n";
const CLIENTS: u64 = 3;

fn identity(index: u64, iteration: u64) -> ClientIdentity {
    ClientIdentity {
        global_client_index: index,
        regional_client_index: index,
        iteration,
        concurrent_clients: CLIENTS,
        execution_id: 42,
    }
}

struct ClientRun {
    user: String,
    records: Vec<Record>,
}

async fn run_client(index: u64, store: Arc<InMemoryMetricStore>, barrier_size: f64) -> ClientRun {
    let mut table = DataTable::from_csv("users.csv", USERS, &identity(index, 0)).unwrap();
    let user = table.next(NextOptions::default()).unwrap()[0]
        .field("user")
        .unwrap()
        .to_string();

    let sink = Arc::new(MemorySink::new());
    let mut runner = SuiteRunner::new(sink.clone());
    let coordinator = BarrierCoordinator::new(store, CLIENTS);
    let seen = Arc::new(Mutex::new(Vec::new()));

    runner
        .describe("Checkout", |s| {
            let c = coordinator.clone();
            s.it(
                "all clients ready",
                Step::future(move || {
                    let c = c.clone();
                    async move {
                        c.barrier("ready", Some(barrier_size), Some(Duration::from_secs(10)))
                            .await?;
                        Ok(())
                    }
                }),
            );

            let seen = seen.clone();
            let user = user.clone();
            s.it(
                "uses its own row",
                Step::sync(move || {
                    seen.lock().unwrap().push(user.clone());
                    Ok(())
                }),
            );
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap().len(), 1);
    ClientRun {
        user,
        records: sink.records(),
    }
}

fn test_states(records: &[Record]) -> Vec<TestState> {
    records
        .iter()
        .filter_map(|r| match r {
            Record::FinishSuiteTest(t) => Some(t.state),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_clients_rendezvous_on_distinct_rows() {
    let store = Arc::new(InMemoryMetricStore::new());

    let (a, b, c) = tokio::join!(
        run_client(0, store.clone(), CLIENTS as f64),
        run_client(1, store.clone(), CLIENTS as f64),
        run_client(2, store.clone(), CLIENTS as f64),
    );

    let mut users = vec![a.user.clone(), b.user.clone(), c.user.clone()];
    users.sort();
    assert_eq!(users, ["alice", "bob", "carol"]);

    for run in [&a, &b, &c] {
        assert_eq!(test_states(&run.records), [TestState::Passed, TestState::Passed]);
        assert!(matches!(run.records.last(), Some(Record::FinishSuite(s)) if !s.has_error));
    }

    let arrived = store.get(&MetricQuery::new("ready", None)).await.unwrap();
    assert_eq!(arrived.resolve(None), 3.0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_client_fails_only_the_barrier_test() {
    let store = Arc::new(InMemoryMetricStore::new());

    // A fourth participant never shows up
    let (a, b) = tokio::join!(
        run_client(0, store.clone(), 4.0),
        run_client(1, store.clone(), 4.0),
    );

    for run in [&a, &b] {
        assert_eq!(test_states(&run.records), [TestState::Failed, TestState::Passed]);

        let failed = run
            .records
            .iter()
            .find_map(|r| match r {
                Record::FinishSuiteTest(t) if t.state == TestState::Failed => Some(t),
                _ => None,
            })
            .unwrap();
        assert_eq!(failed.error_type.as_deref(), Some("BarrierError"));
        assert!(failed.error.as_deref().unwrap().contains("ready"));

        assert!(matches!(run.records.last(), Some(Record::FinishSuite(s)) if s.has_error));
    }
}

#[tokio::test]
async fn test_next_iteration_moves_every_client() {
    let rows: Vec<usize> = (0..CLIENTS)
        .map(|client| {
            let mut table = DataTable::from_csv("users.csv", USERS, &identity(client, 1)).unwrap();
            table.next(NextOptions::default()).unwrap()[0].index
        })
        .collect();

    // Positions 3, 4, 5 over four rows
    assert_eq!(rows, [4, 1, 2]);
}
