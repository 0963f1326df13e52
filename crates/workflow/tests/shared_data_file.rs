//! Two workflows over one SQLite file behave like two server processes
//! sharing a `data_file`: each sees the other's commits and only one can win
//! a transition.

mod support;

use std::path::Path;
use std::sync::Arc;

use helpdesk_storage::{SqliteStore, TicketStatus, TicketStore};
use helpdesk_workflow::{TicketWorkflow, WorkflowError};
use support::{actor, directory, printer_ticket, to, Recorder};

fn workflow_on(path: &Path) -> TicketWorkflow<SqliteStore> {
    let store = Arc::new(SqliteStore::open(path).unwrap());
    let dir = Arc::new(directory());
    TicketWorkflow::new(store, dir.clone(), dir, Arc::new(Recorder::default()))
}

#[tokio::test]
async fn second_workflow_sees_the_first_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tickets.db");
    let a = workflow_on(&path);
    let b = workflow_on(&path);

    let t = a.create(&actor("alice"), printer_ticket()).await.unwrap();
    a.assign(&actor("sara"), &t.id, to("tina")).await.unwrap();

    let err = b.assign(&actor("sara"), &t.id, to("gus")).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition(_)), "got {err}");

    let reopened = SqliteStore::open(&path).unwrap();
    let stored = reopened.get_ticket(&t.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Assigned);
    assert_eq!(stored.technician_id.as_deref(), Some("tina"));
    assert_eq!(reopened.list_history(&t.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_workflows_on_one_file_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tickets.db");
    let a = workflow_on(&path);
    let b = workflow_on(&path);

    for _ in 0..10 {
        let t = a.create(&actor("alice"), printer_ticket()).await.unwrap();
        let handles: Vec<_> = [(a.clone(), "tina"), (b.clone(), "gus")]
            .into_iter()
            .map(|(wf, tech)| {
                let id = t.id.clone();
                tokio::spawn(async move { wf.assign(&actor("sara"), &id, to(tech)).await })
            })
            .collect();

        let mut wins = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => wins += 1,
                Err(WorkflowError::Conflict { .. }) | Err(WorkflowError::InvalidTransition(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(wins, 1);
        let history = b.get_history(&actor("sara"), &t.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
