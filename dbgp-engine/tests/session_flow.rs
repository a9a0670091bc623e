// End-to-end sessions over an in-memory pipe: the IDE side speaks framed
// DBGP while a plain thread plays the interpreter through DebugHook.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{attribute, Client, FakeHost, MapObject};
use dbgp_engine::protocol::encode_base64;
use dbgp_engine::{
    DbgpConnection, DbgpError, DbgpResult, DebugHook, HostValue, Session, SessionConfig,
    StackFrame,
};
use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

type TestClient = Client<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn start() -> (DbgpConnection, TestClient) {
    common::init_tracing();
    let (ide, engine) = duplex(64 * 1024);
    let (engine_read, engine_write) = split(engine);
    let (ide_read, ide_write) = split(ide);

    let globals = MapObject::new(vec![("version", HostValue::string("1.0"))]);
    let connection = DbgpConnection::attach(
        engine_read,
        engine_write,
        SessionConfig {
            idekey: "test".to_string(),
            ..SessionConfig::default()
        },
        FakeHost::new(globals),
        "file:///a.js",
    )
    .unwrap();

    (connection, Client::new(ide_read, ide_write))
}

/// Four top-level lines of /a.js with `x` and `obj` in scope
fn run_script(session: Arc<Session>) -> DbgpResult<()> {
    let stack = session.enter_context()?;
    session.wait_for_run()?;

    let inner = MapObject::new(vec![("n", HostValue::number(7.0))]);
    let scope = MapObject::new(vec![
        ("x", HostValue::number(3.0)),
        ("obj", HostValue::Object(inner)),
    ]);
    session.on_enter(StackFrame::new("/a.js", 1, "").with_scope(scope))?;

    for line in 1..=4 {
        session.on_line("/a.js", line)?;
        if line == 2 {
            session.write_stdout("hello\n");
        }
    }

    session.on_exit()?;
    session.exit_context(stack.id());
    session.notify_end();
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_breakpoint_inspect_step_and_finish() {
    let (connection, mut ide) = start();

    let init = ide.recv().await;
    assert!(init.starts_with("<init "));
    assert_eq!(attribute(&init, "fileuri"), Some("file:///a.js"));
    assert_eq!(attribute(&init, "idekey"), Some("test"));
    assert_eq!(attribute(&init, "language"), Some("javascript"));

    ide.send("breakpoint_set -i tx1 -t line -f file:///a.js -n 3").await;
    let set = ide.recv().await;
    assert_eq!(attribute(&set, "command"), Some("breakpoint_set"));
    assert_eq!(attribute(&set, "transaction_id"), Some("tx1"));
    assert_eq!(attribute(&set, "id"), Some("p1"));
    assert_eq!(attribute(&set, "state"), Some("enabled"));

    let session = connection.session();
    let interpreter = thread::spawn(move || run_script(session));

    ide.send("run -i tx1").await;
    let output = ide.recv().await;
    assert_eq!(attribute(&output, "type"), Some("stdout"));
    assert!(output.contains(&encode_base64("hello\n")));

    let suspended = ide.recv().await;
    assert_eq!(attribute(&suspended, "command"), Some("run"));
    assert_eq!(attribute(&suspended, "status"), Some("break"));
    assert_eq!(attribute(&suspended, "transaction_id"), Some("tx1"));

    ide.send("stack_get -i 2").await;
    let stack = ide.recv().await;
    assert_eq!(attribute(&stack, "lineno"), Some("3"));
    assert_eq!(attribute(&stack, "where"), Some("{main}"));
    assert_eq!(attribute(&stack, "filename"), Some("file:///a.js"));

    ide.send("context_get -i 3 -d 0 -c 0").await;
    let locals = ide.recv().await;
    assert!(locals.contains(r#"name="x""#));
    assert!(locals.contains(r#"fullname="obj.n""#));

    ide.send("context_get -i 4 -c 1").await;
    assert!(ide.recv().await.contains(r#"name="version""#));

    ide.send_with_data("eval -i 5", "x").await;
    let evaluated = ide.recv().await;
    assert_eq!(attribute(&evaluated, "command"), Some("eval"));
    assert!(evaluated.contains(&encode_base64("3")));

    ide.send("property_get -i 6 -n obj.n").await;
    assert!(ide.recv().await.contains(&encode_base64("7")));

    ide.send("step_over -i 7").await;
    let stepped = ide.recv().await;
    assert_eq!(attribute(&stepped, "status"), Some("break"));
    assert_eq!(attribute(&stepped, "transaction_id"), Some("7"));

    ide.send("stack_depth -i 8").await;
    assert_eq!(attribute(&ide.recv().await, "depth"), Some("1"));

    ide.send("run -i 9").await;
    let finished = ide.recv().await;
    assert_eq!(attribute(&finished, "status"), Some("stopped"));
    assert_eq!(attribute(&finished, "transaction_id"), Some("9"));

    assert!(ide.try_recv().await.is_none());
    assert!(interpreter.join().unwrap().is_ok());
    connection.closed().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_while_suspended_terminates_interpreter() {
    let (connection, mut ide) = start();
    ide.recv().await;

    let session = connection.session();
    let interpreter = thread::spawn(move || run_script(session));

    ide.send("step_into -i 1").await;
    let first = ide.recv().await;
    assert_eq!(attribute(&first, "status"), Some("break"));
    assert_eq!(attribute(&first, "transaction_id"), Some("1"));

    ide.send("stop -i 2").await;
    let stopped = ide.recv().await;
    assert_eq!(attribute(&stopped, "command"), Some("stop"));
    assert_eq!(attribute(&stopped, "status"), Some("stopped"));

    assert!(ide.try_recv().await.is_none());
    assert!(matches!(
        interpreter.join().unwrap(),
        Err(DbgpError::Terminated)
    ));
    connection.closed().await;
}

#[tokio::test]
async fn test_faulty_commands_do_not_end_the_session() {
    let (connection, mut ide) = start();
    ide.recv().await;

    ide.send("bogus -i 1").await;
    ide.send("-i 2").await;
    ide.send("stack_depth -i 3").await;

    let reply = ide.recv().await;
    assert_eq!(attribute(&reply, "transaction_id"), Some("3"));
    assert_eq!(attribute(&reply, "depth"), Some("0"));

    connection.shutdown().await;
}

#[tokio::test]
async fn test_new_run_releases_stale_transaction() {
    let (connection, mut ide) = start();
    ide.recv().await;

    let session = connection.session();
    ide.send("run -i first").await;
    // commands complete out of order, so wait for the first run to land
    while session.transaction_id().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    ide.send("run -i second").await;
    let released = ide.recv().await;
    assert_eq!(attribute(&released, "status"), Some("running"));
    assert_eq!(attribute(&released, "transaction_id"), Some("first"));
    assert_eq!(session.transaction_id().as_deref(), Some("second"));

    connection.shutdown().await;
}

#[tokio::test]
async fn test_breakpoint_lifecycle_over_the_wire() {
    let (connection, mut ide) = start();
    ide.recv().await;

    ide.send_with_data("breakpoint_set -i 1 -t conditional -f file:///a.js -n 2", "x")
        .await;
    let set = ide.recv().await;
    let id = attribute(&set, "id").unwrap().to_string();

    ide.send(&format!("breakpoint_update -i 2 -d {} -s disabled -h 3 -o ==", id))
        .await;
    assert_eq!(attribute(&ide.recv().await, "success"), Some("1"));

    ide.send(&format!("breakpoint_get -i 3 -d {}", id)).await;
    let got = ide.recv().await;
    assert!(got.contains(r#"state="disabled""#));
    assert!(got.contains(r#"hit_condition="==""#));
    assert!(got.contains(&encode_base64("x")));

    ide.send(&format!("breakpoint_remove -i 4 -d {}", id)).await;
    assert_eq!(attribute(&ide.recv().await, "success"), Some("1"));

    ide.send(&format!("breakpoint_remove -i 5 -d {}", id)).await;
    assert!(ide.recv().await.contains(r#"<error code="205">"#));

    ide.send("breakpoint_set -i 6 -f file:///a.js -n 2 -h 0 -o %").await;
    assert!(ide.recv().await.contains(r#"<error code="200">"#));

    connection.shutdown().await;
}
