//! Integration tests for the IPC message path and stream relay: JSON
//! line decoding over the closure socket and the command fd-3 pipe,
//! malformed line handling, per-worker message ordering, raw output
//! relay, and stdin writes.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use brood::{Config, ExitReason, Pid, Supervisor};
use serde_json::{json, Value};

/// Test that a closure worker's JSON line arrives as one decoded message
/// before the exit callback, and that returning from the routine exits
/// the worker with reason `Normal`.
#[test]
fn closure_message_then_normal_exit() {
    let messages = Rc::new(RefCell::new(Vec::new()));
    let exits = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .closure(|mut socket| {
            socket.write_all(b"{\"hello\":\"world\"}\n").unwrap();
        })
        .pool(1, 1)
        .on_message({
            let messages = messages.clone();
            let exits = exits.clone();
            move |_ctl, _worker, value| {
                assert!(exits.borrow().is_empty(), "messages precede the exit");
                messages.borrow_mut().push(value);
            }
        })
        .on_exit({
            let exits = exits.clone();
            move |ctl, _worker, reason| {
                exits.borrow_mut().push(reason);
                ctl.shutdown();
            }
        });

    Supervisor::new(cfg).run().unwrap();

    assert_eq!(*messages.borrow(), vec![json!({"hello": "world"})]);
    assert_eq!(*exits.borrow(), vec![ExitReason::Normal]);
}

/// Test that a malformed line is dropped without disturbing the
/// well-formed line behind it.
#[test]
fn malformed_line_is_dropped_silently() {
    let messages = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .closure(|mut socket| {
            socket.write_all(b"bad\n{\"ok\":1}\n").unwrap();
        })
        .pool(1, 1)
        .on_message({
            let messages = messages.clone();
            move |_ctl, _worker, value| messages.borrow_mut().push(value)
        })
        .on_exit(|ctl, _worker, _reason| ctl.shutdown());

    Supervisor::new(cfg).run().unwrap();
    assert_eq!(*messages.borrow(), vec![json!({"ok": 1})]);
}

/// Test that N well-formed lines yield N message callbacks in write
/// order.
#[test]
fn message_order_is_preserved() {
    const COUNT: usize = 20;
    let messages = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .closure(|mut socket| {
            for n in 0..COUNT {
                writeln!(socket, "{{\"n\":{n}}}").unwrap();
            }
        })
        .pool(1, 1)
        .on_message({
            let messages = messages.clone();
            move |_ctl, _worker, value| messages.borrow_mut().push(value)
        })
        .on_exit(|ctl, _worker, _reason| ctl.shutdown());

    Supervisor::new(cfg).run().unwrap();

    let expected: Vec<Value> = (0..COUNT).map(|n| json!({ "n": n })).collect();
    assert_eq!(*messages.borrow(), expected);
}

/// Test that a command worker reaches the master through fd 3.
#[test]
fn command_worker_writes_ipc_on_fd3() {
    let messages = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .command(r#"printf '{"from":"cmd"}\n' >&3"#)
        .pool(1, 1)
        .on_message({
            let messages = messages.clone();
            move |_ctl, worker, value| messages.borrow_mut().push((worker.pid(), value))
        })
        .on_exit(|ctl, _worker, _reason| ctl.shutdown());

    Supervisor::new(cfg).run().unwrap();

    let messages = messages.borrow();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1, json!({"from": "cmd"}));
}

/// Test that stdout and stderr bytes reach the output callback raw,
/// while fd 3 traffic stays on the message path.
#[test]
fn output_callback_receives_both_streams() {
    let output = Rc::new(RefCell::new(Vec::new()));
    let messages = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .command(r#"echo out-line; echo err-line >&2; printf '{"done":true}\n' >&3"#)
        .pool(1, 1)
        .on_output({
            let output = output.clone();
            move |_ctl, _worker, bytes| output.borrow_mut().extend_from_slice(bytes)
        })
        .on_message({
            let messages = messages.clone();
            move |_ctl, _worker, value| messages.borrow_mut().push(value)
        })
        .on_exit(|ctl, _worker, _reason| ctl.shutdown());

    Supervisor::new(cfg).run().unwrap();

    let text = String::from_utf8(output.borrow().clone()).unwrap();
    assert!(text.contains("out-line"), "stdout missing: {text:?}");
    assert!(text.contains("err-line"), "stderr missing: {text:?}");
    assert!(!text.contains("done"), "IPC bytes must not hit the output path");
    assert_eq!(*messages.borrow(), vec![json!({"done": true})]);
}

/// Test that `send_input` reaches a command worker's stdin and that
/// writes to unknown pids are silent no-ops.
#[test]
fn send_input_feeds_worker_stdin() {
    let output = Rc::new(RefCell::new(Vec::new()));

    let cfg = Config::new()
        .command(r#"read line; echo "got $line""#)
        .pool(1, 1)
        .on_spawn(move |ctl, worker| {
            ctl.send_input(worker.pid(), b"ping\n");
            // Unknown pid: must not panic or disturb the pool.
            ctl.send_input(Pid::from_raw(i32::MAX - 1), b"nope\n");
        })
        .on_output({
            let output = output.clone();
            move |_ctl, _worker, bytes| output.borrow_mut().extend_from_slice(bytes)
        })
        .on_exit(|ctl, _worker, _reason| ctl.shutdown());

    Supervisor::new(cfg).run().unwrap();

    let text = String::from_utf8(output.borrow().clone()).unwrap();
    assert!(text.contains("got ping"), "stdin write lost: {text:?}");
}

/// Test that closure workers, which have no stdin, swallow input writes
/// without error.
#[test]
fn send_input_to_closure_worker_is_noop() {
    let cfg = Config::new()
        .closure(|mut socket| {
            socket.write_all(b"{\"up\":1}\n").unwrap();
        })
        .pool(1, 1)
        .on_message(|ctl, worker, _value| {
            ctl.send_input(worker.pid(), b"ignored\n");
        })
        .on_exit(|ctl, _worker, _reason| ctl.shutdown());

    Supervisor::new(cfg).run().unwrap();
}
