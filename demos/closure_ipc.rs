//! Supervise forked closure workers that speak JSON over the socket
//! pair.
//!
//! Each worker simulates a small job, streams progress messages, and
//! exits. The master replenishes the pool until it has seen enough
//! messages, then shuts down.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use brood::{Config, Supervisor};

fn main() -> brood::Result<()> {
    brood::logging::init_with("brood=debug");

    let total = Rc::new(RefCell::new(0usize));

    let cfg = Config::new()
        .closure(|mut socket| {
            for step in 1..=3 {
                writeln!(socket, "{{\"step\":{step},\"of\":3}}").ok();
                thread::sleep(Duration::from_millis(200));
            }
        })
        .pool(2, 2)
        .on_message({
            let total = total.clone();
            move |ctl, worker, value| {
                println!("[{}] {value}", worker.pid());
                *total.borrow_mut() += 1;
                if *total.borrow() >= 12 {
                    ctl.shutdown();
                }
            }
        })
        .on_exit(|_ctl, worker, reason| {
            println!("[{}] finished: {reason}", worker.pid());
        });

    Supervisor::new(cfg).run()
}
