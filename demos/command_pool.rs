//! Supervise a pool of shell-command workers.
//!
//! Each worker prints a line every second and reports a JSON heartbeat
//! on fd 3. Run with `RUST_LOG=brood=debug` to watch the pool
//! management; stop with Ctrl-C.

use std::time::Duration;

use brood::{Config, Supervisor};

fn main() -> brood::Result<()> {
    brood::logging::init();

    let cfg = Config::new()
        .command(
            r#"n=0; while true; do
                 echo "tick $n from $$"
                 printf '{"pid":%d,"n":%d}\n' "$$" "$n" >&3
                 n=$((n + 1)); sleep 1
               done"#,
        )
        .pool(2, 4)
        .on_output(|_ctl, worker, bytes| {
            print!("[{}] {}", worker.pid(), String::from_utf8_lossy(bytes));
        })
        .on_message(|_ctl, worker, value| {
            println!("[{}] ipc: {value}", worker.pid());
        })
        .heartbeat(Duration::from_secs(5), |ctl| {
            println!("-- pool size: {}", ctl.worker_count());
        });

    Supervisor::new(cfg).run()
}
