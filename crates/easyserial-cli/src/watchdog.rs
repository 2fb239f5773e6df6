//! Process deadline
//!
//! A background thread that ends the process if the exchange has not
//! finished in time. The serial read timeout bounds each read, but a TCP
//! bridge can block forever.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use easyserial_core::convert::display_to_string;

/// Print `"timeout"` and exit with status 0 once `deadline` passes
pub fn arm(deadline: Duration) -> JoinHandle<()> {
    arm_with(deadline, || {
        println!("{}", display_to_string("timeout"));
        std::process::exit(0);
    })
}

/// Run `on_timeout` on a background thread once `deadline` passes
pub fn arm_with<F>(deadline: Duration, on_timeout: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        thread::sleep(deadline);
        tracing::warn!("deadline of {}ms passed", deadline.as_millis());
        on_timeout();
    })
}
