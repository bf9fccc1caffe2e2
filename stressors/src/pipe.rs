//! Pipe throughput workload

use std::fs::File;
use std::io::{ErrorKind, Read, Write};

use stress_herd_core::{ExitStatus, StressClass, StressContext, Stressor};

const DEFAULT_PIPE_DATA_SIZE: usize = 512;

/// Writes fixed-size messages into a pipe drained by a reader thread
#[derive(Debug, Clone, Copy)]
pub struct Pipe {
    /// Bytes per write
    pub data_size: usize,
}

impl Default for Pipe {
    fn default() -> Self {
        Self {
            data_size: DEFAULT_PIPE_DATA_SIZE,
        }
    }
}

/// Reader side: drains until EOF, checking every message carries its marker
fn drain(mut rx: File, data_size: usize) -> bool {
    let mut buffer = vec![0u8; data_size];
    let mut ok = true;
    loop {
        match rx.read_exact(&mut buffer) {
            Ok(()) => ok &= buffer.iter().all(|&b| b == buffer[0]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(_) => return ok,
        }
    }
}

impl Stressor for Pipe {
    fn name(&self) -> &str {
        "pipe"
    }

    fn class(&self) -> StressClass {
        StressClass::SCHEDULER | StressClass::OS
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        let data_size = self.data_size.max(1);
        let (rx, tx) = match nix::unistd::pipe() {
            Ok(fds) => fds,
            Err(e) => {
                tracing::debug!(worker = %ctx.name, error = %e, "pipe failed");
                return ExitStatus::NoResource;
            }
        };
        let rx = File::from(rx);
        let mut tx = File::from(tx);

        std::thread::scope(|scope| {
            let reader = scope.spawn(move || drain(rx, data_size));

            let mut message = vec![0u8; data_size];
            let mut status = ExitStatus::Success;
            while ctx.keep_stressing() {
                message.fill(ctx.ops() as u8);
                match tx.write_all(&message) {
                    Ok(()) => ctx.inc(),
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::error!(worker = %ctx.name, error = %e, "write failed");
                        status = ExitStatus::NotSuccess;
                        break;
                    }
                }
            }
            // Closing the write end lets the reader see EOF.
            drop(tx);

            match reader.join() {
                Ok(true) => status,
                Ok(false) => {
                    tracing::error!(worker = %ctx.name, "reader saw a corrupted message");
                    ExitStatus::NotSuccess
                }
                Err(_) => ExitStatus::Failure,
            }
        })
    }
}
