//! Character device workloads

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};

use stress_herd_core::{ExitStatus, StressClass, StressContext, Stressor};

const BUFFER_SIZE: usize = 4096;

fn open(path: &str, write: bool) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(write).open(path)
}

/// Writes to `/dev/null`
#[derive(Debug, Default, Clone, Copy)]
pub struct Null;

impl Stressor for Null {
    fn name(&self) -> &str {
        "null"
    }

    fn class(&self) -> StressClass {
        StressClass::DEV | StressClass::MEMORY | StressClass::OS
    }

    fn supported(&self) -> Result<(), String> {
        open("/dev/null", true)
            .map(drop)
            .map_err(|e| format!("cannot open /dev/null: {e}"))
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        let mut file = match open("/dev/null", true) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(worker = %ctx.name, error = %e, "open /dev/null failed");
                return ExitStatus::NotSuccess;
            }
        };
        let buffer = [0xffu8; BUFFER_SIZE];
        while ctx.keep_stressing() {
            match file.write(&buffer) {
                Ok(_) => ctx.inc(),
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
                Err(e) => {
                    tracing::error!(worker = %ctx.name, error = %e, "write failed");
                    return ExitStatus::NotSuccess;
                }
            }
        }
        ExitStatus::Success
    }
}

/// Reads from `/dev/zero` and checks the data really is zero
#[derive(Debug, Default, Clone, Copy)]
pub struct Zero;

impl Stressor for Zero {
    fn name(&self) -> &str {
        "zero"
    }

    fn class(&self) -> StressClass {
        StressClass::DEV | StressClass::MEMORY | StressClass::OS
    }

    fn supported(&self) -> Result<(), String> {
        open("/dev/zero", false)
            .map(drop)
            .map_err(|e| format!("cannot open /dev/zero: {e}"))
    }

    fn run(&self, ctx: &mut StressContext<'_>) -> ExitStatus {
        let mut file = match open("/dev/zero", false) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(worker = %ctx.name, error = %e, "open /dev/zero failed");
                return ExitStatus::NotSuccess;
            }
        };
        let mut buffer = [0xffu8; BUFFER_SIZE];
        while ctx.keep_stressing() {
            match file.read(&mut buffer) {
                Ok(n) => {
                    if buffer[..n].iter().any(|&b| b != 0) {
                        tracing::error!(worker = %ctx.name, "non-zero data read from /dev/zero");
                        return ExitStatus::NotSuccess;
                    }
                    ctx.inc();
                }
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
                Err(e) => {
                    tracing::error!(worker = %ctx.name, error = %e, "read failed");
                    return ExitStatus::NotSuccess;
                }
            }
        }
        ExitStatus::Success
    }
}
