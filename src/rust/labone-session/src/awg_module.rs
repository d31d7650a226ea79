// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! AWG module: compiles sequence programs and uploads them to a device.

use std::thread;
use std::time::{Duration, Instant};

use labone_log::{diagnostic, info, warn};

use crate::{Error, Result};

const COMPILER_IDLE: i64 = -1;
const COMPILER_OK: i64 = 0;
const COMPILER_FAILED: i64 = 1;
const COMPILER_WARNINGS: i64 = 2;
const ELF_UPLOAD_FAILED: i64 = 1;

/// The vendor AWG module. Keys are module-relative (`compiler/status`).
pub trait AwgModule {
    fn set_string(&mut self, key: &str, value: &str) -> Result<()>;
    fn set_int(&mut self, key: &str, value: i64) -> Result<()>;
    fn get_int(&mut self, key: &str) -> Result<i64>;
    fn get_double(&mut self, key: &str) -> Result<f64>;
    fn get_string(&mut self, key: &str) -> Result<String>;
    fn execute(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileSettings {
    /// Bound for compilation and for the upload, each.
    pub timeout: Duration,
    pub status_poll: Duration,
    pub upload_poll: Duration,
    pub wait_for_upload: bool,
    /// Treat compiler warnings as success instead of failing.
    pub accept_warnings: bool,
}

impl Default for CompileSettings {
    fn default() -> Self {
        CompileSettings {
            timeout: Duration::from_secs(60),
            status_poll: Duration::from_millis(100),
            upload_poll: Duration::from_millis(500),
            wait_for_upload: true,
            accept_warnings: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerStatus {
    Success,
    Warnings(String),
}

/// Compile `program` on `module` and wait for it to be loaded.
pub fn compile_sequence<M: AwgModule + ?Sized>(
    module: &mut M,
    program: &str,
    settings: &CompileSettings,
) -> Result<CompilerStatus> {
    module.set_string("compiler/sourcestring", program)?;
    let start = Instant::now();
    let status = loop {
        let status = module.get_int("compiler/status")?;
        if status != COMPILER_IDLE {
            break status;
        }
        if start.elapsed() > settings.timeout {
            return Err(Error::Timeout {
                what: "the sequence compiler".to_string(),
                timeout: settings.timeout,
            });
        }
        thread::sleep(settings.status_poll);
    };
    let outcome = match status {
        COMPILER_OK => {
            info!("Compilation successful!");
            CompilerStatus::Success
        }
        COMPILER_FAILED => {
            return Err(Error::Compilation(
                module.get_string("compiler/statusstring")?,
            ));
        }
        COMPILER_WARNINGS => {
            let message = module.get_string("compiler/statusstring")?;
            if !settings.accept_warnings {
                return Err(Error::CompilationWarning(message));
            }
            warn!("Compilation successful with warnings: {}", message);
            CompilerStatus::Warnings(message)
        }
        other => {
            return Err(anyhow::anyhow!("Unknown compiler status {other}").into());
        }
    };

    if settings.wait_for_upload {
        let start = Instant::now();
        loop {
            let elf_status = module.get_int("elf/status")?;
            if elf_status == ELF_UPLOAD_FAILED {
                return Err(Error::Upload);
            }
            let progress = module.get_double("progress")?;
            diagnostic!("Upload progress: {:.0}%", progress * 100.0);
            if progress >= 1.0 {
                break;
            }
            if start.elapsed() > settings.timeout {
                return Err(Error::Timeout {
                    what: "the program upload".to_string(),
                    timeout: settings.timeout,
                });
            }
            thread::sleep(settings.upload_poll);
        }
    }
    Ok(outcome)
}
