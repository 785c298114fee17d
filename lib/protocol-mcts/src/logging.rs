/*
 * Copyright (C) 2023 Asim Ihsan
 * SPDX-License-Identifier: AGPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU Affero General Public License as published by the Free
 * Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A
 * PARTICULAR PURPOSE. See the GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License along
 * with this program. If not, see <https://www.gnu.org/licenses/>
 */

//! ANSI-coloured file sink for the search log.
//!
//! The sink is installed at Initialisation from the `AFLNET_LEGION_LOG`
//! environment variable. Records are human-readable and tagged by the
//! emitting operation (`[SELECTION]`, `[MCTS-EXPANSION]`, ...); the format
//! is not a stable interface. All failures — unset variable, unopenable
//! file, logger already installed, write errors — are silent.

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Environment variable naming the log file opened at Initialisation.
pub const LOG_PATH_ENV: &str = "AFLNET_LEGION_LOG";

fn level_colour(level: Level) -> u8 {
    match level {
        Level::Error => 31,
        Level::Warn => 33,
        Level::Info => 32,
        Level::Debug => 36,
        Level::Trace => 94,
    }
}

struct FileSink {
    start: Instant,
    writer: Mutex<LineWriter<File>>,
}

impl Log for FileSink {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(_) => return,
        };
        let _ = writeln!(
            writer,
            "{:>10.3} \x1b[1;{}m{:<5}\x1b[0m {}: {}",
            elapsed,
            level_colour(record.level()),
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

/// Opens the sink named by [`LOG_PATH_ENV`] and installs it as the global
/// logger. Returns false when the variable is unset or installation fails.
pub fn try_init_from_env() -> bool {
    match std::env::var(LOG_PATH_ENV) {
        Ok(path) if !path.is_empty() => try_init_with_path(&path),
        _ => false,
    }
}

/// Opens `path` append-only and installs the sink as the global logger.
pub fn try_init_with_path(path: &str) -> bool {
    let file = match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => file,
        Err(_) => return false,
    };
    let sink = Box::new(FileSink {
        start: Instant::now(),
        writer: Mutex::new(LineWriter::new(file)),
    });
    if log::set_boxed_logger(sink).is_err() {
        return false;
    }
    log::set_max_level(LevelFilter::Trace);
    true
}
