// SPDX-License-Identifier: GPL-3.0

pub mod errors;
pub mod fs;
pub mod poll;
pub mod ports;

pub use errors::Error;
pub use fs::{read_data_file, read_json_file, write_json_file};
pub use poll::{poll_until, PollOutcome};
pub use ports::find_free_port;
