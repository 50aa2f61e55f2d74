// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use splitter_metadata::SplitterExitCode;
use test_splitter::TestSplitterApp;

fn main() -> Result<()> {
    color_eyre::install()?;

    let app = match TestSplitterApp::try_parse() {
        Ok(app) => app,
        // --help and --version are reported on stdout and exit 0.
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            _ = err.print();
            std::process::exit(SplitterExitCode::INTERNAL_ERROR)
        }
    };
    let output = app.init_output();

    match app.exec() {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&output.stderr_styles());
            std::process::exit(error.process_exit_code())
        }
    }
}
