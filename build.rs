//! Renders the `qnap-csi` manual pages into `OUT_DIR`.
//!
//! `qnap-csi.1` covers the whole tool; each subcommand also gets its own
//! `qnap-csi-<subcommand>.1` so operators can `man qnap-csi-publish`.

use std::env;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn render(page: Man, out_dir: &Path, file_name: &str) -> Result<(), Box<dyn Error>> {
    let mut rendered = Vec::new();
    page.render(&mut rendered)?;
    fs::write(out_dir.join(file_name), rendered)?;
    Ok(())
}

fn render_subcommands(tool: &Command, out_dir: &Path) -> Result<(), Box<dyn Error>> {
    for subcommand in tool.get_subcommands() {
        let title = format!("{}-{}", tool.get_name(), subcommand.get_name());
        let file_name = format!("{title}.1");
        render(Man::new(subcommand.clone()).title(title), out_dir, &file_name)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or("OUT_DIR is not set; run through cargo")?;

    let tool = cli::Cli::command();
    render(Man::new(tool.clone()), &out_dir, "qnap-csi.1")?;
    render_subcommands(&tool, &out_dir)?;
    Ok(())
}
