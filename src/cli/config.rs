//! `config` command

use std::path::PathBuf;

use super::{load_settings, settings_path};

pub fn run(config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config.as_ref())?;
    match settings_path(config.as_ref()) {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no settings file location on this platform"),
    }
    print!("{}", settings.to_toml()?);
    Ok(())
}
